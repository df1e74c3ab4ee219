//! Live update dispatcher: react to single push events.
//!
//! Used instead of timer-driven polling when `use_live_update` is set. A new
//! message in a known, enabled chat gets its attachment materialized and the
//! chat's cursor advanced. A chat metadata change triggers a full
//! remote-provenance refresh of the registry.

use std::sync::Arc;

use crate::errors::SyncError;
use crate::media::{Materialized, Materializer};
use crate::registry::{ChatRegistry, RefreshError};
use crate::remote::{Account, Remote, RemoteEvent, RemoteMessage};

/// What handling one event amounted to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatched {
    /// The message belongs to no enabled chat; a later refresh will pick it up.
    Dropped,
    /// The message was processed.
    Message {
        attachment:      Option<Materialized>,
        cursor_advanced: bool,
    },
    /// The chat list was reconciled again.
    Refreshed,
}

#[derive(Clone)]
pub struct LiveDispatcher {
    remote:       Arc<dyn Remote>,
    registry:     ChatRegistry,
    materializer: Materializer,
}

impl LiveDispatcher {
    pub fn new(remote: Arc<dyn Remote>, registry: ChatRegistry, materializer: Materializer) -> Self {
        Self { remote, registry, materializer }
    }

    pub async fn dispatch(&self, event: RemoteEvent, account: &Account) -> Result<Dispatched, SyncError> {
        match event {
            RemoteEvent::NewMessage(message) => self.on_new_message(message).await,
            RemoteEvent::ChatChanged { remote_id } => {
                match remote_id {
                    Some(id) => tracing::info!("[tgstash] Chat {id} changed, refreshing chat list"),
                    None => tracing::info!("[tgstash] A chat changed, refreshing chat list"),
                }
                match self.registry.refresh(self.remote.as_ref(), account).await {
                    Ok(_) => Ok(Dispatched::Refreshed),
                    Err(RefreshError::Remote(e)) => Err(e.into()),
                    Err(RefreshError::Reconcile(e)) => Err(e.into()),
                }
            }
        }
    }

    async fn on_new_message(&self, message: RemoteMessage) -> Result<Dispatched, SyncError> {
        let Some(chat) = self.registry.find_enabled(message.peer_id)? else {
            tracing::debug!("[tgstash] Message {} in untracked chat {} dropped", message.id, message.peer_id);
            return Ok(Dispatched::Dropped);
        };

        let attachment = match message.attachment() {
            Some(attachment) => Some(self.materializer.materialize(attachment, &chat).await),
            None => None,
        };

        let cursor_advanced = message.id > chat.last_downloaded_id
            && self.registry.advance_cursors(&[(chat.remote_id, message.id)])?.updated > 0;

        Ok(Dispatched::Message { attachment, cursor_advanced })
    }
}
