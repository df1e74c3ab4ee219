//! History fetcher: walk each enabled chat's history down to its cursor.
//!
//! Pages are requested newest first with a growing offset and a fixed floor
//! (`min_id` = the stored cursor). A chat is done when a page comes back
//! empty or when the "chat created" marker shows up, whichever is first.
//! Cursors of all chats are persisted together after the pass, touching
//! nothing but the cursor column.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::errors::{RemoteError, SyncError};
use crate::media::Materializer;
use crate::model::{ChatRecord, MessageId};
use crate::registry::{ChatRegistry, ReconcileSummary};
use crate::remote::Remote;

/// Messages requested per history page.
pub const PAGE_SIZE: i32 = 25;

/// Progress made on one chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatProgress {
    pub remote_id:       i64,
    /// Largest message id observed, never below the starting cursor.
    pub high_water_mark: MessageId,
    pub pages:           usize,
    pub attachments:     usize,
    /// `true` if the creation marker ended the walk.
    pub reached_start:   bool,
}

/// Summary of a whole fetch pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub chats:     Vec<ChatProgress>,
    pub skipped:   usize,
    pub failed:    usize,
    pub persisted: ReconcileSummary,
}

/// Pages through message history and hands attachments to the materializer.
#[derive(Clone)]
pub struct HistoryFetcher {
    remote:       Arc<dyn Remote>,
    materializer: Materializer,
    page_size:    i32,
}

impl HistoryFetcher {
    pub fn new(remote: Arc<dyn Remote>, materializer: Materializer) -> Self {
        Self { remote, materializer, page_size: PAGE_SIZE }
    }

    /// Override the page size (mostly useful in tests).
    pub fn page_size(mut self, size: i32) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    /// Fetch every enabled chat, then persist the new cursors in one call.
    ///
    /// A chat whose history request fails is skipped and keeps its cursor.
    /// A lost connection aborts the pass without persisting anything, and
    /// the caller is expected to reconnect and run the pass again.
    pub async fn run(&self, registry: &ChatRegistry, cancel: &CancellationToken) -> Result<FetchReport, SyncError> {
        tracing::info!("[tgstash] Processing all messages since last download");
        let chats = registry.list_enabled()?;
        let mut report = FetchReport::default();
        let mut cursors: Vec<(i64, MessageId)> = Vec::with_capacity(chats.len());

        for chat in &chats {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            match self.fetch_chat(chat, cancel).await {
                Ok(Some(progress)) => {
                    cursors.push((chat.remote_id, progress.high_water_mark));
                    report.chats.push(progress);
                }
                Ok(None) => report.skipped += 1,
                Err(e) if e.is_disconnect() || matches!(e, RemoteError::Cancelled) => {
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!("[tgstash] Fetching {:?} failed, cursor kept: {e}", chat.display_name);
                    report.failed += 1;
                }
            }
        }

        report.persisted = registry.advance_cursors(&cursors)?;
        Ok(report)
    }

    /// Walk one chat's history from its cursor.
    ///
    /// Returns `Ok(None)` when the chat has a kind this fetcher cannot address.
    pub async fn fetch_chat(
        &self,
        chat:   &ChatRecord,
        cancel: &CancellationToken,
    ) -> Result<Option<ChatProgress>, RemoteError> {
        let Some(peer) = chat.peer() else {
            tracing::warn!("[tgstash] Chat {:?} has an unknown kind, skipping", chat.display_name);
            return Ok(None);
        };

        let floor = chat.last_downloaded_id;
        let mut progress = ChatProgress {
            remote_id:       chat.remote_id,
            high_water_mark: floor,
            pages:           0,
            attachments:     0,
            reached_start:   false,
        };
        let mut offset = 0;

        while !progress.reached_start {
            let page = tokio::select! {
                _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                page = self.remote.fetch_history(&peer, floor, offset, self.page_size) => page?,
            };
            progress.pages += 1;
            if page.is_empty() {
                break;
            }

            for message in &page {
                progress.high_water_mark = progress.high_water_mark.max(message.id);
                if let Some(attachment) = message.attachment() {
                    self.materializer.materialize(attachment, chat).await;
                    progress.attachments += 1;
                }
                if message.is_creation_marker() {
                    progress.reached_start = true;
                }
            }
            offset += page.len() as i32;
        }

        tracing::debug!(
            "[tgstash] {:?}: {} page(s), {} attachment(s), cursor {} → {}",
            chat.display_name, progress.pages, progress.attachments, floor, progress.high_water_mark
        );
        Ok(Some(progress))
    }
}
