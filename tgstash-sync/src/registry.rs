//! Chat registry: reconciles chat descriptors against persisted records.
//!
//! A reconciliation call speaks for one [`Provenance`] and only ever writes
//! the columns that provenance owns. Chats are reconciled one at a time, so a
//! store failure on one chat leaves its siblings untouched.

use crate::errors::{ChatFailure, ReconcileError, RemoteError, StoreError};
use crate::model::{ChatDescriptor, ChatKind, ChatRecord, LocalFields, MessageId, Provenance, RemoteFields};
use crate::remote::{Account, Remote};
use crate::store::{ChatFilter, Store};

/// Display name given to the account's own chat.
pub const SAVED_MESSAGES: &str = "Saved Messages";

/// What one reconciliation call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub inserted:  usize,
    pub updated:   usize,
    pub collapsed: usize,
    pub unchanged: usize,
}

impl ReconcileSummary {
    /// Number of chats whose stored state changed.
    pub fn mutations(&self) -> usize {
        self.inserted + self.updated + self.collapsed
    }
}

enum Outcome {
    Inserted,
    Updated,
    Collapsed,
    Unchanged,
}

/// Owns the chat records of the local store.
#[derive(Clone, Debug)]
pub struct ChatRegistry {
    store: Store,
}

impl ChatRegistry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Reconcile `chats` under one provenance.
    ///
    /// * no stored record → insert the descriptor;
    /// * one record → update the provenance's fields if any differ;
    /// * several records → delete them all and insert the descriptor fresh.
    ///
    /// Every chat is attempted. If any failed, the error lists the failures
    /// and carries the summary of what did go through.
    pub fn reconcile(
        &self,
        chats:      &[ChatDescriptor],
        provenance: Provenance,
    ) -> Result<ReconcileSummary, ReconcileError> {
        let mut summary = ReconcileSummary::default();
        let mut failures = Vec::new();

        for chat in chats {
            match self.reconcile_one(chat, provenance) {
                Ok(Outcome::Inserted)  => summary.inserted += 1,
                Ok(Outcome::Updated)   => summary.updated += 1,
                Ok(Outcome::Collapsed) => summary.collapsed += 1,
                Ok(Outcome::Unchanged) => summary.unchanged += 1,
                Err(error) => {
                    tracing::error!(
                        "[tgstash] Reconciling chat {} ({provenance}) failed: {error}",
                        chat.remote_id
                    );
                    failures.push(ChatFailure { remote_id: chat.remote_id, error });
                }
            }
        }

        tracing::debug!(
            "[tgstash] Reconciled {} chat(s) ({provenance}): {} new, {} updated, {} collapsed",
            chats.len(), summary.inserted, summary.updated, summary.collapsed
        );
        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(ReconcileError { summary, failures })
        }
    }

    fn reconcile_one(&self, chat: &ChatDescriptor, provenance: Provenance) -> Result<Outcome, StoreError> {
        let existing = self.store.load_chats(ChatFilter::remote_id(chat.remote_id))?;
        match existing.as_slice() {
            [] => {
                let id = self.store.insert_chat(chat)?;
                tracing::info!("[tgstash] New chat {:?} ({}) stored as #{id}", chat.display_name, chat.remote_id);
                Ok(Outcome::Inserted)
            }
            [record] => match provenance {
                Provenance::Remote => {
                    let incoming = RemoteFields::from(chat);
                    if record.remote_fields().as_ref() == Some(&incoming) {
                        return Ok(Outcome::Unchanged);
                    }
                    self.store.update_remote_fields(record.local_id, &incoming)?;
                    Ok(Outcome::Updated)
                }
                Provenance::Local => {
                    let incoming = LocalFields::from(chat);
                    let current = record.local_fields();
                    if current.enabled == incoming.enabled && current.last_downloaded_id >= incoming.last_downloaded_id {
                        return Ok(Outcome::Unchanged);
                    }
                    self.store.update_local_fields(record.local_id, &incoming)?;
                    Ok(Outcome::Updated)
                }
            },
            duplicates => {
                let ids: Vec<i64> = duplicates.iter().map(|r| r.local_id).collect();
                tracing::warn!(
                    "[tgstash] {} records share remote id {}, replacing them with one",
                    ids.len(), chat.remote_id
                );
                self.store.delete_chats(&ids)?;
                self.store.insert_chat(chat)?;
                Ok(Outcome::Collapsed)
            }
        }
    }

    /// Record fetch progress under local provenance: raise each chat's cursor
    /// to the paired message id.
    ///
    /// Only the cursor is written and it never moves down, so an operator
    /// toggle made while the progress was gathered stays in place.
    pub fn advance_cursors(&self, progress: &[(i64, MessageId)]) -> Result<ReconcileSummary, ReconcileError> {
        let mut summary = ReconcileSummary::default();
        let mut failures = Vec::new();

        for &(remote_id, cursor) in progress {
            match self.store.advance_cursor(remote_id, cursor) {
                Ok(0) => summary.unchanged += 1,
                Ok(_) => summary.updated += 1,
                Err(error) => {
                    tracing::error!("[tgstash] Saving cursor {cursor} of chat {remote_id} failed: {error}");
                    failures.push(ChatFailure { remote_id, error });
                }
            }
        }

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(ReconcileError { summary, failures })
        }
    }

    /// Every chat marked for download, in store order.
    pub fn list_enabled(&self) -> Result<Vec<ChatRecord>, StoreError> {
        self.store.load_chats(ChatFilter::enabled())
    }

    pub fn list_all(&self) -> Result<Vec<ChatRecord>, StoreError> {
        self.store.load_chats(ChatFilter::default())
    }

    /// The enabled chat with the given remote id, if there is exactly one.
    pub fn find_enabled(&self, remote_id: i64) -> Result<Option<ChatRecord>, StoreError> {
        let chats = self.store.load_chats(ChatFilter { enabled: Some(true), remote_id: Some(remote_id) })?;
        Ok(chats.into_iter().next())
    }

    /// Operator toggle: a local-provenance reconciliation of one chat.
    ///
    /// Returns `false` if no chat with that remote id is stored.
    pub fn set_enabled(&self, remote_id: i64, enabled: bool) -> Result<bool, CommandError> {
        let chats = self.store.load_chats(ChatFilter::remote_id(remote_id))?;
        let Some(record) = chats.into_iter().next() else {
            return Ok(false);
        };
        match record.with_cursor(record.last_downloaded_id) {
            Some(mut descriptor) => {
                descriptor.enabled = enabled;
                self.reconcile(&[descriptor], Provenance::Local)?;
            }
            None => {
                let fields = LocalFields { enabled, ..record.local_fields() };
                self.store.update_local_fields(record.local_id, &fields)?;
            }
        }
        Ok(true)
    }

    /// Operator override of the download folder name.
    pub fn set_storage_name(&self, remote_id: i64, storage_name: Option<&str>) -> Result<bool, StoreError> {
        let chats = self.store.load_chats(ChatFilter::remote_id(remote_id))?;
        for chat in &chats {
            self.store.set_storage_name(chat.local_id, storage_name)?;
        }
        Ok(!chats.is_empty())
    }

    /// Pull the chat list from the remote, add the account's own chat and
    /// reconcile everything under remote provenance.
    pub async fn refresh(&self, remote: &dyn Remote, account: &Account) -> Result<ReconcileSummary, RefreshError> {
        tracing::info!("[tgstash] Updating all chats …");
        let mut chats = remote.list_chats().await?;
        chats.push(saved_messages(account));
        Ok(self.reconcile(&chats, Provenance::Remote)?)
    }
}

/// Descriptor of the account's "Saved Messages" chat.
pub fn saved_messages(account: &Account) -> ChatDescriptor {
    ChatDescriptor::new(account.user_id, 0, SAVED_MESSAGES, ChatKind::SelfChat)
}

/// Failure of [`ChatRegistry::refresh`].
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Failure of an operator command against the registry.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}
