//! Error types for tgstash-sync.
//!
//! Each concern gets its own enum so callers can tell a broken database from
//! a dropped connection. Attachment errors never leave the materializer; they
//! are logged and the item is skipped.

use std::io;

use thiserror::Error;

// ─── RpcError ─────────────────────────────────────────────────────────────────

/// An error reported by the remote platform in response to a request.
///
/// The numeric suffix of a name like `FLOOD_WAIT_30` is carried separately in
/// [`RpcError::value`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("RPC {code}: {name}{}", .value.map(|v| format!(" (value: {v})")).unwrap_or_default())]
pub struct RpcError {
    pub code:  i32,
    pub name:  String,
    pub value: Option<u32>,
}

impl RpcError {
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        if self.code == 420 && self.name == "FLOOD_WAIT" {
            self.value.map(u64::from)
        } else {
            None
        }
    }
}

// ─── RemoteError ──────────────────────────────────────────────────────────────

/// Anything that can go wrong while talking to the remote platform.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("connection to the remote platform was lost")]
    Disconnected,
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("cancelled")]
    Cancelled,
}

impl RemoteError {
    /// `true` if the session is gone and the worker should reconnect.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Disconnected => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    pub fn flood_wait_seconds(&self) -> Option<u64> {
        match self {
            Self::Rpc(e) => e.flood_wait_seconds(),
            _ => None,
        }
    }
}

// ─── StoreError ───────────────────────────────────────────────────────────────

/// Failure of the local chat/settings store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

// ─── MediaError ───────────────────────────────────────────────────────────────

/// Why a single attachment could not be materialized.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("download failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),
}

// ─── ReconcileError ───────────────────────────────────────────────────────────

/// One chat whose reconciliation hit the store and failed.
#[derive(Debug)]
pub struct ChatFailure {
    pub remote_id: i64,
    pub error:     StoreError,
}

/// Returned when at least one chat of a reconciliation call failed.
///
/// Sibling chats were still reconciled; `summary` counts what went through.
#[derive(Debug, Error)]
#[error("{} chat(s) failed to reconcile, first: {}", .failures.len(), .failures.first().map(|f| f.error.to_string()).unwrap_or_default())]
pub struct ReconcileError {
    pub summary:  crate::registry::ReconcileSummary,
    pub failures: Vec<ChatFailure>,
}

// ─── SyncError ────────────────────────────────────────────────────────────────

/// Top-level error of a sync pass or of the worker loop.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Remote(e) if e.is_disconnect())
    }
}
