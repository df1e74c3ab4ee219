//! # tgstash-sync
//!
//! Incremental mirroring of Telegram chats and their media to local disk.
//!
//! ## Features
//! - Chat registry reconciled against the remote chat list, with
//!   provenance-scoped updates (remote metadata never clobbers local progress)
//! - Duplicate record collapse
//! - Paged history walk down to a per-chat cursor, stopping at the
//!   "chat created" marker
//! - Crash-safe attachment download through a per-chat `cache/` directory
//! - Polling or live-update sync modes, with reconnect supervision
//! - Credentials pulled from the settings store as login needs them
//!
//! The messaging platform is reached through the [`Remote`] trait. Enable the
//! `telegram` feature for an implementation on top of `layer-client`.

#![deny(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod fetcher;
pub mod media;
pub mod model;
pub mod registry;
pub mod remote;
pub mod retry;
pub mod settings;
pub mod store;
pub mod worker;

#[cfg(feature = "telegram")]
pub mod telegram;

pub use config::Config;
pub use dispatcher::{Dispatched, LiveDispatcher};
pub use errors::{ChatFailure, MediaError, ReconcileError, RemoteError, RpcError, StoreError, SyncError};
pub use fetcher::{ChatProgress, FetchReport, HistoryFetcher, PAGE_SIZE};
pub use media::{Materialized, Materializer};
pub use model::{ChatDescriptor, ChatKind, ChatRecord, MessageId, Peer, Provenance};
pub use registry::{ChatRegistry, CommandError, ReconcileSummary, RefreshError};
pub use remote::{
    Account, Attachment, AttachmentKind, CredentialSource, EventStream, FileHandle, FileType, MessageBody, Remote,
    RemoteEvent, RemoteMessage,
};
pub use retry::{Backoff, NoRetries, RetryContext, RetryPolicy};
pub use settings::{Settings, SettingsCredentials, SyncMode};
pub use store::{ChatFilter, Store};
pub use worker::{State, SyncWorker};
