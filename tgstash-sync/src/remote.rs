//! The remote messaging platform as the sync engine sees it.
//!
//! Wire protocol and authentication live behind [`Remote`]. The engine only
//! needs to log in, list chats, page through history, download attachment
//! bodies and listen for push events. The `telegram` feature provides an
//! implementation backed by `layer-client`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use crate::errors::RemoteError;
use crate::model::{ChatDescriptor, MessageId, Peer};

// ─── Account ──────────────────────────────────────────────────────────────────

/// The logged-in account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub user_id:  i64,
    pub username: Option<String>,
    pub name:     String,
}

impl Account {
    /// Username if the account has one, otherwise the full name.
    pub fn display(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.name)
    }
}

// ─── Attachments ──────────────────────────────────────────────────────────────

/// Opaque handle the remote needs to locate an attachment body.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FileHandle {
    pub id:             i64,
    pub access_hash:    i64,
    pub file_reference: Vec<u8>,
    /// Size variant to fetch (photos only).
    pub thumb_size:     String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttachmentKind {
    Photo,
    Document {
        /// Filename declared by the sender, if any.
        file_name: Option<String>,
        mime_type: String,
    },
}

/// A photo or generic document attached to a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub id:     i64,
    pub date:   DateTime<Utc>,
    pub kind:   AttachmentKind,
    pub handle: FileHandle,
}

/// Concrete file type reported once a transfer completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    Unknown,
    /// The transfer ended before the whole body arrived.
    Partial,
    Jpeg,
    Gif,
    Png,
    Pdf,
    Mp3,
    Mov,
    Mp4,
    Webp,
}

impl FileType {
    /// Extension to give the file, or `None` when the type is not concrete.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Self::Unknown | Self::Partial => None,
            Self::Jpeg => Some("jpg"),
            Self::Gif  => Some("gif"),
            Self::Png  => Some("png"),
            Self::Pdf  => Some("pdf"),
            Self::Mp3  => Some("mp3"),
            Self::Mov  => Some("mov"),
            Self::Mp4  => Some("mp4"),
            Self::Webp => Some("webp"),
        }
    }

    /// Guess the type from the first bytes of a body.
    pub fn sniff(head: &[u8]) -> Self {
        match head {
            [0xFF, 0xD8, 0xFF, ..]                             => Self::Jpeg,
            [0x89, b'P', b'N', b'G', ..]                       => Self::Png,
            [b'G', b'I', b'F', b'8', ..]                       => Self::Gif,
            [b'%', b'P', b'D', b'F', ..]                       => Self::Pdf,
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Self::Webp,
            [_, _, _, _, b'f', b't', b'y', b'p', b'q', b't', ..] => Self::Mov,
            [_, _, _, _, b'f', b't', b'y', b'p', ..]           => Self::Mp4,
            [b'I', b'D', b'3', ..] | [0xFF, 0xFB, ..]          => Self::Mp3,
            _                                                  => Self::Unknown,
        }
    }
}

// ─── Messages ─────────────────────────────────────────────────────────────────

/// One history entry, as far as mirroring is concerned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    /// A regular message, with its attachment if it has a photo or document.
    Regular { attachment: Option<Attachment> },
    /// The synthetic "chat created" / "channel created" service message.
    /// Nothing older than it exists.
    Created,
    /// Any other service message.
    Service,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id:      MessageId,
    /// Remote id of the chat the message belongs to.
    pub peer_id: i64,
    pub body:    MessageBody,
}

impl RemoteMessage {
    pub fn attachment(&self) -> Option<&Attachment> {
        match &self.body {
            MessageBody::Regular { attachment } => attachment.as_ref(),
            _ => None,
        }
    }

    pub fn is_creation_marker(&self) -> bool {
        matches!(self.body, MessageBody::Created)
    }
}

// ─── Push events ──────────────────────────────────────────────────────────────

/// An event pushed by the remote platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteEvent {
    NewMessage(RemoteMessage),
    /// Metadata of some chat or channel changed. The platform does not
    /// always say which one.
    ChatChanged { remote_id: Option<i64> },
}

/// Asynchronous stream of [`RemoteEvent`]s.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<RemoteEvent>,
}

impl EventStream {
    pub fn new(rx: mpsc::UnboundedReceiver<RemoteEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Returns `None` once the push channel closed.
    pub async fn next(&mut self) -> Option<RemoteEvent> {
        self.rx.recv().await
    }
}

// ─── Credentials ──────────────────────────────────────────────────────────────

/// Supplies login data on demand.
///
/// `credential` does not return until the value is non-empty; it fails only
/// with [`RemoteError::Cancelled`].
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credential(&self, key: &str) -> Result<String, RemoteError>;
}

// ─── Remote ───────────────────────────────────────────────────────────────────

/// Capability contract of the messaging platform.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Connect and authorize, pulling credentials as they are needed.
    async fn login(&self, credentials: &dyn CredentialSource) -> Result<Account, RemoteError>;

    /// Every group and channel the account is a member of.
    async fn list_chats(&self) -> Result<Vec<ChatDescriptor>, RemoteError>;

    /// Up to `limit` messages newer than `min_id`, skipping the `add_offset`
    /// newest ones. Delivered newest first.
    async fn fetch_history(
        &self,
        peer:       &Peer,
        min_id:     MessageId,
        add_offset: i32,
        limit:      i32,
    ) -> Result<Vec<RemoteMessage>, RemoteError>;

    /// Stream the full body of `attachment` into `sink`.
    async fn download(
        &self,
        attachment: &Attachment,
        sink:       &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<FileType, RemoteError>;

    /// Start receiving push events.
    async fn subscribe(&self) -> Result<EventStream, RemoteError>;

    fn is_connected(&self) -> bool;

    /// Re-establish a lost connection using the existing authorization.
    async fn reconnect(&self) -> Result<(), RemoteError>;
}
