//! Chat records and the two provenance-scoped update shapes.
//!
//! Every mutable field of a [`ChatRecord`] belongs to exactly one update
//! source. [`RemoteFields`] carries what the messaging platform owns,
//! [`LocalFields`] what fetch progress and the operator own. A reconciliation
//! call only ever builds one of the two.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Message identifier within one chat.
pub type MessageId = i32;

// ─── ChatKind ─────────────────────────────────────────────────────────────────

/// Which addressing form the remote platform expects for a chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "snake_case"))]
pub enum ChatKind {
    /// The account's own "Saved Messages".
    #[cfg_attr(feature = "serde", serde(rename = "self"))]
    SelfChat,
    /// A basic group, addressed by id alone.
    SmallGroup,
    /// A supergroup, addressed like a channel.
    Group,
    /// A broadcast channel.
    Channel,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SelfChat   => "self",
            Self::SmallGroup => "small_group",
            Self::Group      => "group",
            Self::Channel    => "channel",
        }
    }

    /// Build the addressing token for a chat of this kind.
    pub fn peer(self, remote_id: i64, access_hash: i64) -> Peer {
        match self {
            Self::SelfChat              => Peer::SelfChat,
            Self::SmallGroup            => Peer::Chat { chat_id: remote_id },
            Self::Group | Self::Channel => Peer::Channel { channel_id: remote_id, access_hash },
        }
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored kind string that matches none of the known kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChatKind(pub String);

impl fmt::Display for UnknownChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown chat kind {:?}", self.0)
    }
}

impl std::error::Error for UnknownChatKind {}

impl FromStr for ChatKind {
    type Err = UnknownChatKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self"        => Ok(Self::SelfChat),
            "small_group" => Ok(Self::SmallGroup),
            "group"       => Ok(Self::Group),
            "channel"     => Ok(Self::Channel),
            other         => Err(UnknownChatKind(other.to_string())),
        }
    }
}

// ─── Peer ─────────────────────────────────────────────────────────────────────

/// Addressing token handed to the remote platform when fetching history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Peer {
    SelfChat,
    Chat { chat_id: i64 },
    Channel { channel_id: i64, access_hash: i64 },
}

// ─── ChatDescriptor ───────────────────────────────────────────────────────────

/// Everything known about a chat except its local id.
///
/// Input to [`crate::ChatRegistry::reconcile`]; when no record exists yet the
/// descriptor is inserted as-is.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChatDescriptor {
    pub remote_id:          i64,
    pub access_hash:        i64,
    pub display_name:       String,
    pub username:           Option<String>,
    pub storage_name:       Option<String>,
    pub kind:               ChatKind,
    pub last_downloaded_id: MessageId,
    pub enabled:            bool,
}

impl ChatDescriptor {
    /// A chat seen on the remote for the first time: cursor 0, disabled.
    pub fn new(remote_id: i64, access_hash: i64, display_name: impl Into<String>, kind: ChatKind) -> Self {
        Self {
            remote_id,
            access_hash,
            display_name:       display_name.into(),
            username:           None,
            storage_name:       None,
            kind,
            last_downloaded_id: 0,
            enabled:            false,
        }
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }
}

// ─── ChatRecord ───────────────────────────────────────────────────────────────

/// A persisted chat.
///
/// `kind` is `None` when the stored kind string is not one of the known
/// kinds; such chats are never fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChatRecord {
    pub local_id:           i64,
    pub remote_id:          i64,
    pub access_hash:        i64,
    pub display_name:       String,
    pub username:           Option<String>,
    pub storage_name:       Option<String>,
    pub kind:               Option<ChatKind>,
    pub last_downloaded_id: MessageId,
    pub enabled:            bool,
}

impl ChatRecord {
    /// The addressing token for this chat, or `None` if its kind is unknown.
    pub fn peer(&self) -> Option<Peer> {
        self.kind.map(|k| k.peer(self.remote_id, self.access_hash))
    }

    /// Folder name under the download root: the storage override if set,
    /// otherwise the display name.
    pub fn folder_name(&self) -> &str {
        match self.storage_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.display_name,
        }
    }

    pub fn remote_fields(&self) -> Option<RemoteFields> {
        Some(RemoteFields {
            display_name: self.display_name.clone(),
            username:     self.username.clone(),
            kind:         self.kind?,
            access_hash:  self.access_hash,
        })
    }

    pub fn local_fields(&self) -> LocalFields {
        LocalFields {
            last_downloaded_id: self.last_downloaded_id,
            enabled:            self.enabled,
        }
    }

    /// Descriptor carrying this record's current state plus a new cursor.
    pub fn with_cursor(&self, last_downloaded_id: MessageId) -> Option<ChatDescriptor> {
        Some(ChatDescriptor {
            remote_id:    self.remote_id,
            access_hash:  self.access_hash,
            display_name: self.display_name.clone(),
            username:     self.username.clone(),
            storage_name: self.storage_name.clone(),
            kind:         self.kind?,
            last_downloaded_id,
            enabled:      self.enabled,
        })
    }
}

// ─── Provenance-scoped updates ────────────────────────────────────────────────

/// Which update source a reconciliation call speaks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provenance {
    /// Fetch progress and operator toggles.
    Local,
    /// Metadata from the messaging platform.
    Remote,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local  => "local",
            Self::Remote => "remote",
        })
    }
}

/// Fields only the messaging platform may change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFields {
    pub display_name: String,
    pub username:     Option<String>,
    pub kind:         ChatKind,
    pub access_hash:  i64,
}

impl From<&ChatDescriptor> for RemoteFields {
    fn from(d: &ChatDescriptor) -> Self {
        Self {
            display_name: d.display_name.clone(),
            username:     d.username.clone(),
            kind:         d.kind,
            access_hash:  d.access_hash,
        }
    }
}

/// Fields only local progress tracking may change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalFields {
    pub last_downloaded_id: MessageId,
    pub enabled:            bool,
}

impl From<&ChatDescriptor> for LocalFields {
    fn from(d: &ChatDescriptor) -> Self {
        Self { last_downloaded_id: d.last_downloaded_id, enabled: d.enabled }
    }
}
