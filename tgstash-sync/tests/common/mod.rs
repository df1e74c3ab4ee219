#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use tgstash_sync::settings::keys;
use tgstash_sync::{
    Account, Attachment, AttachmentKind, ChatDescriptor, ChatKind, ChatRegistry, CredentialSource, EventStream,
    FileHandle, FileType, MessageBody, MessageId, Peer, Provenance, Remote, RemoteError, RemoteEvent, RemoteMessage,
    Store,
};

pub const ME: i64 = 1000;

pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

/// One `fetch_history` call as the remote saw it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryRequest {
    pub remote_id:  i64,
    pub min_id:     MessageId,
    pub add_offset: i32,
    pub limit:      i32,
}

/// Scripted stand-in for the messaging platform.
///
/// History is served from per-chat page queues; once a queue runs dry every
/// further request gets an empty page.
pub struct MockRemote {
    account:        Account,
    chats:          Mutex<Vec<ChatDescriptor>>,
    pages:          Mutex<HashMap<i64, VecDeque<Vec<RemoteMessage>>>>,
    requests:       Mutex<Vec<HistoryRequest>>,
    failing_chats:  Mutex<HashSet<i64>>,
    disconnect_on:  Mutex<HashSet<i64>>,
    body:           Mutex<Vec<u8>>,
    fail_downloads: AtomicBool,
    downloads:      AtomicUsize,
    login_failures: AtomicUsize,
    logins:         AtomicUsize,
    reconnects:     AtomicUsize,
    connected:      AtomicBool,
    events:         Mutex<Option<mpsc::UnboundedSender<RemoteEvent>>>,
    history_hook:   Mutex<Option<HistoryHook>>,
}

type HistoryHook = Box<dyn Fn(i64) + Send>;

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            account:        Account { user_id: ME, username: Some("me".into()), name: "Test User".into() },
            chats:          Mutex::new(Vec::new()),
            pages:          Mutex::new(HashMap::new()),
            requests:       Mutex::new(Vec::new()),
            failing_chats:  Mutex::new(HashSet::new()),
            disconnect_on:  Mutex::new(HashSet::new()),
            body:           Mutex::new(JPEG.to_vec()),
            fail_downloads: AtomicBool::new(false),
            downloads:      AtomicUsize::new(0),
            login_failures: AtomicUsize::new(0),
            logins:         AtomicUsize::new(0),
            reconnects:     AtomicUsize::new(0),
            connected:      AtomicBool::new(true),
            events:         Mutex::new(None),
            history_hook:   Mutex::new(None),
        })
    }

    pub fn account(&self) -> Account {
        self.account.clone()
    }

    pub fn set_chats(&self, chats: Vec<ChatDescriptor>) {
        *self.chats.lock().unwrap() = chats;
    }

    pub fn push_page(&self, remote_id: i64, page: Vec<RemoteMessage>) {
        self.pages.lock().unwrap().entry(remote_id).or_default().push_back(page);
    }

    pub fn fail_history(&self, remote_id: i64) {
        self.failing_chats.lock().unwrap().insert(remote_id);
    }

    pub fn disconnect_history(&self, remote_id: i64) {
        self.disconnect_on.lock().unwrap().insert(remote_id);
    }

    /// Run `hook` with the chat's remote id on every history request, as if
    /// someone else acted while the page was in flight.
    pub fn on_history(&self, hook: impl Fn(i64) + Send + 'static) {
        *self.history_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn set_body(&self, body: &[u8]) {
        *self.body.lock().unwrap() = body.to_vec();
    }

    pub fn fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_logins(&self, times: usize) {
        self.login_failures.store(times, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<HistoryRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, remote_id: i64) -> Vec<HistoryRequest> {
        self.requests().into_iter().filter(|r| r.remote_id == remote_id).collect()
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn subscribed(&self) -> bool {
        self.events.lock().unwrap().is_some()
    }

    /// Deliver a push event to the current subscriber. Returns `false` if
    /// nobody listens.
    pub fn push_event(&self, event: RemoteEvent) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Drop the push channel, as a lost connection would.
    pub fn close_events(&self) {
        self.events.lock().unwrap().take();
    }

    fn peer_remote_id(&self, peer: &Peer) -> i64 {
        match *peer {
            Peer::SelfChat => self.account.user_id,
            Peer::Chat { chat_id } => chat_id,
            Peer::Channel { channel_id, .. } => channel_id,
        }
    }
}

#[async_trait]
impl Remote for MockRemote {
    async fn login(&self, credentials: &dyn CredentialSource) -> Result<Account, RemoteError> {
        credentials.credential(keys::API_ID).await?;
        credentials.credential(keys::API_HASH).await?;
        self.logins.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .login_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(RemoteError::Disconnected);
        }
        Ok(self.account.clone())
    }

    async fn list_chats(&self) -> Result<Vec<ChatDescriptor>, RemoteError> {
        Ok(self.chats.lock().unwrap().clone())
    }

    async fn fetch_history(
        &self,
        peer:       &Peer,
        min_id:     MessageId,
        add_offset: i32,
        limit:      i32,
    ) -> Result<Vec<RemoteMessage>, RemoteError> {
        let remote_id = self.peer_remote_id(peer);
        self.requests.lock().unwrap().push(HistoryRequest { remote_id, min_id, add_offset, limit });
        if let Some(hook) = self.history_hook.lock().unwrap().as_ref() {
            hook(remote_id);
        }
        if self.disconnect_on.lock().unwrap().contains(&remote_id) {
            return Err(RemoteError::Disconnected);
        }
        if self.failing_chats.lock().unwrap().contains(&remote_id) {
            return Err(RemoteError::Protocol("CHANNEL_PRIVATE".into()));
        }
        let page = self.pages.lock().unwrap().get_mut(&remote_id).and_then(VecDeque::pop_front);
        Ok(page.unwrap_or_default())
    }

    async fn download(
        &self,
        _attachment: &Attachment,
        sink:        &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<FileType, RemoteError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(RemoteError::Protocol("FILE_REFERENCE_EXPIRED".into()));
        }
        let body = self.body.lock().unwrap().clone();
        sink.write_all(&body).await?;
        Ok(FileType::sniff(&body))
    }

    async fn subscribe(&self) -> Result<EventStream, RemoteError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        Ok(EventStream::new(rx))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), RemoteError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Fixtures ─────────────────────────────────────────────────────────────────

pub fn store(dir: &Path) -> Store {
    let store = Store::new(dir.join("tgstash.db"));
    store.setup().unwrap();
    store
}

pub fn channel(remote_id: i64, name: &str) -> ChatDescriptor {
    ChatDescriptor::new(remote_id, remote_id * 10, name, ChatKind::Channel)
}

/// Store `chat` and mark it enabled with the given cursor.
pub fn enabled(registry: &ChatRegistry, chat: &ChatDescriptor, cursor: MessageId) {
    let mut chat = chat.clone();
    chat.enabled = true;
    chat.last_downloaded_id = cursor;
    registry.reconcile(&[chat.clone()], Provenance::Remote).unwrap();
    registry.reconcile(&[chat], Provenance::Local).unwrap();
}

pub fn text(id: MessageId, peer_id: i64) -> RemoteMessage {
    RemoteMessage { id, peer_id, body: MessageBody::Regular { attachment: None } }
}

pub fn created(id: MessageId, peer_id: i64) -> RemoteMessage {
    RemoteMessage { id, peer_id, body: MessageBody::Created }
}

pub fn photo(id: i64) -> Attachment {
    Attachment {
        id,
        date:   Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
        kind:   AttachmentKind::Photo,
        handle: FileHandle { id, ..FileHandle::default() },
    }
}

pub fn document(id: i64, file_name: Option<&str>, mime_type: &str) -> Attachment {
    Attachment {
        kind: AttachmentKind::Document {
            file_name: file_name.map(str::to_string),
            mime_type: mime_type.to_string(),
        },
        ..photo(id)
    }
}

pub fn with_attachment(id: MessageId, peer_id: i64, attachment: Attachment) -> RemoteMessage {
    RemoteMessage { id, peer_id, body: MessageBody::Regular { attachment: Some(attachment) } }
}

/// Newest-first page of plain messages `from..=to`.
pub fn page(peer_id: i64, from: MessageId, to: MessageId) -> Vec<RemoteMessage> {
    (from..=to).rev().map(|id| text(id, peer_id)).collect()
}
