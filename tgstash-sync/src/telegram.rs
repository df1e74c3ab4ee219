//! [`Remote`] implementation on top of `layer-client`.
//!
//! Login follows the usual user flow: API credentials, phone number, the
//! code Telegram sends, then the 2FA password if the account has one. Every
//! value is pulled from the [`CredentialSource`] at the moment it is needed,
//! so an operator can fill them in while the worker waits.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use layer_client::{BinaryFileBackend, Client, Config, InvocationError, SignInError, Update, UpdateStream};
use layer_tl_types as tl;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};

use crate::errors::{RemoteError, RpcError};
use crate::model::{ChatDescriptor, ChatKind, MessageId, Peer};
use crate::remote::{
    Account, Attachment, AttachmentKind, CredentialSource, EventStream, FileHandle, FileType, MessageBody, Remote,
    RemoteEvent, RemoteMessage,
};
use crate::settings::keys;

// ─── Update constructor IDs ───────────────────────────────────────────────────

const ID_UPDATE_CHANNEL: u32 = 0x635b4c09;
const ID_UPDATE_CHAT:    u32 = 0xf89a6a4e;

/// Bytes inspected to tell a photo's real format.
const SNIFF_LEN: usize = 16;

impl From<InvocationError> for RemoteError {
    fn from(e: InvocationError) -> Self {
        match e {
            InvocationError::Rpc(r)         => Self::Rpc(RpcError { code: r.code, name: r.name, value: r.value }),
            InvocationError::Io(e)          => Self::Io(e),
            InvocationError::Dropped        => Self::Disconnected,
            InvocationError::Deserialize(s) => Self::Protocol(s),
            InvocationError::Migrate(dc)    => Self::Protocol(format!("unhandled migration to DC{dc}")),
            other                           => Self::Protocol(other.to_string()),
        }
    }
}

struct Session {
    client: Client,
    config: Config,
}

// ─── TelegramRemote ───────────────────────────────────────────────────────────

/// A Telegram user account, persisted in a binary session file.
pub struct TelegramRemote {
    session_path: PathBuf,
    session:      Mutex<Option<Session>>,
    connected:    Arc<AtomicBool>,
}

impl TelegramRemote {
    pub fn new(session_path: impl Into<PathBuf>) -> Self {
        Self {
            session_path: session_path.into(),
            session:      Mutex::new(None),
            connected:    Arc::new(AtomicBool::new(false)),
        }
    }

    async fn client(&self) -> Result<Client, RemoteError> {
        match self.session.lock().await.as_ref() {
            Some(s) => Ok(s.client.clone()),
            None => Err(RemoteError::Unauthorized("not logged in".into())),
        }
    }

    fn check<T>(&self, result: Result<T, InvocationError>) -> Result<T, RemoteError> {
        result.map_err(|e| self.fail(e))
    }

    /// Convert a client error, noting whether it took the connection down.
    fn fail(&self, error: InvocationError) -> RemoteError {
        let error = RemoteError::from(error);
        if error.is_disconnect() {
            self.connected.store(false, Ordering::SeqCst);
        }
        error
    }

    async fn authorize(&self, client: &Client, credentials: &dyn CredentialSource) -> Result<(), RemoteError> {
        if self.check(client.is_authorized().await)? {
            return Ok(());
        }

        let phone = credentials.credential(keys::PHONE_NUMBER).await?;
        let token = self.check(client.request_login_code(&phone).await)?;
        tracing::info!("[tgstash] Login code requested, waiting for {:?}", keys::VERIFICATION_CODE);
        let code = credentials.credential(keys::VERIFICATION_CODE).await?;

        match client.sign_in(&token, &code).await {
            Ok(_) => {}
            Err(SignInError::PasswordRequired(password_token)) => {
                if let Some(hint) = password_token.hint() {
                    tracing::info!("[tgstash] 2FA enabled, password hint: {hint}");
                }
                let password = credentials.credential(keys::PASSWORD).await?;
                self.check(client.check_password(*password_token, password.trim()).await)?;
            }
            Err(SignInError::InvalidCode) => {
                return Err(RemoteError::Unauthorized("verification code rejected".into()));
            }
            Err(SignInError::SignUpRequired) => {
                return Err(RemoteError::Unauthorized(
                    "phone number has no account, sign up with an official app first".into(),
                ));
            }
            Err(SignInError::Other(e)) => return Err(self.fail(e)),
        }

        self.check(client.save_session().await)?;
        Ok(())
    }
}

#[async_trait]
impl Remote for TelegramRemote {
    async fn login(&self, credentials: &dyn CredentialSource) -> Result<Account, RemoteError> {
        let raw_id = credentials.credential(keys::API_ID).await?;
        let api_id = raw_id
            .trim()
            .parse::<i32>()
            .map_err(|_| RemoteError::Unauthorized(format!("{} {raw_id:?} is not a number", keys::API_ID)))?;
        let api_hash = credentials.credential(keys::API_HASH).await?;

        let config = Config {
            api_id,
            api_hash: api_hash.trim().to_string(),
            session_backend: Arc::new(BinaryFileBackend::new(&self.session_path)),
            ..Default::default()
        };
        let (client, _shutdown) = self.check(Client::connect(config.clone()).await)?;
        self.connected.store(true, Ordering::SeqCst);

        self.authorize(&client, credentials).await?;
        let me = self.check(client.get_me().await)?;
        let name = format!(
            "{} {}",
            me.first_name.as_deref().unwrap_or_default(),
            me.last_name.as_deref().unwrap_or_default()
        );

        *self.session.lock().await = Some(Session { client, config });
        Ok(Account { user_id: me.id, username: me.username.clone(), name: name.trim().to_string() })
    }

    async fn list_chats(&self) -> Result<Vec<ChatDescriptor>, RemoteError> {
        let client = self.client().await?;
        let req = tl::functions::messages::GetAllChats { except_ids: vec![] };
        let chats = match self.check(client.invoke(&req).await)? {
            tl::enums::messages::Chats::Chats(c) => c.chats,
            tl::enums::messages::Chats::Slice(c) => c.chats,
        };
        Ok(chats.iter().filter_map(describe_chat).collect())
    }

    async fn fetch_history(
        &self,
        peer:       &Peer,
        min_id:     MessageId,
        add_offset: i32,
        limit:      i32,
    ) -> Result<Vec<RemoteMessage>, RemoteError> {
        let client = self.client().await?;
        let req = tl::functions::messages::GetHistory {
            peer: input_peer(peer),
            offset_id: 0,
            offset_date: 0,
            add_offset,
            limit,
            max_id: 0,
            min_id,
            hash: 0,
        };
        let messages = match self.check(client.invoke(&req).await)? {
            tl::enums::messages::Messages::Messages(m)        => m.messages,
            tl::enums::messages::Messages::Slice(m)           => m.messages,
            tl::enums::messages::Messages::ChannelMessages(m) => m.messages,
            tl::enums::messages::Messages::NotModified(_)     => vec![],
        };
        Ok(messages.iter().map(convert_message).collect())
    }

    async fn download(
        &self,
        attachment: &Attachment,
        sink:       &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<FileType, RemoteError> {
        let client = self.client().await?;
        let mut chunks = client.iter_download(file_location(attachment));
        let mut head = Vec::with_capacity(SNIFF_LEN);
        let mut total = 0usize;

        while let Some(chunk) = self.check(chunks.next().await)? {
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }
            total += chunk.len();
            sink.write_all(&chunk).await?;
        }

        if total == 0 {
            return Ok(FileType::Partial);
        }
        Ok(FileType::sniff(&head))
    }

    async fn subscribe(&self) -> Result<EventStream, RemoteError> {
        let client = self.client().await?;
        let updates = client.stream_updates();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_updates(updates, tx, self.connected.clone()));
        Ok(EventStream::new(rx))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), RemoteError> {
        let mut session = self.session.lock().await;
        let Some(current) = session.as_mut() else {
            return Err(RemoteError::Unauthorized("not logged in".into()));
        };
        tracing::info!("[tgstash] Reconnecting with saved session …");
        let (client, _shutdown) = self.check(Client::connect(current.config.clone()).await)?;
        if !self.check(client.is_authorized().await)? {
            return Err(RemoteError::Unauthorized("saved session is no longer authorized".into()));
        }
        current.client = client;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

async fn forward_updates(mut updates: UpdateStream, tx: mpsc::UnboundedSender<RemoteEvent>, connected: Arc<AtomicBool>) {
    while let Some(update) = updates.next().await {
        let event = match update {
            Update::NewMessage(msg) => RemoteEvent::NewMessage(convert_message(&msg.raw)),
            Update::Raw(raw) if matches!(raw.constructor_id, ID_UPDATE_CHANNEL | ID_UPDATE_CHAT) => {
                RemoteEvent::ChatChanged { remote_id: None }
            }
            _ => continue,
        };
        if tx.send(event).is_err() {
            return;
        }
    }
    tracing::warn!("[tgstash] Update stream ended");
    connected.store(false, Ordering::SeqCst);
}

// ─── TL mapping ───────────────────────────────────────────────────────────────

fn describe_chat(chat: &tl::enums::Chat) -> Option<ChatDescriptor> {
    match chat {
        tl::enums::Chat::Chat(c) if !c.deactivated => {
            Some(ChatDescriptor::new(c.id, 0, c.title.clone(), ChatKind::SmallGroup))
        }
        tl::enums::Chat::Channel(c) => {
            let kind = if c.megagroup { ChatKind::Group } else { ChatKind::Channel };
            Some(
                ChatDescriptor::new(c.id, c.access_hash.unwrap_or(0), c.title.clone(), kind)
                    .with_username(c.username.clone()),
            )
        }
        _ => None,
    }
}

fn input_peer(peer: &Peer) -> tl::enums::InputPeer {
    match *peer {
        Peer::SelfChat => tl::enums::InputPeer::PeerSelf,
        Peer::Chat { chat_id } => tl::enums::InputPeer::Chat(tl::types::InputPeerChat { chat_id }),
        Peer::Channel { channel_id, access_hash } => {
            tl::enums::InputPeer::Channel(tl::types::InputPeerChannel { channel_id, access_hash })
        }
    }
}

fn peer_remote_id(peer: &tl::enums::Peer) -> i64 {
    match peer {
        tl::enums::Peer::User(u)    => u.user_id,
        tl::enums::Peer::Chat(c)    => c.chat_id,
        tl::enums::Peer::Channel(c) => c.channel_id,
    }
}

fn convert_message(raw: &tl::enums::Message) -> RemoteMessage {
    match raw {
        tl::enums::Message::Message(m) => RemoteMessage {
            id:      m.id,
            peer_id: peer_remote_id(&m.peer_id),
            body:    MessageBody::Regular { attachment: m.media.as_ref().and_then(convert_media) },
        },
        tl::enums::Message::Service(m) => {
            let created = matches!(
                m.action,
                tl::enums::MessageAction::ChatCreate(_) | tl::enums::MessageAction::ChannelCreate(_)
            );
            RemoteMessage {
                id:      m.id,
                peer_id: peer_remote_id(&m.peer_id),
                body:    if created { MessageBody::Created } else { MessageBody::Service },
            }
        }
        // Empty slots still take up room in a page.
        tl::enums::Message::Empty(m) => RemoteMessage { id: m.id, peer_id: 0, body: MessageBody::Service },
    }
}

fn convert_media(media: &tl::enums::MessageMedia) -> Option<Attachment> {
    match media {
        tl::enums::MessageMedia::Photo(mp) => {
            let Some(tl::enums::Photo::Photo(p)) = &mp.photo else { return None };
            let thumb_size = p
                .sizes
                .iter()
                .filter_map(|s| match s {
                    tl::enums::PhotoSize::PhotoSize(ps) => Some(ps.r#type.clone()),
                    _ => None,
                })
                .last()
                .unwrap_or_else(|| "s".to_string());
            Some(Attachment {
                id:     p.id,
                date:   timestamp(p.date),
                kind:   AttachmentKind::Photo,
                handle: FileHandle {
                    id:             p.id,
                    access_hash:    p.access_hash,
                    file_reference: p.file_reference.clone(),
                    thumb_size,
                },
            })
        }
        tl::enums::MessageMedia::Document(md) => {
            let Some(tl::enums::Document::Document(d)) = &md.document else { return None };
            let file_name = d.attributes.iter().find_map(|a| match a {
                tl::enums::DocumentAttribute::Filename(f) => Some(f.file_name.clone()),
                _ => None,
            });
            Some(Attachment {
                id:     d.id,
                date:   timestamp(d.date),
                kind:   AttachmentKind::Document { file_name, mime_type: d.mime_type.clone() },
                handle: FileHandle {
                    id:             d.id,
                    access_hash:    d.access_hash,
                    file_reference: d.file_reference.clone(),
                    thumb_size:     String::new(),
                },
            })
        }
        _ => None,
    }
}

fn file_location(attachment: &Attachment) -> tl::enums::InputFileLocation {
    let h = &attachment.handle;
    match attachment.kind {
        AttachmentKind::Photo => tl::enums::InputFileLocation::InputPhotoFileLocation(tl::types::InputPhotoFileLocation {
            id:             h.id,
            access_hash:    h.access_hash,
            file_reference: h.file_reference.clone(),
            thumb_size:     h.thumb_size.clone(),
        }),
        AttachmentKind::Document { .. } => {
            tl::enums::InputFileLocation::InputDocumentFileLocation(tl::types::InputDocumentFileLocation {
                id:             h.id,
                access_hash:    h.access_hash,
                file_reference: h.file_reference.clone(),
                thumb_size:     String::new(),
            })
        }
    }
}

fn timestamp(unix: i32) -> DateTime<Utc> {
    DateTime::from_timestamp(i64::from(unix), 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_errors_map_to_remote_errors() {
        let rpc = layer_client::RpcError::from_telegram(420, "FLOOD_WAIT_12");
        let e = RemoteError::from(InvocationError::Rpc(rpc));
        assert_eq!(e.flood_wait_seconds(), Some(12));
        assert!(RemoteError::from(InvocationError::Dropped).is_disconnect());
        assert!(!RemoteError::from(InvocationError::Deserialize("x".into())).is_disconnect());
    }

    #[test]
    fn peers_map_to_input_peers() {
        assert!(matches!(input_peer(&Peer::SelfChat), tl::enums::InputPeer::PeerSelf));
        match input_peer(&Peer::Channel { channel_id: 5, access_hash: 9 }) {
            tl::enums::InputPeer::Channel(c) => assert_eq!((c.channel_id, c.access_hash), (5, 9)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
