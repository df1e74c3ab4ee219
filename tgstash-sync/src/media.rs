//! Media materializer: download one attachment into its permanent place.
//!
//! Layout under the download root:
//!
//! ```text
//! <root>/<chat folder>/<final name>
//! <root>/<chat folder>/cache/<in-flight download>
//! ```
//!
//! A final file that already exists is never downloaded again, which makes
//! [`Materializer::materialize`] safe to call repeatedly and across restarts.
//! Bodies land in `cache/` first and are moved into place only once complete.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::MediaError;
use crate::model::ChatRecord;
use crate::remote::{Attachment, AttachmentKind, Remote};

/// Subdirectory holding in-flight downloads.
pub const CACHE_DIR: &str = "cache";

/// Extension used when a document's content type maps to none.
const FALLBACK_EXTENSION: &str = "bin";

/// Result of one [`Materializer::materialize`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Materialized {
    /// Downloaded and promoted to this path.
    Downloaded(PathBuf),
    /// The final file was already there.
    AlreadyPresent(PathBuf),
    /// Download or promotion failed; the error was logged.
    Failed,
}

/// Downloads attachments for the chats being mirrored.
#[derive(Clone)]
pub struct Materializer {
    remote: Arc<dyn Remote>,
    root:   PathBuf,
}

impl Materializer {
    pub fn new(remote: Arc<dyn Remote>, root: impl Into<PathBuf>) -> Self {
        Self { remote, root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the finished files of `chat`.
    pub fn chat_dir(&self, chat: &ChatRecord) -> PathBuf {
        let folder = sanitize(chat.folder_name());
        let folder = if folder.is_empty() { chat.remote_id.to_string() } else { folder };
        self.root.join(folder)
    }

    /// Make sure `attachment` exists under the chat's folder.
    ///
    /// Never fails: errors are logged and reported as [`Materialized::Failed`]
    /// so one broken attachment cannot stop the rest of a pass.
    pub async fn materialize(&self, attachment: &Attachment, chat: &ChatRecord) -> Materialized {
        match self.try_materialize(attachment, chat).await {
            Ok(done) => done,
            Err(e) => {
                tracing::error!(
                    "[tgstash] Attachment {} in {:?} skipped: {e}",
                    attachment.id, chat.display_name
                );
                Materialized::Failed
            }
        }
    }

    async fn try_materialize(&self, attachment: &Attachment, chat: &ChatRecord) -> Result<Materialized, MediaError> {
        let dir = self.chat_dir(chat);
        let filename = final_name(attachment);
        let target = dir.join(&filename);
        if fs::try_exists(&target).await? {
            tracing::debug!("[tgstash] {} already present", target.display());
            return Ok(Materialized::AlreadyPresent(target));
        }

        let cache_dir = dir.join(CACHE_DIR);
        fs::create_dir_all(&cache_dir).await?;
        let mut staged = cache_dir.join(&filename);

        match attachment.kind {
            AttachmentKind::Photo => tracing::info!("[tgstash] Downloading photo {}", target.display()),
            AttachmentKind::Document { .. } => tracing::info!("[tgstash] Downloading file {}", target.display()),
        }

        let file_type = {
            let mut file = fs::File::create(&staged).await?;
            let file_type = self.remote.download(attachment, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            file_type
        };

        // The transfer only tells us what a photo really is once it is done;
        // the cached copy is renamed to carry that extension.
        if matches!(attachment.kind, AttachmentKind::Photo) {
            if let Some(ext) = file_type.extension() {
                let typed = cache_dir.join(format!("{filename}.{ext}"));
                fs::rename(&staged, &typed).await?;
                staged = typed;
            }
        }

        promote(&staged, &target).await?;
        tracing::debug!("[tgstash] Stored {}", target.display());
        Ok(Materialized::Downloaded(target))
    }
}

/// Move `from` onto `to` in one rename, replacing any stale file there.
async fn promote(from: &Path, to: &Path) -> Result<(), MediaError> {
    fs::rename(from, to).await?;
    Ok(())
}

/// Final filename of an attachment.
///
/// Photos: `<date>-<id>.jpg`. Documents: the sender's filename, otherwise
/// `<date>-<id>.<ext>` with the extension derived from the content type.
pub fn final_name(attachment: &Attachment) -> String {
    let date = attachment.date.format("%Y-%m-%d");
    match &attachment.kind {
        AttachmentKind::Photo => format!("{date}-{}.jpg", attachment.id),
        AttachmentKind::Document { file_name: Some(name), .. } if !sanitize(name).is_empty() => sanitize(name),
        AttachmentKind::Document { mime_type, .. } => {
            format!("{date}-{}.{}", attachment.id, extension_for(mime_type))
        }
    }
}

/// File extension for a content type, `bin` when unknown.
pub fn extension_for(mime_type: &str) -> &'static str {
    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    mime_guess::get_mime_extensions_str(essence)
        .and_then(|exts| preferred_extension(essence, exts))
        .unwrap_or(FALLBACK_EXTENSION)
}

fn preferred_extension(essence: &str, exts: &'static [&'static str]) -> Option<&'static str> {
    // mime_guess lists extensions alphabetically; a few common types would
    // otherwise come out as e.g. `jpe`.
    let preferred = match essence {
        "image/jpeg" => Some("jpg"),
        "video/mp4"  => Some("mp4"),
        "audio/mpeg" => Some("mp3"),
        "text/plain" => Some("txt"),
        _            => None,
    };
    preferred
        .and_then(|p| exts.iter().copied().find(|e| *e == p))
        .or_else(|| exts.first().copied())
}

/// Make a remote-supplied name safe to use as one path component.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    trimmed.to_string()
}
