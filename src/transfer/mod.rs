//! Media transfer engine.
//!
//! Downloads a resolved message's media to a job-scoped temporary path with
//! progress reporting, derives transfer metadata for video content, and
//! re-uploads through the most suitable transport: MTProto for videos
//! (streaming-playable attributes, large payloads), the Bot API document
//! path for everything else.

pub mod metadata;

use grammers_client::session::defs::{PeerAuth, PeerId, PeerRef};
use grammers_client::types::{Attribute, Media, Message};
use grammers_client::{Client, InputMessage};
use self::metadata::VideoMetadata;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Progress events: `(bytes_transferred, bytes_total)`.
pub type ProgressTx = UnboundedSender<(u64, u64)>;

/// Errors produced by the transfer engine.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Message missing or inaccessible despite prior positive verification
    /// (race with revoked access). Reported, not retried.
    #[error("message not found or no longer accessible")]
    NotFound,
    #[error("message carries no downloadable media")]
    NoMedia,
    #[error("download failed: {0}")]
    Download(String),
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("transfer cancelled")]
    Cancelled,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad media category driving the upload-path selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Photo,
    Sticker,
    Document,
}

impl MediaKind {
    #[must_use]
    pub const fn is_video(self) -> bool {
        matches!(self, Self::Video)
    }
}

/// A downloaded media file awaiting re-upload.
#[derive(Debug)]
pub struct LocalMedia {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub caption: String,
    pub total_bytes: u64,
}

/// Job-scoped temporary files. Tracked as soon as they are created so that
/// cleanup covers every failure point; cleanup is idempotent.
#[derive(Debug, Default)]
pub struct JobArtifacts {
    download: Option<PathBuf>,
    generated_thumb: Option<PathBuf>,
}

impl JobArtifacts {
    pub fn track_download(&mut self, path: PathBuf) {
        self.download = Some(path);
    }

    /// Tracks a generated thumbnail. User-supplied thumbnail overrides must
    /// never be tracked here; they are not ours to delete.
    pub fn track_thumbnail(&mut self, path: PathBuf) {
        self.generated_thumb = Some(path);
    }

    /// Removes every tracked file. Safe to call multiple times and on
    /// files that were never created.
    pub async fn cleanup(&mut self) {
        for path in [self.download.take(), self.generated_thumb.take()]
            .into_iter()
            .flatten()
        {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed temporary file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temporary file"),
            }
        }
    }
}

/// Addresses a user chat with ambient authority: for peers that have
/// messaged the bot, the platform resolves an access hash of zero
/// server-side.
#[must_use]
pub fn user_peer(user_id: i64) -> PeerRef {
    PeerRef {
        id: PeerId::user(user_id),
        auth: PeerAuth::default(),
    }
}

/// Fetches the target message through the given identity.
///
/// # Errors
///
/// [`TransferError::NotFound`] when the message is missing or inaccessible;
/// [`TransferError::Download`] on transport failure.
pub async fn fetch_message(
    client: &Client,
    peer: PeerRef,
    message_id: i32,
) -> Result<Message, TransferError> {
    let mut messages = client
        .get_messages_by_id(peer, &[message_id])
        .await
        .map_err(|e| TransferError::Download(e.to_string()))?;
    messages.pop().flatten().ok_or(TransferError::NotFound)
}

/// Streams the message's media to a temporary file under `dir`.
///
/// The path is registered in `artifacts` before the first byte arrives so
/// failure at any later point still gets cleaned up. Progress events are
/// emitted per chunk; UI throttling is the receiver's concern.
///
/// # Errors
///
/// [`TransferError::NoMedia`] when the message carries none,
/// [`TransferError::Cancelled`] when the token fires mid-stream, transport
/// and filesystem failures otherwise.
pub async fn download(
    client: &Client,
    message: &Message,
    dir: &Path,
    artifacts: &mut JobArtifacts,
    progress: &ProgressTx,
    cancel: &CancellationToken,
) -> Result<LocalMedia, TransferError> {
    let media = message.media().ok_or(TransferError::NoMedia)?;
    let (kind, ext) = media_kind(&media);
    let total = media_size(&media);

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.{}", Uuid::new_v4().as_simple(), ext));
    artifacts.track_download(path.clone());

    let mut file = tokio::fs::File::create(&path).await?;
    let mut stream = client.iter_download(&media);
    let mut done: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let chunk = stream
            .next()
            .await
            .map_err(|e| TransferError::Download(e.to_string()))?;
        let Some(chunk) = chunk else { break };
        file.write_all(&chunk).await?;
        done += chunk.len() as u64;
        let _ = progress.send((done, total.max(done)));
    }
    file.flush().await?;

    debug!(path = %path.display(), bytes = done, "download complete");
    Ok(LocalMedia {
        path,
        kind,
        caption: message.text().to_string(),
        total_bytes: done,
    })
}

/// Sends a video through the transport identity with streaming-playable
/// attributes and an optional thumbnail.
///
/// # Errors
///
/// [`TransferError::Upload`] with the transport's message text.
pub async fn send_video(
    client: &Client,
    peer: PeerRef,
    media: &LocalMedia,
    meta: &VideoMetadata,
    thumbnail: Option<&Path>,
    progress: &ProgressTx,
) -> Result<(), TransferError> {
    let size = tokio::fs::metadata(&media.path).await?.len();
    let name = file_name(&media.path);

    let file = tokio::fs::File::open(&media.path).await?;
    let mut reader = ProgressReader::new(file, size, progress.clone());
    let uploaded = client
        .upload_stream(&mut reader, size as usize, name)
        .await
        .map_err(|e| TransferError::Upload(e.to_string()))?;

    let mut message = InputMessage::new()
        .text(media.caption.clone())
        .file(uploaded)
        .attribute(Attribute::Video {
            round_message: false,
            supports_streaming: true,
            duration: std::time::Duration::from_secs_f64(meta.duration),
            w: meta.width,
            h: meta.height,
        });

    if let Some(thumb_path) = thumbnail {
        let thumb_size = tokio::fs::metadata(thumb_path).await?.len();
        let mut thumb_file = tokio::fs::File::open(thumb_path).await?;
        let thumb = client
            .upload_stream(&mut thumb_file, thumb_size as usize, file_name(thumb_path))
            .await
            .map_err(|e| TransferError::Upload(e.to_string()))?;
        message = message.thumbnail(thumb);
    }

    client
        .send_message(peer, message)
        .await
        .map_err(|e| TransferError::Upload(e.to_string()))?;
    Ok(())
}

/// Sends non-video media through the bot identity's document path with an
/// optional caption and thumbnail.
///
/// # Errors
///
/// [`TransferError::Upload`] with the underlying message text.
pub async fn send_document(
    bot: &Bot,
    chat: ChatId,
    media: &LocalMedia,
    thumbnail: Option<&Path>,
    progress: &ProgressTx,
) -> Result<(), TransferError> {
    let size = tokio::fs::metadata(&media.path).await?.len();
    let _ = progress.send((0, size));

    let mut request = bot.send_document(chat, InputFile::file(media.path.clone()));
    if !media.caption.is_empty() {
        request = request.caption(media.caption.clone());
    }
    if let Some(thumb_path) = thumbnail {
        request = request.thumbnail(InputFile::file(thumb_path.to_path_buf()));
    }
    request
        .await
        .map_err(|e| TransferError::Upload(e.to_string()))?;

    let _ = progress.send((size, size));
    Ok(())
}

/// Maps platform media to a broad kind and a file extension, preferring the
/// original file name's extension, then the MIME type.
fn media_kind(media: &Media) -> (MediaKind, String) {
    match media {
        Media::Photo(_) => (MediaKind::Photo, "jpg".to_string()),
        Media::Document(doc) => {
            let kind = if doc.duration().is_some() {
                if doc.resolution().is_some() {
                    MediaKind::Video
                } else {
                    MediaKind::Audio
                }
            } else {
                MediaKind::Document
            };

            let from_name = Some(doc.name())
                .filter(|n| !n.is_empty())
                .and_then(|n| Path::new(n).extension())
                .and_then(|e| e.to_str())
                .map(str::to_lowercase);
            let ext = from_name
                .or_else(|| doc.mime_type().map(mime_to_ext))
                .unwrap_or_else(|| "bin".to_string());

            (kind, ext)
        }
        Media::Sticker(_) => (MediaKind::Sticker, "webp".to_string()),
        _ => (MediaKind::Document, "bin".to_string()),
    }
}

fn media_size(media: &Media) -> u64 {
    match media {
        Media::Document(doc) => u64::try_from(doc.size()).unwrap_or(0),
        _ => 0,
    }
}

fn mime_to_ext(mime: &str) -> String {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "audio/ogg" | "audio/opus" => "ogg",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/m4a" => "m4a",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "text/plain" => "txt",
        other => other.split('/').next_back().unwrap_or("bin"),
    }
    .to_string()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file.bin")
        .to_string()
}

/// [`AsyncRead`] adapter that reports cumulative progress as the inner
/// reader is consumed; used for MTProto uploads, which stream from a
/// reader rather than exposing chunk callbacks.
pub struct ProgressReader<R> {
    inner: R,
    done: u64,
    total: u64,
    progress: ProgressTx,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, total: u64, progress: ProgressTx) -> Self {
        Self {
            inner,
            done: 0,
            total,
            progress,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let me = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut me.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let read = (buf.filled().len() - before) as u64;
            if read > 0 {
                me.done += read;
                let _ = me.progress.send((me.done, me.total));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_mime_to_ext() {
        assert_eq!(mime_to_ext("video/mp4"), "mp4");
        assert_eq!(mime_to_ext("image/jpeg"), "jpg");
        assert_eq!(mime_to_ext("application/x-unknown"), "x-unknown");
    }

    #[tokio::test]
    async fn test_progress_reader_reports_cumulative_bytes() {
        let payload = vec![7u8; 64 * 1024];
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut reader = ProgressReader::new(
            std::io::Cursor::new(payload.clone()),
            payload.len() as u64,
            tx,
        );

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.expect("read");
        assert_eq!(out, payload);

        let mut last = (0, 0);
        let mut previous_done = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(event.0 >= previous_done, "progress must be monotone");
            previous_done = event.0;
            last = event;
        }
        assert_eq!(last, (payload.len() as u64, payload.len() as u64));
    }

    #[tokio::test]
    async fn test_artifact_cleanup_is_unconditional_and_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let download = dir.path().join("payload.bin");
        let thumb = dir.path().join("thumb.jpg");
        tokio::fs::write(&download, b"data").await.expect("write");
        tokio::fs::write(&thumb, b"jpg").await.expect("write");

        let mut artifacts = JobArtifacts::default();
        artifacts.track_download(download.clone());
        artifacts.track_thumbnail(thumb.clone());

        artifacts.cleanup().await;
        assert!(!download.exists());
        assert!(!thumb.exists());

        // Second pass is a no-op, as is cleaning files that never existed.
        artifacts.cleanup().await;
        let mut fresh = JobArtifacts::default();
        fresh.track_download(dir.path().join("never-created.bin"));
        fresh.cleanup().await;
    }
}
