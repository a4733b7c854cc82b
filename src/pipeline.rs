//! End-to-end retrieval pipeline.
//!
//! Wires link resolution, access verification, and the transfer engine into
//! the user-facing save flow. Stages run strictly in order per job; every
//! stage edits the single status message, every failure becomes a specific
//! terminal diagnostic on it, and temporary artifacts are removed
//! unconditionally whichever way the job ends.

use crate::access::{AccessVerifier, ChatAccess, DenyReason, MtDirectory};
use crate::bot::{messaging, StatusReporter};
use crate::config::Settings;
use crate::link;
use crate::session::SessionCoordinator;
use crate::storage::VolatileStore;
use crate::transfer::{self, metadata, JobArtifacts};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared application state handed to every handler.
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub coordinator: Arc<SessionCoordinator>,
    pub verifier: Arc<AccessVerifier>,
    pub store: Arc<VolatileStore>,
    /// Cancelled at shutdown; in-flight downloads observe it so cleanup
    /// still runs before the process exits.
    pub shutdown: CancellationToken,
}

/// Terminal state of a successful job.
enum Outcome {
    Delivered,
    TextRelayed,
    /// The link was an invite link; we joined instead of retrieving.
    Joined,
}

/// Terminal failure with its user-facing diagnostic.
struct JobFailure {
    user_text: String,
}

impl JobFailure {
    fn new(user_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
        }
    }

    /// Failure text embedding a transport error message (HTML-escaped,
    /// since status edits use HTML mode).
    fn from_error(prefix: &str, err: &impl std::fmt::Display) -> Self {
        Self::new(format!(
            "{prefix}: {}",
            html_escape::encode_text(&err.to_string())
        ))
    }
}

/// One user-initiated retrieval request.
#[derive(Clone, Copy)]
struct JobRequest<'a> {
    /// Chat the command arrived in; status edits and text relays go here.
    origin: ChatId,
    /// Requesting user; saved content is delivered to them directly.
    user_id: i64,
    link_text: &'a str,
    offset: i32,
}

/// Runs one retrieval job end to end. Never returns an error: every
/// failure is rendered onto the status message.
pub async fn run_retrieval(
    ctx: &AppContext,
    bot: &Bot,
    origin: ChatId,
    user_id: i64,
    link_text: &str,
    offset: i32,
) {
    let status = match StatusReporter::begin(bot, origin, "⏳ Processing your request...").await {
        Ok(status) => status,
        Err(e) => {
            error!(error = %e, "could not create status message, dropping job");
            return;
        }
    };

    let request = JobRequest {
        origin,
        user_id,
        link_text,
        offset,
    };
    let mut artifacts = JobArtifacts::default();
    let result = execute_stages(ctx, bot, &status, &request, &mut artifacts).await;

    // Cleanup is unconditional: the failure path must not leave temporary
    // files behind either.
    artifacts.cleanup().await;

    match result {
        Ok(Outcome::Delivered | Outcome::TextRelayed) => {
            record(ctx, user_id, link_text, "delivered").await;
            status.finish().await;
        }
        Ok(Outcome::Joined) => {
            // The join confirmation stays visible; nothing was retrieved.
        }
        Err(failure) => {
            record(ctx, user_id, link_text, "failed").await;
            status.fail(&failure.user_text).await;
        }
    }
}

async fn execute_stages(
    ctx: &AppContext,
    bot: &Bot,
    status: &StatusReporter,
    request: &JobRequest<'_>,
    artifacts: &mut JobArtifacts,
) -> Result<Outcome, JobFailure> {
    let JobRequest {
        origin,
        user_id,
        link_text,
        offset,
    } = *request;
    let handles = ctx
        .coordinator
        .ensure_started()
        .await
        .map_err(|e| JobFailure::from_error("❌ Platform sessions unavailable", &e))?;

    let Some(user_client) = handles.user.clone() else {
        return Err(JobFailure::new(
            "⚠️ Unable to access restricted content: no user session is configured.\n\
             Set the SESSION or STRING environment variable with a valid session \
             string to enable this feature.",
        ));
    };
    let directory = MtDirectory::new(user_client.clone());

    // Parse the link. A bare invite link is a join request, not a
    // retrieval.
    let reference = match link::resolve(link_text, offset) {
        Ok(reference) => reference,
        Err(_) if link::is_invite_link(link_text) => {
            status.stage("🔑 Trying to join channel with invite link...").await;
            return if ctx.verifier.attempt_join(&directory, link_text).await {
                status
                    .stage("✅ Joined. Now send the message link to save content.")
                    .await;
                Ok(Outcome::Joined)
            } else {
                Err(JobFailure::new(
                    "🔒 Failed to join channel. The invite link may be expired or invalid.",
                ))
            };
        }
        Err(_) => {
            return Err(JobFailure::new(
                "🚫 Invalid link format. Please check your link.",
            ));
        }
    };

    // Verify access through the user-acting identity.
    status.stage("🔍 Checking access to content...").await;
    let peer = match ctx.verifier.verify(&directory, &reference.chat).await {
        ChatAccess::Reachable(peer) => peer,
        ChatAccess::Unreachable(reason) => return Err(deny_failure(&reason)),
    };

    // Fetch the target message. A miss here despite positive verification
    // is a race with revoked access; it is reported, not retried.
    status.stage("📨 Accessing message...").await;
    let message = transfer::fetch_message(&user_client, peer, reference.message_id)
        .await
        .map_err(|e| match e {
            transfer::TransferError::NotFound => JobFailure::new(
                "❌ Message not found or you don't have access to it.",
            ),
            other => JobFailure::from_error("❌ Failed to get message", &other),
        })?;

    // Text-only messages short-circuit the transfer entirely.
    if message.media().is_none() {
        let text = message.text();
        if text.is_empty() {
            return Err(JobFailure::new(
                "❌ The target message has no content to save.",
            ));
        }
        status.stage("📋 Relaying text message...").await;
        messaging::send_text_relay(bot, origin, text)
            .await
            .map_err(|e| JobFailure::from_error("❌ Failed to relay text", &e))?;
        return Ok(Outcome::TextRelayed);
    }

    // Download through the user-acting identity.
    status.stage("⬇️ Downloading content...").await;
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let progress_task = status.spawn_progress_task(rx, "⬇️ Downloading");
    let downloaded = transfer::download(
        &user_client,
        &message,
        Path::new(&ctx.settings.download_dir),
        artifacts,
        &tx,
        &ctx.shutdown,
    )
    .await;
    drop(tx);
    let _ = progress_task.await;

    let media = downloaded.map_err(|e| match e {
        transfer::TransferError::Cancelled => {
            JobFailure::new("⚠️ Shutting down, this request was aborted.")
        }
        other => JobFailure::from_error("❌ Failed to download media", &other),
    })?;
    info!(
        user_id,
        kind = ?media.kind,
        bytes = media.total_bytes,
        "download finished"
    );

    // Thumbnail: user override wins; otherwise a generated frame, which
    // becomes a tracked artifact.
    let thumbnail = match metadata::user_thumbnail(Path::new(&ctx.settings.thumb_dir), user_id) {
        Some(own) => Some(own),
        None if media.kind.is_video() => {
            let out = media.path.with_extension("thumb.jpg");
            let generated = metadata::capture_frame(&media.path, &out).await;
            if let Some(path) = &generated {
                artifacts.track_thumbnail(path.clone());
            }
            generated
        }
        None => None,
    };

    // Upload through the most suitable transport.
    status.stage("📤 Uploading to Telegram...").await;
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let progress_task = status.spawn_progress_task(rx, "📤 Uploading");
    let uploaded = if media.kind.is_video() {
        let meta = metadata::probe_video(&media.path).await;
        transfer::send_video(
            &handles.transport,
            transfer::user_peer(user_id),
            &media,
            &meta,
            thumbnail.as_deref(),
            &tx,
        )
        .await
    } else {
        transfer::send_document(
            &handles.bot,
            ChatId(user_id),
            &media,
            thumbnail.as_deref(),
            &tx,
        )
        .await
    };
    drop(tx);
    let _ = progress_task.await;

    uploaded.map_err(|e| JobFailure::from_error("❌ Failed to upload media", &e))?;
    Ok(Outcome::Delivered)
}

fn deny_failure(reason: &DenyReason) -> JobFailure {
    match reason {
        DenyReason::PrivateUnjoined => JobFailure::new(
            "🔒 Cannot access this content. Please make sure:\n\
             1. The user session has access to this channel\n\
             2. For private channels, send an invite link first",
        ),
        DenyReason::RateLimited { retry_after_secs } => JobFailure::new(format!(
            "⏳ Rate limited. Try again in {retry_after_secs} seconds."
        )),
        other => JobFailure::new(format!(
            "🚫 Cannot access this content: {}.",
            html_escape::encode_text(&other.to_string())
        )),
    }
}

async fn record(ctx: &AppContext, user_id: i64, link_text: &str, outcome: &str) {
    ctx.store
        .insert(
            "retrievals",
            json!({
                "user_id": user_id,
                "link": link_text,
                "status": outcome,
            }),
        )
        .await;
}
