//! In-place status reporting for a retrieval job.
//!
//! Every stage of a job updates one status message so the user always sees
//! the latest state rather than a stream of messages. Progress edits are
//! throttled to respect platform edit-rate limits; stage transitions edit
//! unconditionally.

use super::resilient;
use crate::config::STATUS_EDIT_THROTTLE_MS;
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct Inner {
    bot: Bot,
    chat: ChatId,
    message: MessageId,
    last_edit: Mutex<Instant>,
    min_interval: Duration,
}

/// Handle to the single status message of one job. Cheap to clone.
#[derive(Clone)]
pub struct StatusReporter {
    inner: Arc<Inner>,
}

impl StatusReporter {
    /// Sends the initial status message.
    ///
    /// # Errors
    ///
    /// Returns an error when even the retried send fails; the job cannot
    /// report without its status message.
    pub async fn begin(bot: &Bot, chat: ChatId, text: &str) -> Result<Self> {
        let message = resilient::send_message_resilient(bot, chat, text, None).await?;
        Ok(Self {
            inner: Arc::new(Inner {
                bot: bot.clone(),
                chat,
                message: message.id,
                last_edit: Mutex::new(Instant::now()),
                min_interval: Duration::from_millis(STATUS_EDIT_THROTTLE_MS),
            }),
        })
    }

    /// Stage transition: edits unconditionally.
    pub async fn stage(&self, text: &str) {
        resilient::edit_message_safe_resilient(
            &self.inner.bot,
            self.inner.chat,
            self.inner.message,
            text,
        )
        .await;
        *self.inner.last_edit.lock().await = Instant::now();
    }

    /// Progress update: dropped while the previous edit is fresher than the
    /// throttle interval.
    pub async fn progress(&self, text: &str) {
        {
            let mut last = self.inner.last_edit.lock().await;
            if last.elapsed() < self.inner.min_interval {
                return;
            }
            *last = Instant::now();
        }
        resilient::edit_message_safe_resilient(
            &self.inner.bot,
            self.inner.chat,
            self.inner.message,
            text,
        )
        .await;
    }

    /// Terminal failure: rewrites the status message with the diagnostic.
    pub async fn fail(&self, text: &str) {
        self.stage(text).await;
    }

    /// Terminal success: the status message is deleted.
    pub async fn finish(&self) {
        resilient::delete_message_resilient(&self.inner.bot, self.inner.chat, self.inner.message)
            .await;
    }

    /// Consumes `(done, total)` events and renders throttled percentage
    /// edits under `label` until the sending side closes.
    #[must_use]
    pub fn spawn_progress_task(
        &self,
        mut rx: UnboundedReceiver<(u64, u64)>,
        label: &'static str,
    ) -> JoinHandle<()> {
        let reporter = self.clone();
        tokio::spawn(async move {
            while let Some(mut event) = rx.recv().await {
                // Coalesce a burst of chunk events down to the newest.
                while let Ok(newer) = rx.try_recv() {
                    event = newer;
                }
                reporter.progress(&render_progress(label, event.0, event.1)).await;
            }
        })
    }
}

fn render_progress(label: &str, done: u64, total: u64) -> String {
    if total == 0 {
        return format!("{label}… {}", format_bytes(done));
    }
    let percent = done.saturating_mul(100) / total;
    format!(
        "{label}… {percent}% ({} / {})",
        format_bytes(done),
        format_bytes(total)
    )
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / MB)
    }
}
