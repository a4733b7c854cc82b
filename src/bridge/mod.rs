//! Inbound update bridge.
//!
//! Accepts platform events pushed over HTTP out-of-band from the native
//! long-poll loop and injects them into the same dispatch tree natively
//! polled updates flow through. Push mode is established at startup when an
//! externally reachable URL is configured and re-verified periodically;
//! otherwise the bot falls back to long polling.

pub mod http;
pub mod listener;

use std::sync::{Arc, RwLock};
use teloxide::prelude::*;
use teloxide::types::Update;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

pub use self::listener::BridgeListener;

/// Errors produced while routing a pushed event.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no update handler registered")]
    NoHandler,
    #[error("update handler is no longer accepting events")]
    HandlerGone,
}

/// Delivery mode selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Platform pushes events to our HTTP endpoint.
    Push,
    /// The bot identity runs its own native receive loop.
    Poll,
}

/// Registration slot for the dispatch handler used by the push endpoint.
///
/// At most one handler is installed at a time; the last writer wins. The
/// HTTP receiver hands every authenticated event here and acknowledges
/// immediately, so processing is asynchronous relative to the response.
#[derive(Clone, Default)]
pub struct UpdateInjector {
    slot: Arc<RwLock<Option<mpsc::UnboundedSender<Update>>>>,
}

impl UpdateInjector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the dispatch handler, replacing any previous one.
    pub fn register(&self, handler: mpsc::UnboundedSender<Update>) {
        if let Ok(mut slot) = self.slot.write() {
            if slot.replace(handler).is_some() {
                info!("update handler replaced");
            } else {
                info!("update handler registered");
            }
        }
    }

    /// Whether a handler is currently installed (surfaced by the health
    /// endpoint).
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.slot.read().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Routes one event into the registered handler.
    ///
    /// # Errors
    ///
    /// [`DispatchError`] when no handler is installed or the handler's
    /// receiving side is gone. Either way the failure is contained to this
    /// event.
    pub fn dispatch(&self, update: Update) -> Result<(), DispatchError> {
        let slot = self.slot.read().map_err(|_| DispatchError::NoHandler)?;
        match slot.as_ref() {
            None => Err(DispatchError::NoHandler),
            Some(tx) => tx.send(update).map_err(|_| DispatchError::HandlerGone),
        }
    }
}

/// Owns push-mode registration with the platform and the fallback decision.
pub struct UpdateBridge {
    bot: Bot,
    injector: UpdateInjector,
    target: Option<Url>,
    pending_threshold: u32,
}

impl UpdateBridge {
    /// Builds the bridge. `public_url` is the externally reachable base the
    /// platform can call; the webhook target embeds the bot token as its
    /// path secret.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured URL does not parse.
    pub fn new(
        bot: Bot,
        injector: UpdateInjector,
        public_url: Option<&str>,
        bot_token: &str,
        pending_threshold: u32,
    ) -> anyhow::Result<Self> {
        let target = public_url
            .map(|base| {
                let base = base.trim_end_matches('/');
                Url::parse(&format!("{base}/webhook/{bot_token}"))
            })
            .transpose()?;
        Ok(Self {
            bot,
            injector,
            target,
            pending_threshold,
        })
    }

    #[must_use]
    pub fn injector(&self) -> UpdateInjector {
        self.injector.clone()
    }

    /// Clears any existing registration, then attempts push-mode
    /// registration when a target URL is configured. Returns the mode the
    /// dispatcher should run in.
    pub async fn establish(&self) -> DeliveryMode {
        // Clean slate: a stale registration from a previous run would
        // starve the poller.
        if let Err(e) = self.bot.delete_webhook().await {
            warn!(error = %e, "failed to clear webhook registration, continuing");
        }

        let Some(target) = &self.target else {
            info!("no public URL configured, using long polling");
            return DeliveryMode::Poll;
        };

        match self.bot.set_webhook(target.clone()).await {
            Ok(_) => {
                info!("webhook registered, push delivery active");
                DeliveryMode::Push
            }
            Err(e) => {
                warn!(error = %e, "webhook registration failed, falling back to long polling");
                DeliveryMode::Poll
            }
        }
    }

    /// Periodic health check: re-verifies the registered URL matches the
    /// expected target and that the undelivered backlog is below the
    /// threshold; redoes the registration when either check fails.
    pub async fn requalify(&self) {
        let Some(target) = &self.target else {
            return;
        };

        let info = match self.bot.get_webhook_info().await {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "webhook info unavailable, skipping requalification");
                return;
            }
        };

        let registered = info.url.as_ref().map(Url::as_str);
        let stale = registered != Some(target.as_str());
        let backlog = info.pending_update_count > self.pending_threshold;
        if !stale && !backlog {
            return;
        }

        warn!(
            stale,
            pending = info.pending_update_count,
            "webhook registration unhealthy, re-registering"
        );
        if let Err(e) = self.bot.set_webhook(target.clone()).await {
            warn!(error = %e, "webhook re-registration failed, retrying on next check");
        }
    }

    /// Creates the channel-backed listener for push mode and installs its
    /// sending side as the dispatch handler.
    #[must_use]
    pub fn listener(&self) -> BridgeListener {
        let (tx, rx) = mpsc::unbounded_channel();
        self.injector.register(tx);
        BridgeListener::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_update() -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "date": 1,
                "chat": {"id": 7, "type": "private"},
                "from": {"id": 7, "is_bot": false, "first_name": "T"},
                "text": "ping"
            }
        }))
        .expect("valid update json")
    }

    #[test]
    fn test_injector_requires_registration() {
        let injector = UpdateInjector::new();
        assert!(!injector.is_registered());
        assert!(matches!(
            injector.dispatch(sample_update()),
            Err(DispatchError::NoHandler)
        ));
    }

    #[test]
    fn test_injector_last_writer_wins() {
        let injector = UpdateInjector::new();
        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel();

        injector.register(first_tx);
        injector.register(second_tx);
        assert!(injector.is_registered());

        injector.dispatch(sample_update()).expect("dispatch");
        assert!(first_rx.try_recv().is_err());
        assert!(second_rx.try_recv().is_ok());
    }

    #[test]
    fn test_injector_reports_closed_handler() {
        let injector = UpdateInjector::new();
        let (tx, rx) = mpsc::unbounded_channel();
        injector.register(tx);
        drop(rx);
        assert!(matches!(
            injector.dispatch(sample_update()),
            Err(DispatchError::HandlerGone)
        ));
    }
}
