//! Multi-identity session coordination.
//!
//! Owns the three authenticated connections to the platform: the Bot API
//! identity, the transport identity (the same bot credential signed in over
//! MTProto for large-file transfer), and the optional user-acting identity
//! with elevated read access. Every other component obtains live handles
//! only through [`SessionCoordinator::ensure_started`]; nothing else may
//! create, restart, or dispose an identity.

use crate::config::Settings;
use anyhow::Context;
use base64::Engine;
use grammers_client::session::storages::TlSession;
use grammers_client::Client;
use grammers_mtsender::SenderPool;
use std::sync::Arc;
use teloxide::prelude::*;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Liveness state of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    NotStarted,
    Starting,
    Running,
    /// Optional identity unavailable; dependent features are
    /// capability-limited but the process keeps serving.
    Degraded,
    /// Mandatory identity failed to start; fatal at the main boundary.
    Failed,
}

/// Which identity a state refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRole {
    Bot,
    UserActing,
    Transport,
}

/// Startup failure of a mandatory identity. The process must exit; this is
/// not a retryable condition.
#[derive(Debug, Error)]
pub enum IdentityStartupError {
    #[error("invalid API credentials: {0}")]
    Credentials(String),
    #[error("bot identity failed to start: {0}")]
    Bot(String),
    #[error("transport identity failed to start: {0}")]
    Transport(String),
}

/// Live handles returned by the coordinator. `user` is `None` while the
/// user-acting identity is degraded.
#[derive(Clone)]
pub struct Handles {
    pub bot: Bot,
    pub transport: Client,
    pub user: Option<Client>,
}

/// One MTProto connection: the client handle plus its sender-pool runner.
struct MtIdentity {
    client: Client,
    runner: JoinHandle<()>,
}

impl MtIdentity {
    fn shutdown(self) {
        self.runner.abort();
    }
}

#[derive(Clone, Copy)]
struct States {
    bot: IdentityState,
    user: IdentityState,
    transport: IdentityState,
}

struct Inner {
    bot: Option<Bot>,
    transport: Option<MtIdentity>,
    user: Option<MtIdentity>,
    states: States,
}

/// Process-wide owner of the three identities.
pub struct SessionCoordinator {
    settings: Arc<Settings>,
    inner: Mutex<Inner>,
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner {
                bot: None,
                transport: None,
                user: None,
                states: States {
                    bot: IdentityState::NotStarted,
                    user: IdentityState::NotStarted,
                    transport: IdentityState::NotStarted,
                },
            }),
        }
    }

    /// Ensures all identities are running and returns live handles.
    ///
    /// Idempotent: repeat calls while already running return the existing
    /// handles without reconnecting.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityStartupError`] when a mandatory identity (bot or
    /// transport) cannot start. A missing or broken user session only
    /// degrades the user-acting identity.
    pub async fn ensure_started(&self) -> Result<Handles, IdentityStartupError> {
        let mut inner = self.inner.lock().await;
        if let Some(handles) = Self::live_handles(&inner) {
            return Ok(handles);
        }
        self.start_locked(&mut inner).await
    }

    /// Current state of one identity.
    pub async fn identity_state(&self, role: IdentityRole) -> IdentityState {
        let inner = self.inner.lock().await;
        match role {
            IdentityRole::Bot => inner.states.bot,
            IdentityRole::UserActing => inner.states.user,
            IdentityRole::Transport => inner.states.transport,
        }
    }

    /// Reachability probe: an identity-test call against the platform.
    /// On failure all three identities are restarted best-effort; restart
    /// failures are logged and retried on the next probe interval.
    pub async fn probe(&self) {
        let bot = {
            let inner = self.inner.lock().await;
            inner.bot.clone()
        };
        let Some(bot) = bot else {
            return;
        };
        if let Err(e) = bot.get_me().await {
            warn!(error = %e, "identity probe failed, restarting sessions");
            self.restart_all().await;
        }
    }

    /// Tears down and restarts all three identities. Never returns an
    /// error: failures are logged and the next probe retries.
    pub async fn restart_all(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(transport) = inner.transport.take() {
            transport.shutdown();
        }
        if let Some(user) = inner.user.take() {
            user.shutdown();
        }
        inner.bot = None;
        inner.states = States {
            bot: IdentityState::NotStarted,
            user: IdentityState::NotStarted,
            transport: IdentityState::NotStarted,
        };

        if let Err(e) = self.start_locked(&mut inner).await {
            warn!(error = %e, "identity restart failed, will retry on next probe");
        }
    }

    fn live_handles(inner: &Inner) -> Option<Handles> {
        if inner.states.bot != IdentityState::Running
            || inner.states.transport != IdentityState::Running
        {
            return None;
        }
        let bot = inner.bot.as_ref()?.clone();
        let transport = inner.transport.as_ref()?.client.clone();
        let user = match inner.states.user {
            IdentityState::Running => inner.user.as_ref().map(|u| u.client.clone()),
            _ => None,
        };
        Some(Handles {
            bot,
            transport,
            user,
        })
    }

    async fn start_locked(&self, inner: &mut Inner) -> Result<Handles, IdentityStartupError> {
        let api_id = self
            .settings
            .parsed_api_id()
            .map_err(|e| IdentityStartupError::Credentials(format!("API_ID: {e}")))?;

        // Bot identity (mandatory).
        inner.states.bot = IdentityState::Starting;
        let bot = Bot::new(self.settings.bot_token.clone());
        match bot.get_me().await {
            Ok(me) => {
                info!(
                    username = me.user.username.as_deref().unwrap_or("<unknown>"),
                    "bot identity running"
                );
                inner.states.bot = IdentityState::Running;
                inner.bot = Some(bot.clone());
            }
            Err(e) => {
                inner.states.bot = IdentityState::Failed;
                return Err(IdentityStartupError::Bot(e.to_string()));
            }
        }

        // Transport identity (mandatory): the bot credential over MTProto,
        // used for large-file upload.
        inner.states.transport = IdentityState::Starting;
        match self.start_transport(api_id).await {
            Ok(identity) => {
                info!("transport identity running");
                inner.states.transport = IdentityState::Running;
                inner.transport = Some(identity);
            }
            Err(e) => {
                inner.states.transport = IdentityState::Failed;
                return Err(IdentityStartupError::Transport(e.to_string()));
            }
        }

        // User-acting identity (optional): a degraded start never aborts
        // the process, it only limits restricted-content access.
        inner.states.user = IdentityState::Starting;
        match self.settings.session_string.as_deref() {
            None => {
                warn!(
                    "no session string provided; access to restricted content will be limited"
                );
                inner.states.user = IdentityState::Degraded;
            }
            Some(session_string) => match self.start_user(api_id, session_string).await {
                Ok(identity) => {
                    info!("user identity running, restricted content access available");
                    inner.states.user = IdentityState::Running;
                    inner.user = Some(identity);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "user identity failed to start, continuing with limited functionality; \
                         check the SESSION or STRING environment variable"
                    );
                    inner.states.user = IdentityState::Degraded;
                }
            },
        }

        Self::live_handles(inner).ok_or_else(|| {
            IdentityStartupError::Bot("identities not live after startup".to_string())
        })
    }

    async fn start_transport(&self, api_id: i32) -> anyhow::Result<MtIdentity> {
        let session = Arc::new(TlSession::new());
        let (client, runner) = spawn_client(Arc::clone(&session), api_id);

        let authorized = client
            .is_authorized()
            .await
            .context("authorization check failed")?;
        if !authorized {
            client
                .bot_sign_in(&self.settings.bot_token, &self.settings.api_hash)
                .await
                .context("bot sign-in failed")?;
        }

        Ok(MtIdentity { client, runner })
    }

    async fn start_user(&self, api_id: i32, session_string: &str) -> anyhow::Result<MtIdentity> {
        let bytes = decode_session_bytes(session_string)?;
        let session =
            Arc::new(TlSession::load(&bytes).map_err(|e| anyhow::anyhow!("session load: {e}"))?);
        let (client, runner) = spawn_client(Arc::clone(&session), api_id);

        let authorized = client
            .is_authorized()
            .await
            .context("authorization check failed")?;
        if !authorized {
            runner.abort();
            anyhow::bail!("session string is not authorized");
        }

        Ok(MtIdentity { client, runner })
    }
}

/// Connects one MTProto client over a sender pool and spawns its runner.
fn spawn_client(session: Arc<TlSession>, api_id: i32) -> (Client, JoinHandle<()>) {
    let pool = SenderPool::new(session, api_id);
    let client = Client::new(&pool);
    let SenderPool { runner, .. } = pool;
    let handle = tokio::spawn(runner.run());
    (client, handle)
}

/// Decodes a base64 session string into raw session bytes.
fn decode_session_bytes(session_string: &str) -> anyhow::Result<Vec<u8>> {
    let trimmed = session_string.trim();
    if trimmed.is_empty() {
        anyhow::bail!("session string is empty");
    }
    base64::engine::general_purpose::STANDARD
        .decode(trimmed.as_bytes())
        .context("session string is not valid base64")
}
