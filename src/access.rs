//! Chat access verification.
//!
//! Determines whether the user-acting identity can reach a chat, caches
//! positive verdicts for the process lifetime, and classifies failures into
//! a closed set of user-presentable reasons. Callers switch on the verdict
//! tag instead of catching transport-specific errors.

use crate::link::ChatLocator;
use async_trait::async_trait;
use grammers_client::session::defs::{PeerAuth, PeerId, PeerRef};
use grammers_client::Client;
use grammers_mtsender::InvocationError;
use moka::future::Cache;
use std::fmt;
use tracing::{debug, warn};

/// Why a chat is not reachable. Closed taxonomy; every variant maps to a
/// specific user-facing diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Private channel the user session has not joined
    PrivateUnjoined,
    /// The reference does not name a valid channel or chat
    InvalidReference,
    /// The channel is banned
    Banned,
    /// Username or chat id does not resolve to a peer
    InvalidPeer,
    /// Platform flood control; carries the mandated wait verbatim
    RateLimited { retry_after_secs: u32 },
    /// Anything else, with the transport's message text
    Other(String),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrivateUnjoined => {
                write!(f, "this is a private channel that requires joining")
            }
            Self::InvalidReference => write!(f, "invalid channel or chat"),
            Self::Banned => write!(f, "the channel is banned"),
            Self::InvalidPeer => write!(f, "invalid username or channel id"),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, try again in {retry_after_secs} seconds")
            }
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// Verdict of an access check.
#[derive(Debug, Clone)]
pub enum ChatAccess {
    /// The chat is reachable through the probing identity.
    Reachable(PeerRef),
    /// The chat is not reachable; the reason says why.
    Unreachable(DenyReason),
}

/// Resolution backend for chat locators. The production implementation is
/// backed by the user-acting MTProto client; tests substitute counting
/// fakes.
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    /// Resolves a locator to an addressable peer, or classifies the failure.
    async fn locate(&self, locator: &ChatLocator) -> Result<PeerRef, DenyReason>;

    /// Attempts to join a chat through an invite link. Failures (expired
    /// hash, still not a participant) are reported as `false`, not errors.
    async fn join(&self, invite_link: &str) -> bool;
}

/// [`ChatDirectory`] backed by a grammers client.
pub struct MtDirectory {
    client: Client,
}

impl MtDirectory {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Numeric ids arrive in the canonical `-100…` space; strip the prefix
    /// back to the bare channel id MTProto wants.
    fn bare_channel_id(canonical: i64) -> i64 {
        -canonical - 1_000_000_000_000
    }

    async fn locate_by_id(&self, canonical: i64) -> Result<PeerRef, DenyReason> {
        let bare = Self::bare_channel_id(canonical);

        // Ambient authority (access hash 0) resolves for peers the account
        // already knows server-side.
        let ambient = PeerRef {
            id: PeerId::channel(bare),
            auth: PeerAuth::default(),
        };
        let first_err = match self.client.resolve_peer(ambient).await {
            Ok(peer) => return Ok(PeerRef::from(&peer)),
            Err(e) => e,
        };

        // Fall back to the dialog list: a user account carries the peers it
        // participates in even when ambient resolution is refused.
        debug!(
            channel = canonical,
            error = %first_err,
            "ambient peer resolution failed, scanning dialogs"
        );
        let mut dialogs = self.client.iter_dialogs();
        loop {
            match dialogs.next().await {
                Ok(Some(dialog)) => {
                    let peer = dialog.peer();
                    if peer.id().bare_id() == bare {
                        return Ok(PeerRef::from(peer));
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(classify(&e)),
            }
        }

        Err(classify(&first_err))
    }
}

#[async_trait]
impl ChatDirectory for MtDirectory {
    async fn locate(&self, locator: &ChatLocator) -> Result<PeerRef, DenyReason> {
        match locator {
            ChatLocator::Handle(handle) => match self.client.resolve_username(handle).await {
                Ok(Some(peer)) => Ok(PeerRef::from(&peer)),
                Ok(None) => Err(DenyReason::InvalidPeer),
                Err(e) => Err(classify(&e)),
            },
            ChatLocator::Id(id) => self.locate_by_id(*id).await,
        }
    }

    async fn join(&self, invite_link: &str) -> bool {
        match self.client.accept_invite_link(invite_link).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "invite link join failed");
                false
            }
        }
    }
}

/// Maps an RPC failure to a [`DenyReason`].
fn classify(err: &InvocationError) -> DenyReason {
    match err {
        InvocationError::Rpc(rpc) => classify_rpc(&rpc.name, rpc.value),
        other => DenyReason::Other(other.to_string()),
    }
}

/// Classification by RPC error name. `FLOOD_WAIT` carries the mandated wait
/// seconds in `value`.
#[must_use]
pub fn classify_rpc(name: &str, value: Option<u32>) -> DenyReason {
    match name {
        "CHANNEL_PRIVATE" => DenyReason::PrivateUnjoined,
        "CHANNEL_INVALID" | "CHAT_INVALID" | "CHAT_ID_INVALID" => DenyReason::InvalidReference,
        "CHANNEL_BANNED" | "USER_BANNED_IN_CHANNEL" => DenyReason::Banned,
        "PEER_ID_INVALID" | "USERNAME_NOT_OCCUPIED" | "USERNAME_INVALID" => {
            DenyReason::InvalidPeer
        }
        "FLOOD_WAIT" | "FLOOD_PREMIUM_WAIT" => DenyReason::RateLimited {
            retry_after_secs: value.unwrap_or(0),
        },
        other => DenyReason::Other(format!("verification failed: {other}")),
    }
}

/// Verdict cache plus verification entry points.
///
/// Positive verdicts are memoized per normalized locator and never expire
/// within the process lifetime; negative verdicts are never memoized, since
/// transient conditions (not yet joined, flood control) may resolve on a
/// later attempt.
pub struct AccessVerifier {
    verified: Cache<String, PeerRef>,
}

impl AccessVerifier {
    #[must_use]
    pub fn new(max_entries: u64) -> Self {
        Self {
            verified: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    /// Checks reachability of `locator` through `directory`.
    ///
    /// A cache hit short-circuits with no network call.
    pub async fn verify<D: ChatDirectory + ?Sized>(
        &self,
        directory: &D,
        locator: &ChatLocator,
    ) -> ChatAccess {
        let key = locator.to_string();
        if let Some(peer) = self.verified.get(&key).await {
            debug!(chat = %key, "access verdict served from cache");
            return ChatAccess::Reachable(peer);
        }

        match directory.locate(locator).await {
            Ok(peer) => {
                self.verified.insert(key, peer.clone()).await;
                ChatAccess::Reachable(peer)
            }
            Err(reason) => ChatAccess::Unreachable(reason),
        }
    }

    /// Joins through an invite link; used only when the original link was
    /// itself an invite link.
    pub async fn attempt_join<D: ChatDirectory + ?Sized>(
        &self,
        directory: &D,
        invite_link: &str,
    ) -> bool {
        directory.join(invite_link).await
    }

    /// Whether a positive record exists for the locator (used by tests and
    /// diagnostics).
    pub async fn is_verified(&self, locator: &ChatLocator) -> bool {
        self.verified.get(&locator.to_string()).await.is_some()
    }
}
