//! Configuration and settings management
//!
//! Loads settings from environment variables and defines tuning constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram API id (MTProto application credentials)
    pub api_id: String,

    /// Telegram API hash (MTProto application credentials)
    pub api_hash: String,

    /// Telegram Bot API token
    pub bot_token: String,

    /// Base64 session string for the user-acting identity.
    /// Optional: without it the bot runs with limited functionality.
    pub session_string: Option<String>,

    /// Externally reachable base URL for webhook delivery.
    /// Optional: without it the bot falls back to long polling.
    pub webhook_url: Option<String>,

    /// Port for the HTTP front door
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory for in-flight downloads
    #[serde(default = "default_download_dir")]
    pub download_dir: String,

    /// Directory holding per-user thumbnail overrides (`<user_id>.jpg`)
    #[serde(default = "default_thumb_dir")]
    pub thumb_dir: String,

    /// Comma-separated list of allowed user IDs; empty means open bot
    #[serde(rename = "allowed_users")]
    pub allowed_users_str: Option<String>,

    /// Maximum messages retrieved by a single batched /save
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,
}

const fn default_port() -> u16 {
    5000
}

fn default_download_dir() -> String {
    "downloads".to_string()
}

fn default_thumb_dir() -> String {
    "thumbs".to_string()
}

const fn default_batch_limit() -> u32 {
    10
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(File::with_name("config/default").required(false))
            // Add in the current environment file
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked into git
            .add_source(File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of APP)
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Also add settings from environment variables directly (without prefix)
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Fallback: the user session string historically lives in STRING,
        // with SESSION as the older alias. Whichever is set wins.
        if settings.session_string.is_none() {
            for key in ["STRING", "SESSION"] {
                if let Ok(val) = std::env::var(key) {
                    if !val.is_empty() {
                        settings.session_string = Some(val);
                        break;
                    }
                }
            }
        }
        if settings.webhook_url.is_none() {
            if let Ok(val) = std::env::var("WEBHOOK_URL") {
                if !val.is_empty() {
                    settings.webhook_url = Some(val);
                }
            }
        }

        Ok(settings)
    }

    /// Parses the MTProto API id.
    ///
    /// # Errors
    ///
    /// Returns the underlying parse error when `API_ID` is not an integer.
    pub fn parsed_api_id(&self) -> Result<i32, std::num::ParseIntError> {
        self.api_id.trim().parse::<i32>()
    }

    /// Returns the set of Telegram IDs allowed to use the bot.
    /// An empty set means the bot is open to everyone.
    #[must_use]
    pub fn allowed_users(&self) -> HashSet<i64> {
        self.allowed_users_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

// Telegram API retry configuration
/// Initial backoff before retrying a failed Bot API call
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Backoff ceiling for Bot API retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Maximum retry attempts for a Bot API call
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

// Status message configuration
/// Minimum interval between progress edits of a status message
pub const STATUS_EDIT_THROTTLE_MS: u64 = 1500;

// Update bridge configuration
/// Interval between webhook registration health checks
pub const WEBHOOK_RECHECK_SECS: u64 = 600;
/// Undelivered-event backlog above which the webhook is re-registered
pub const WEBHOOK_PENDING_THRESHOLD: u32 = 100;

// Session maintenance configuration
/// Interval between identity reachability probes
pub const PROBE_INTERVAL_SECS: u64 = 600;

// Unauthorized-user cooldown configuration
/// Seconds between denial messages to the same user
pub const UNAUTHORIZED_COOLDOWN_SECS: u64 = 1200;
/// Time-to-live for cooldown entries
pub const UNAUTHORIZED_TTL_SECS: u64 = 7200;
/// Maximum tracked unauthorized users
pub const UNAUTHORIZED_MAX_ENTRIES: u64 = 10_000;

// Access verification configuration
/// Maximum cached access records
pub const ACCESS_CACHE_MAX_ENTRIES: u64 = 10_000;
