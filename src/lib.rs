//! Restricted-content courier bot.
//!
//! Retrieves Telegram content the requesting identity cannot normally
//! access and relays it to the requesting user: link resolution, access
//! verification, media download/re-upload across three coordinated
//! platform identities, and webhook/polling update delivery.

/// Chat access verification and verdict caching
pub mod access;
/// Resilient messaging, status reporting, unauthorized cooldown
pub mod bot;
/// Inbound update bridge: webhook endpoint, injection listener, poll fallback
pub mod bridge;
/// Settings and tuning constants
pub mod config;
/// Shared-link parsing
pub mod link;
/// End-to-end retrieval pipeline
pub mod pipeline;
/// Feature-module registry
pub mod plugins;
/// Multi-identity session coordination
pub mod session;
/// Volatile key/value document store
pub mod storage;
/// Media download, metadata derivation, and re-upload
pub mod transfer;
