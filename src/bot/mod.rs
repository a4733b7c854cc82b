/// Long-message splitting and text relays
pub mod messaging;
/// Retrying wrappers for Bot API operations
pub mod resilient;
/// Single in-place status message with throttled progress edits
pub mod status;
/// Denial-message cooldown for unauthorized users
pub mod unauthorized;

pub use self::status::StatusReporter;
pub use self::unauthorized::DenialCooldown;
