//! Shared-link parsing.
//!
//! Turns a pasted `t.me` link into an addressable chat/message pair.
//! Pure string processing, no I/O. Patterns are compile-time validated
//! through the `lazy_regex!` macro.

#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use std::fmt;
use thiserror::Error;

/// Private-channel form: `t.me/c/<numeric id>/<message id>`
static RE_PRIVATE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"t\.me/c/(\d+)/(\d+)");

/// Bot-scoped form: `t.me/b/<handle>/<message id>`
static RE_BOT_SCOPED: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"t\.me/b/([^/\s]+)/(\d+)");

/// Default public form: `t.me/<handle>/<message id>`
static RE_PUBLIC: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"t\.me/([^/\s]+)/(\d+)");

/// Normalized reference to a conversation on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatLocator {
    /// Canonical numeric channel id (`-100…` space)
    Id(i64),
    /// Textual handle (`@`-less username)
    Handle(String),
}

impl fmt::Display for ChatLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Handle(h) => write!(f, "{h}"),
        }
    }
}

/// Which textual shape the link matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// `t.me/c/…`: raw channel id, requires elevated access
    Private,
    /// `t.me/b/…`: bot-scoped chat
    BotScoped,
    /// `t.me/<handle>/…`: public channel or group
    Public,
}

/// Result of parsing a shared link. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReference {
    pub chat: ChatLocator,
    pub message_id: i32,
    pub kind: LinkKind,
}

/// Errors produced by link parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The text matches none of the recognized link shapes.
    #[error("unrecognized link shape")]
    UnrecognizedShape,
    /// Numeric chat or message id does not fit the platform's id space.
    #[error("id out of range")]
    IdOutOfRange,
}

/// Parses a shared link into a [`LinkReference`].
///
/// Any `?single` suffix is stripped before matching. `offset` is added to
/// the parsed message id, supporting "next N messages" batches layered on
/// by the caller.
///
/// # Errors
///
/// Returns [`ParseError`] when no recognized shape matches; the caller must
/// present an invalid-link message and must not proceed.
///
/// # Examples
///
/// ```
/// use tg_courier::link::{resolve, ChatLocator, LinkKind};
///
/// let parsed = resolve("https://t.me/c/1234567890/55", 0).expect("valid link");
/// assert_eq!(parsed.chat, ChatLocator::Id(-1_001_234_567_890));
/// assert_eq!(parsed.message_id, 55);
/// assert_eq!(parsed.kind, LinkKind::Private);
/// ```
pub fn resolve(text: &str, offset: i32) -> Result<LinkReference, ParseError> {
    let text = text.split("?single").next().unwrap_or(text);

    let (chat, raw_id, kind) = if text.contains("t.me/c/") {
        let caps = RE_PRIVATE
            .captures(text)
            .ok_or(ParseError::UnrecognizedShape)?;
        let chat = ChatLocator::Id(canonical_channel_id(&caps[1])?);
        (chat, caps[2].to_string(), LinkKind::Private)
    } else if text.contains("t.me/b/") {
        let caps = RE_BOT_SCOPED
            .captures(text)
            .ok_or(ParseError::UnrecognizedShape)?;
        (
            ChatLocator::Handle(caps[1].to_string()),
            caps[2].to_string(),
            LinkKind::BotScoped,
        )
    } else {
        let caps = RE_PUBLIC
            .captures(text)
            .ok_or(ParseError::UnrecognizedShape)?;
        (
            ChatLocator::Handle(caps[1].to_string()),
            caps[2].to_string(),
            LinkKind::Public,
        )
    };

    let message_id: i32 = raw_id.parse().map_err(|_| ParseError::IdOutOfRange)?;
    let message_id = message_id
        .checked_add(offset)
        .ok_or(ParseError::IdOutOfRange)?;

    Ok(LinkReference {
        chat,
        message_id,
        kind,
    })
}

/// Normalizes a numeric chat id string into the canonical negative,
/// `-100`-prefixed channel id space.
///
/// A bare digit string gains the prefix; a string already carrying the
/// canonical prefix parses as-is; an integer lacking a leading sign gains
/// the prefix. Normalization is idempotent.
///
/// # Errors
///
/// Returns [`ParseError::IdOutOfRange`] when the resulting id does not fit
/// an `i64`, and [`ParseError::UnrecognizedShape`] for non-numeric input.
pub fn canonical_channel_id(raw: &str) -> Result<i64, ParseError> {
    let raw = raw.trim();

    if raw.chars().all(|c| c.is_ascii_digit()) && !raw.is_empty() {
        return format!("-100{raw}")
            .parse::<i64>()
            .map_err(|_| ParseError::IdOutOfRange);
    }

    if let Some(rest) = raw.strip_prefix("-100") {
        if rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() {
            return raw.parse::<i64>().map_err(|_| ParseError::IdOutOfRange);
        }
    }

    Err(ParseError::UnrecognizedShape)
}

/// Whether the text is a channel invite link rather than a message link.
#[must_use]
pub fn is_invite_link(text: &str) -> bool {
    text.starts_with("https://t.me/+") || text.starts_with("https://t.me/joinchat/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_link() {
        let parsed = resolve("https://t.me/c/1234567890/55", 0).expect("parse");
        assert_eq!(parsed.chat, ChatLocator::Id(-1_001_234_567_890));
        assert_eq!(parsed.message_id, 55);
        assert_eq!(parsed.kind, LinkKind::Private);
    }

    #[test]
    fn test_bot_scoped_link() {
        let parsed = resolve("https://t.me/b/somebot/42", 0).expect("parse");
        assert_eq!(parsed.chat, ChatLocator::Handle("somebot".to_string()));
        assert_eq!(parsed.message_id, 42);
        assert_eq!(parsed.kind, LinkKind::BotScoped);
    }

    #[test]
    fn test_public_link_with_single_suffix() {
        let parsed = resolve("https://t.me/somechannel/10?single", 0).expect("parse");
        assert_eq!(parsed.chat, ChatLocator::Handle("somechannel".to_string()));
        assert_eq!(parsed.message_id, 10);
        assert_eq!(parsed.kind, LinkKind::Public);
    }

    #[test]
    fn test_offset_applied() {
        let parsed = resolve("https://t.me/somechannel/10", 3).expect("parse");
        assert_eq!(parsed.message_id, 13);
    }

    #[test]
    fn test_unrecognized_shapes() {
        assert_eq!(
            resolve("not a link at all", 0),
            Err(ParseError::UnrecognizedShape)
        );
        assert_eq!(
            resolve("https://t.me/justahandle", 0),
            Err(ParseError::UnrecognizedShape)
        );
        // Private marker present but malformed path
        assert_eq!(
            resolve("https://t.me/c/notdigits/55", 0),
            Err(ParseError::UnrecognizedShape)
        );
    }

    #[test]
    fn test_normalization_idempotent() {
        assert_eq!(
            canonical_channel_id("1234567890"),
            Ok(-1_001_234_567_890)
        );
        // Already canonical: returned unchanged
        assert_eq!(
            canonical_channel_id("-1001234567890"),
            Ok(-1_001_234_567_890)
        );
    }

    #[test]
    fn test_normalization_rejects_garbage() {
        assert!(canonical_channel_id("").is_err());
        assert!(canonical_channel_id("-42").is_err());
        assert!(canonical_channel_id("12a34").is_err());
    }

    #[test]
    fn test_invite_link_detection() {
        assert!(is_invite_link("https://t.me/+AbCdEf123"));
        assert!(is_invite_link("https://t.me/joinchat/AbCdEf123"));
        assert!(!is_invite_link("https://t.me/somechannel/10"));
    }
}
