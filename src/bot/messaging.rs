//! Common messaging utilities for the bot.
//!
//! Text relays may exceed Telegram's message limit; splitting respects
//! code fences and is Unicode-safe on pathological single-line input.

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use unicode_segmentation::UnicodeSegmentation;

/// Maximum message length with safety margin. Telegram's official limit is
/// 4096; the margin absorbs formatting added downstream.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;

/// Relays raw text, split into as many messages as needed.
///
/// # Errors
///
/// Returns an error if any part fails to send.
pub async fn send_text_relay(bot: &Bot, chat_id: ChatId, text: &str) -> Result<()> {
    for part in split_message(text, TELEGRAM_MESSAGE_LIMIT) {
        bot.send_message(chat_id, part).await?;
    }
    Ok(())
}

/// Splits `message` into parts of at most `max_length` bytes, keeping code
/// fences balanced across boundaries (a fence open at a split point is
/// closed and reopened in the next part). Over-long single lines are split
/// by grapheme cluster.
#[must_use]
pub fn split_message(message: &str, max_length: usize) -> Vec<String> {
    const FENCE: &str = "```";

    if message.is_empty() {
        return Vec::new();
    }
    if message.len() <= max_length {
        return vec![message.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    fn flush(parts: &mut Vec<String>, current: &mut String, in_fence: bool) {
        if in_fence {
            current.push_str(FENCE);
            current.push('\n');
        }
        parts.push(current.trim_end().to_string());
        current.clear();
        if in_fence {
            current.push_str(FENCE);
            current.push('\n');
        }
    }

    for line in message.lines() {
        // A single line longer than the limit: split by grapheme clusters.
        if line.len() > max_length {
            if !current.is_empty() {
                flush(&mut parts, &mut current, in_fence);
            }
            let mut chunk = String::new();
            for grapheme in line.graphemes(true) {
                if chunk.len() + grapheme.len() > max_length {
                    parts.push(chunk.trim_end().to_string());
                    chunk.clear();
                }
                chunk.push_str(grapheme);
            }
            if !chunk.is_empty() {
                current.push_str(&chunk);
                current.push('\n');
            }
            continue;
        }

        if line.starts_with(FENCE) {
            in_fence = !in_fence;
        }

        if current.len() + line.len() + 1 > max_length && !current.is_empty() {
            flush(&mut parts, &mut current, in_fence);
            if in_fence && line.starts_with(FENCE) {
                // The fence toggle line itself became the split point; the
                // reopened fence already covers it.
                continue;
            }
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.is_empty() {
        if in_fence {
            current.push_str(FENCE);
            current.push('\n');
        }
        parts.push(current.trim_end().to_string());
    }

    parts
}

/// Truncates to a maximum character count (not bytes); UTF-8 safe.
#[must_use]
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_unsplit() {
        assert_eq!(split_message("hello", 100), vec!["hello"]);
        assert!(split_message("", 100).is_empty());
    }

    #[test]
    fn test_split_simple_lines() {
        let parts = split_message("Line 1\nLine 2\nLine 3", 13);
        assert_eq!(parts, vec!["Line 1", "Line 2", "Line 3"]);
    }

    #[test]
    fn test_split_keeps_fences_balanced() {
        let input = "Start\n```\nLine 1\nLine 2\n```\nEnd";
        let parts = split_message(input, 15);

        assert!(parts.len() > 1);
        assert!(parts[0].ends_with("```"));
        assert!(parts[1].starts_with("```"));
    }

    #[test]
    fn test_split_very_long_line_by_graphemes() {
        let input = "🔥".repeat(3000);
        let parts = split_message(&input, 4000);

        assert!(parts.len() >= 3);
        for part in &parts {
            assert!(part.len() <= 4000);
            assert!(part.chars().all(|c| c != '\u{FFFD}'));
        }
    }

    #[test]
    fn test_truncate_chars_unicode() {
        assert_eq!(truncate_chars("Привет, мир!", 6), "Привет");
        assert_eq!(truncate_chars("short", 50), "short");
    }
}
