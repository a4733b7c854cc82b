//! Unauthorized access flood protection.
//!
//! Users outside the allow list get a denial message at most once per
//! cooldown period; everything else is silenced (and counted) so the bot
//! does not flood Telegram with rejections and earn a rate limit.

use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Tracks when each unauthorized user last received a denial message.
#[derive(Clone)]
pub struct DenialCooldown {
    cache: Cache<i64, ()>,
    cooldown: Duration,
    silenced_count: Arc<AtomicU64>,
}

impl DenialCooldown {
    #[must_use]
    pub fn new(cooldown_secs: u64, ttl_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            cache,
            cooldown: Duration::from_secs(cooldown_secs),
            silenced_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether a denial message should be sent to this user now.
    ///
    /// Silenced attempts are counted; only every 100th is logged to keep
    /// the log readable under a flood.
    pub async fn should_notify(&self, user_id: i64) -> bool {
        if self.cache.get(&user_id).await.is_none() {
            return true;
        }

        let count = self.silenced_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count.is_multiple_of(100) {
            debug!(
                silenced = count,
                user_id, "silenced unauthorized attempts"
            );
        }
        false
    }

    /// Marks that a denial message was delivered, starting the cooldown.
    pub async fn mark_notified(&self, user_id: i64) {
        self.cache.insert(user_id, ()).await;
    }

    /// Total silenced attempts since startup.
    #[must_use]
    pub fn silenced_count(&self) -> u64 {
        self.silenced_count.load(Ordering::Relaxed)
    }

    /// Configured cooldown.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_attempt_notifies() {
        let cooldown = DenialCooldown::new(60, 120, 100);
        assert!(cooldown.should_notify(12345).await);
    }

    #[tokio::test]
    async fn test_cooldown_silences_repeat_attempts() {
        let cooldown = DenialCooldown::new(60, 120, 100);

        assert!(cooldown.should_notify(12345).await);
        cooldown.mark_notified(12345).await;
        assert!(!cooldown.should_notify(12345).await);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let cooldown = DenialCooldown::new(60, 120, 100);

        cooldown.mark_notified(111).await;
        assert!(!cooldown.should_notify(111).await);
        assert!(cooldown.should_notify(222).await);
    }

    #[tokio::test]
    async fn test_silenced_counter() {
        let cooldown = DenialCooldown::new(60, 120, 100);
        cooldown.mark_notified(12345).await;

        for _ in 0..5 {
            cooldown.should_notify(12345).await;
        }
        assert_eq!(cooldown.silenced_count(), 5);
    }
}
