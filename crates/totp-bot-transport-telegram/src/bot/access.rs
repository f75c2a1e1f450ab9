//! Flood protection for users outside the allowlist.
//!
//! A denied user gets "Access denied" at most once per cooldown; further
//! attempts are dropped silently so a spamming client cannot get the bot
//! rate limited.

use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Remembers which denied users were already told so
#[derive(Clone)]
pub struct DenialThrottle {
    /// user id -> (), expiring after the cooldown
    notified: Cache<i64, ()>,
    /// Attempts dropped while in cooldown
    silenced: Arc<AtomicU64>,
}

impl DenialThrottle {
    /// Create a throttle with the given cooldown and capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// use totp_bot_transport_telegram::bot::DenialThrottle;
    ///
    /// let throttle = DenialThrottle::new(1200, 10_000);
    /// assert_eq!(throttle.silenced(), 0);
    /// ```
    #[must_use]
    pub fn new(cooldown_secs: u64, max_capacity: u64) -> Self {
        let notified = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(cooldown_secs))
            .build();

        Self {
            notified,
            silenced: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether `user_id` should be told "Access denied" now.
    #[must_use]
    pub fn should_notify(&self, user_id: i64) -> bool {
        if !self.notified.contains_key(&user_id) {
            return true;
        }

        let count = self.silenced.fetch_add(1, Ordering::Relaxed) + 1;
        if count.is_multiple_of(100) {
            debug!(user_id = user_id, "Silenced {count} unauthorized attempts");
        }
        false
    }

    /// Start the cooldown for `user_id` after the denial went out.
    pub async fn record_notified(&self, user_id: i64) {
        self.notified.insert(user_id, ()).await;
    }

    /// Total attempts dropped during cooldowns.
    #[must_use]
    pub fn silenced(&self) -> u64 {
        self.silenced.load(Ordering::Relaxed)
    }
}
