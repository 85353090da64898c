//! Rate limiting for outbound control messages.
//!
//! Sliding-window limiter sized to the exchange's inbound message limit
//! (10 messages per second on the combined stream).

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Sliding-window rate limiter.
pub struct RateLimiter {
    /// Maximum messages per window.
    max_messages: u32,
    /// Window length.
    window: Duration,
    /// Timestamps of recent messages.
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Arguments
    /// * `max_messages` - Maximum messages per window (at least 1)
    /// * `window` - Window length
    pub fn new(max_messages: u32, window: Duration) -> Self {
        let max_messages = max_messages.max(1);
        Self {
            max_messages,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_messages as usize)),
        }
    }

    /// Limiter allowing `max_messages` per second.
    pub fn per_second(max_messages: u32) -> Self {
        Self::new(max_messages, Duration::from_secs(1))
    }

    /// Check if we can send a message.
    pub fn can_send(&self) -> bool {
        self.cleanup_old_timestamps();
        self.timestamps.lock().len() < self.max_messages as usize
    }

    /// Record a message send.
    pub fn record_send(&self) {
        self.cleanup_old_timestamps();
        self.timestamps.lock().push_back(Instant::now());
    }

    /// Get current message count in window.
    pub fn current_count(&self) -> u32 {
        self.cleanup_old_timestamps();
        self.timestamps.lock().len() as u32
    }

    /// Get remaining capacity.
    pub fn remaining_capacity(&self) -> u32 {
        self.max_messages.saturating_sub(self.current_count())
    }

    /// Wait until a slot is free, then claim it.
    pub async fn acquire(&self) {
        loop {
            if let Some(wait) = self.try_claim() {
                debug!(wait_ms = wait.as_millis() as u64, "Outbound rate limit reached, waiting");
                tokio::time::sleep(wait).await;
            } else {
                return;
            }
        }
    }

    /// Claim a slot if one is free; otherwise return how long until the
    /// oldest entry leaves the window.
    fn try_claim(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        self.prune(&mut timestamps, now);

        if timestamps.len() < self.max_messages as usize {
            timestamps.push_back(now);
            return None;
        }

        let oldest = timestamps.front().copied().unwrap_or(now);
        Some(
            self.window
                .saturating_sub(now.duration_since(oldest))
                .max(Duration::from_millis(1)),
        )
    }

    fn cleanup_old_timestamps(&self) {
        let mut timestamps = self.timestamps.lock();
        self.prune(&mut timestamps, Instant::now());
    }

    fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while timestamps
            .front()
            .is_some_and(|&t| now.duration_since(t) >= self.window)
        {
            timestamps.pop_front();
        }
    }

    /// Reset rate limiter state.
    pub fn reset(&self) {
        self.timestamps.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_basic() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));

        assert!(limiter.can_send());
        assert_eq!(limiter.current_count(), 0);

        for _ in 0..5 {
            limiter.record_send();
        }

        assert!(limiter.can_send());
        assert_eq!(limiter.current_count(), 5);
        assert_eq!(limiter.remaining_capacity(), 5);
    }

    #[test]
    fn test_rate_limiter_at_limit() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));

        for _ in 0..5 {
            limiter.record_send();
        }

        assert!(!limiter.can_send());
        assert_eq!(limiter.remaining_capacity(), 0);

        limiter.reset();
        assert!(limiter.can_send());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_window() {
        let limiter = RateLimiter::new(2, Duration::from_millis(200));

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(190));
    }
}
