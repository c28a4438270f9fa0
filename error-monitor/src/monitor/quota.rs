//! Hourly send quota.

use std::time::Duration;

use tokio::time::Instant;

/// Length of one quota window.
pub const QUOTA_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Sends used in the current quota window.
///
/// The window is re-anchored to the moment of the check that finds it
/// expired, so windows do not sit on a fixed grid.
#[derive(Debug, Clone)]
pub struct SendQuota {
    count: u32,
    reset_at: Instant,
}

impl SendQuota {
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            reset_at: now + QUOTA_WINDOW,
        }
    }

    fn refresh(&mut self, now: Instant) {
        if now >= self.reset_at {
            self.count = 0;
            self.reset_at = now + QUOTA_WINDOW;
        }
    }

    /// Whether `limit` sends have already been used in the window containing `now`.
    pub fn is_exhausted(&mut self, limit: u32, now: Instant) -> bool {
        self.refresh(now);
        self.count >= limit
    }

    /// Claim one send. Returns `false` without counting when the quota is exhausted.
    pub fn try_acquire(&mut self, limit: u32, now: Instant) -> bool {
        if self.is_exhausted(limit, now) {
            return false;
        }
        self.count += 1;
        true
    }

    /// Sends counted so far, without refreshing the window.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn reset_at(&self) -> Instant {
        self.reset_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_exhausted() {
        let now = Instant::now();
        let mut quota = SendQuota::new(now);

        assert!(quota.try_acquire(2, now));
        assert!(quota.try_acquire(2, now));
        assert!(!quota.try_acquire(2, now));
        assert_eq!(quota.count(), 2);
    }

    #[test]
    fn test_zero_limit_never_sends() {
        let now = Instant::now();
        let mut quota = SendQuota::new(now);
        assert!(!quota.try_acquire(0, now));
        assert_eq!(quota.count(), 0);
    }

    #[test]
    fn test_window_resets_and_reanchors() {
        let start = Instant::now();
        let mut quota = SendQuota::new(start);
        assert!(quota.try_acquire(1, start));
        assert!(!quota.try_acquire(1, start + Duration::from_secs(3599)));

        let late = start + QUOTA_WINDOW + Duration::from_secs(600);
        assert!(quota.try_acquire(1, late));
        assert_eq!(quota.count(), 1);
        assert_eq!(quota.reset_at(), late + QUOTA_WINDOW);
    }

    #[test]
    fn test_count_is_not_refreshed_by_reads() {
        let start = Instant::now();
        let mut quota = SendQuota::new(start);
        assert!(quota.try_acquire(5, start));

        // An expired window is only noticed by a send decision.
        assert_eq!(quota.count(), 1);
        assert!(!quota.is_exhausted(5, start + QUOTA_WINDOW));
        assert_eq!(quota.count(), 0);
    }
}
