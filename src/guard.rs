//! Process-local throttles for repeat stake and rollover triggers.
//!
//! Both trackers are single-instance optimizations only: the store-level
//! uniqueness constraints and status fields remain the source of truth.
//! In a horizontally-scaled deployment this layer must move to a shared,
//! TTL-backed store.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Sliding-window limiter: at most `max` hits per `window` per key.
pub struct RateLimiter {
    max: usize,
    window: Duration,
    hits: DashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            hits: DashMap::new(),
        }
    }

    /// Records a hit and returns false when the key is over its budget.
    /// A rejected call does not consume budget.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.hits.entry(key.to_string()).or_default();
        entry.retain(|at| now.duration_since(*at) < self.window);

        if entry.len() >= self.max {
            return false;
        }

        entry.push(now);
        true
    }
}

/// TTL de-duplication: the first caller per key wins until the cooldown lapses.
pub struct CooldownGuard {
    ttl: Duration,
    last: DashMap<String, Instant>,
}

impl CooldownGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last: DashMap::new(),
        }
    }

    pub fn try_acquire(&self, key: &str) -> bool {
        use dashmap::mapref::entry::Entry;

        let now = Instant::now();
        match self.last.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if now.duration_since(*occupied.get()) < self.ttl {
                    false
                } else {
                    *occupied.get_mut() = now;
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_allows_up_to_max_within_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check("u1"));
        assert!(limiter.check("u1"));
        assert!(limiter.check("u1"));
        assert!(!limiter.check("u1"));
        // Other keys have independent budgets.
        assert!(limiter.check("u2"));
    }

    #[test]
    fn limiter_window_expires() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.check("u1"));
        assert!(!limiter.check("u1"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("u1"));
    }

    #[test]
    fn cooldown_dedupes_until_ttl_lapses() {
        let guard = CooldownGuard::new(Duration::from_millis(20));
        assert!(guard.try_acquire("rollover"));
        assert!(!guard.try_acquire("rollover"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(guard.try_acquire("rollover"));
    }
}
