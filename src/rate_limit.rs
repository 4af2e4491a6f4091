use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

/// Counter state for one `(subject, endpoint)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub count: u32,
    pub reset_at: Instant,
}

/// Storage behind [`RateLimiter`]. `incr` must be an atomic read-modify-write: it seeds a fresh
/// window when none exists or the previous one has elapsed, and otherwise increments the count
/// only while it is below `limit`.
pub trait RateLimitStore: Send + Sync {
    fn get(&self, key: &str, now: Instant) -> Option<Window>;
    /// Returns the window after the call and whether this request was admitted.
    fn incr(&self, key: &str, limit: u32, window: Duration, now: Instant) -> (Window, bool);
    /// Drop every window that has elapsed; returns how many were removed.
    fn expire(&self, now: Instant) -> usize;
}

/// Process-local store; one lock covers the whole map.
#[derive(Default)]
pub struct InMemoryStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimitStore for InMemoryStore {
    fn get(&self, key: &str, now: Instant) -> Option<Window> {
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.get(key).copied().filter(|w| w.reset_at > now)
    }

    fn incr(&self, key: &str, limit: u32, window: Duration, now: Instant) -> (Window, bool) {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = windows.get_mut(key).filter(|w| w.reset_at > now) {
            if current.count >= limit {
                return (*current, false);
            }
            current.count += 1;
            return (*current, true);
        }
        let fresh = Window {
            count: 1,
            reset_at: now + window,
        };
        windows.insert(key.to_string(), fresh);
        (fresh, limit > 0)
    }

    fn expire(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, w| w.reset_at > now);
        before - windows.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: Instant,
}

impl Decision {
    /// Whole seconds until the window resets, rounded up and never below one.
    pub fn retry_after(&self, now: Instant) -> u64 {
        let wait = self.reset_at.saturating_duration_since(now);
        let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        secs.max(1)
    }
}

/// Per-subject, per-endpoint fixed window admission gate.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::default()))
    }

    pub fn check_limit(&self, subject: &str, endpoint: &str, limit: u32, window: Duration) -> Decision {
        self.check_limit_at(subject, endpoint, limit, window, Instant::now())
    }

    pub fn check_limit_at(
        &self,
        subject: &str,
        endpoint: &str,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> Decision {
        let key = format!("{subject}:{endpoint}");
        let (state, allowed) = self.store.incr(&key, limit, window, now);
        if !allowed {
            debug!(subject=%subject, endpoint=%endpoint, "rate limit exceeded");
        }
        Decision {
            allowed,
            remaining: limit.saturating_sub(state.count),
            reset_at: state.reset_at,
        }
    }

    pub fn cleanup(&self) -> usize {
        self.store.expire(Instant::now())
    }

    /// Periodically drop elapsed windows until the returned task is aborted.
    pub fn spawn_cleanup(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let removed = limiter.cleanup();
                if removed > 0 {
                    debug!(removed, "expired rate limit windows");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn admits_exactly_limit_requests_per_window() {
        let limiter = RateLimiter::in_memory();
        let now = Instant::now();
        for i in 0..5 {
            let decision = limiter.check_limit_at("user-1", "voice", 5, MINUTE, now);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 4 - i);
        }
        let rejected = limiter.check_limit_at("user-1", "voice", 5, MINUTE, now);
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.reset_at, now + MINUTE);
    }

    #[test]
    fn window_resets_after_elapsing() {
        let store = Arc::new(InMemoryStore::default());
        let limiter = RateLimiter::new(store.clone());
        let now = Instant::now();
        for _ in 0..3 {
            limiter.check_limit_at("user-1", "voice", 2, MINUTE, now);
        }
        let later = now + MINUTE;
        let decision = limiter.check_limit_at("user-1", "voice", 2, MINUTE, later);
        assert!(decision.allowed);
        assert_eq!(store.get("user-1:voice", later).map(|w| w.count), Some(1));
        assert_eq!(decision.reset_at, later + MINUTE);
    }

    #[test]
    fn subjects_and_endpoints_are_independent() {
        let limiter = RateLimiter::in_memory();
        let now = Instant::now();
        assert!(limiter.check_limit_at("a", "voice", 1, MINUTE, now).allowed);
        assert!(!limiter.check_limit_at("a", "voice", 1, MINUTE, now).allowed);
        assert!(limiter.check_limit_at("b", "voice", 1, MINUTE, now).allowed);
        assert!(limiter.check_limit_at("a", "token", 1, MINUTE, now).allowed);
    }

    #[test]
    fn expire_only_removes_elapsed_windows() {
        let store = InMemoryStore::default();
        let now = Instant::now();
        store.incr("short", 5, Duration::from_secs(1), now);
        store.incr("long", 5, MINUTE, now);
        assert_eq!(store.expire(now + Duration::from_secs(2)), 1);
        assert!(store.get("long", now + Duration::from_secs(2)).is_some());
        assert!(store.get("short", now + Duration::from_secs(2)).is_none());
    }

    #[test]
    fn retry_after_rounds_up() {
        let now = Instant::now();
        let decision = Decision {
            allowed: false,
            remaining: 0,
            reset_at: now + Duration::from_millis(1_500),
        };
        assert_eq!(decision.retry_after(now), 2);
        assert_eq!(decision.retry_after(now + Duration::from_secs(5)), 1);
    }

    #[test]
    fn concurrent_requests_never_over_admit() {
        let limiter = RateLimiter::in_memory();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.check_limit("user", "voice", 100, MINUTE).allowed)
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }
}
