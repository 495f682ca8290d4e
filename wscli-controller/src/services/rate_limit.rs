//! Per-caller session-creation rate limiting.
//!
//! Fixed window per owner id: the first request in a window starts the
//! clock, and request `max + 1` within the same window is rejected together
//! with the time remaining until the window rolls over (surfaced to the
//! caller as `Retry-After`). State is per replica; callers spread across
//! replicas get proportionally more headroom, which is acceptable for an
//! admission limit.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use wscli_types::OwnerId;

/// Exceeded limit; retry after the contained duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limited, retry after {0:?}")]
pub struct RateLimited(
    /// Time until the caller's window rolls over.
    pub Duration,
);

struct Window {
    started_at: Instant,
    count: u32,
}

/// Fixed-window rate limiter keyed by owner id.
pub struct RateLimiter {
    window: Duration,
    max: u32,
    skip_paths: Vec<String>,
    state: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// Creates a limiter with the given window, per-window maximum, and
    /// exempt paths.
    pub fn new(window: Duration, max: u32, skip_paths: Vec<String>) -> Self {
        Self {
            window,
            max,
            skip_paths,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Accounts one request of `owner` on `path`.
    pub fn check(&self, owner: &OwnerId, path: &str) -> Result<(), RateLimited> {
        if self.skip_paths.iter().any(|skip| skip == path) {
            return Ok(());
        }
        let now = Instant::now();
        let mut state = self.state.lock();
        let window = state.entry(owner.as_str().to_owned()).or_insert(Window {
            started_at: now,
            count: 0,
        });
        let elapsed = now.duration_since(window.started_at);
        if elapsed >= self.window {
            window.started_at = now;
            window.count = 0;
        }
        window.count = window.count.saturating_add(1);
        if window.count > self.max {
            Err(RateLimited(self.window.saturating_sub(elapsed)))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/api/sessions";

    #[test]
    fn requests_within_the_window_limit_pass() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3, Vec::new());
        let owner = OwnerId::new("caller-1");
        for _ in 0..3 {
            assert!(limiter.check(&owner, PATH).is_ok());
        }
        let err = limiter.check(&owner, PATH).unwrap_err();
        assert!(err.0 <= Duration::from_secs(60));
    }

    #[test]
    fn owners_are_limited_independently() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1, Vec::new());
        let alice = OwnerId::new("alice");
        let bob = OwnerId::new("bob");
        assert!(limiter.check(&alice, PATH).is_ok());
        assert!(limiter.check(&alice, PATH).is_err());
        assert!(limiter.check(&bob, PATH).is_ok());
    }

    #[test]
    fn skip_paths_are_exempt() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1, vec![PATH.to_owned()]);
        let owner = OwnerId::new("caller-1");
        for _ in 0..10 {
            assert!(limiter.check(&owner, PATH).is_ok());
        }
        assert!(limiter.check(&owner, "/other").is_ok());
        assert!(limiter.check(&owner, "/other").is_err());
    }

    #[test]
    fn window_rollover_resets_the_count() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 1, Vec::new());
        let owner = OwnerId::new("caller-1");
        assert!(limiter.check(&owner, PATH).is_ok());
        assert!(limiter.check(&owner, PATH).is_err());
        std::thread::sleep(Duration::from_millis(25));
        assert!(limiter.check(&owner, PATH).is_ok());
    }
}
