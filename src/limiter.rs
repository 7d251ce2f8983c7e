use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

/// Decision for one request against a user's sliding window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

/// Per-user sliding-window request limiter, the companion guard in front of
/// the admission queue. A limited request never reaches the queue or the
/// record store.
#[derive(Debug)]
pub struct RequestRateLimiter {
    max_requests: usize,
    window: Duration,
    requests: HashMap<String, VecDeque<Instant>>,
}

impl RequestRateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: HashMap::new(),
        }
    }

    /// Record one request attempt for `owner_id`. Allowed attempts consume a
    /// slot in the window; limited attempts do not.
    pub fn check(&mut self, owner_id: &str) -> RateDecision {
        let now = Instant::now();
        let window = self.window;
        let stamps = self.requests.entry(owner_id.to_string()).or_default();
        while stamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            stamps.pop_front();
        }
        if stamps.len() < self.max_requests {
            stamps.push_back(now);
            return RateDecision::Allowed;
        }
        let oldest = stamps.front().copied().unwrap_or(now);
        RateDecision::Limited {
            retry_after: window.saturating_sub(now.duration_since(oldest)),
        }
    }

    /// Drop users whose windows have fully expired. Returns how many were
    /// removed. Called from the scheduler's periodic sweep.
    pub fn prune_idle(&mut self) -> usize {
        let now = Instant::now();
        let window = self.window;
        let before = self.requests.len();
        self.requests.retain(|_, stamps| {
            stamps.retain(|t| now.duration_since(*t) < window);
            !stamps.is_empty()
        });
        before - self.requests.len()
    }

    pub fn tracked_users(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    fn limiter(max: usize, window_secs: u64) -> RequestRateLimiter {
        RequestRateLimiter::new(max, Duration::from_secs(window_secs))
    }

    #[tokio::test(start_paused = true)]
    async fn allows_up_to_max_within_window() {
        let mut limiter = limiter(3, 60);
        assert_eq!(limiter.check("a"), RateDecision::Allowed);
        assert_eq!(limiter.check("a"), RateDecision::Allowed);
        assert_eq!(limiter.check("a"), RateDecision::Allowed);
        assert!(matches!(
            limiter.check("a"),
            RateDecision::Limited { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn users_are_limited_independently() {
        let mut limiter = limiter(1, 60);
        assert_eq!(limiter.check("a"), RateDecision::Allowed);
        assert_eq!(limiter.check("b"), RateDecision::Allowed);
        assert!(matches!(limiter.check("a"), RateDecision::Limited { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_open_again() {
        let mut limiter = limiter(2, 60);
        assert_eq!(limiter.check("a"), RateDecision::Allowed);
        time::advance(Duration::from_secs(30)).await;
        assert_eq!(limiter.check("a"), RateDecision::Allowed);
        assert!(matches!(limiter.check("a"), RateDecision::Limited { .. }));

        // The first stamp expires at t=60; only the t=30 stamp remains.
        time::advance(Duration::from_secs(31)).await;
        assert_eq!(limiter.check("a"), RateDecision::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_counts_down_from_oldest_stamp() {
        let mut limiter = limiter(1, 60);
        assert_eq!(limiter.check("a"), RateDecision::Allowed);
        time::advance(Duration::from_secs(45)).await;
        match limiter.check("a") {
            RateDecision::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(15));
            }
            RateDecision::Allowed => panic!("expected limited"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_expired_users() {
        let mut limiter = limiter(2, 60);
        limiter.check("a");
        limiter.check("b");
        assert_eq!(limiter.tracked_users(), 2);

        assert_eq!(limiter.prune_idle(), 0);
        time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.prune_idle(), 2);
        assert_eq!(limiter.tracked_users(), 0);
    }
}
