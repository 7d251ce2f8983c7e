use std::time::Duration;

/// Tunables for admission control, provider polling and queue hygiene.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of jobs a single user may have in flight.
    pub max_concurrent_per_user: usize,
    /// Upper bound on the pending queue before new work is rejected.
    pub max_pending: usize,
    /// Submission retries before a job is failed.
    pub max_retries: u32,
    /// Delay between a successful submission and the first status poll.
    pub initial_poll_delay: Duration,
    /// Spacing between status polls while the provider reports processing.
    pub poll_interval: Duration,
    /// Poll budget per job. Also bounds the per-job wall clock at
    /// `max_poll_attempts * poll_interval`.
    pub max_poll_attempts: u32,
    /// Ceiling for transient-poll-error backoff.
    pub max_poll_backoff: Duration,
    /// Tick of the dispatch loop.
    pub dispatch_interval: Duration,
    /// Tick of the stuck-entry sweep.
    pub sweep_interval: Duration,
    /// In-flight age beyond which a job is presumed stuck and force-failed.
    pub stuck_age_threshold: Duration,
    /// Requests a user may make within `rate_limit_window`.
    pub rate_limit_max_requests: usize,
    /// Sliding window for the per-user request rate limiter.
    pub rate_limit_window: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_user: 2,
            max_pending: 1000,
            max_retries: 3,
            initial_poll_delay: Duration::from_secs(30),
            poll_interval: Duration::from_secs(10),
            max_poll_attempts: 120,
            max_poll_backoff: Duration::from_secs(60),
            dispatch_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(300),
            stuck_age_threshold: Duration::from_secs(3600),
            rate_limit_max_requests: 10,
            rate_limit_window: Duration::from_secs(60),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_concurrent_per_user(mut self, max: usize) -> Self {
        self.max_concurrent_per_user = max;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_rate_limit(mut self, max_requests: usize, window: Duration) -> Self {
        self.rate_limit_max_requests = max_requests;
        self.rate_limit_window = window;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.max_concurrent_per_user, 2);
        assert_eq!(cfg.max_pending, 1000);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.initial_poll_delay, Duration::from_secs(30));
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
        assert_eq!(cfg.max_poll_attempts, 120);
        assert_eq!(cfg.max_poll_backoff, Duration::from_secs(60));
        assert_eq!(cfg.dispatch_interval, Duration::from_secs(1));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(300));
        assert_eq!(cfg.rate_limit_max_requests, 10);
        assert_eq!(cfg.rate_limit_window, Duration::from_secs(60));
    }

    #[test]
    fn config_poll_budget_is_twenty_minutes() {
        let cfg = OrchestratorConfig::default();
        let budget = cfg.poll_interval * cfg.max_poll_attempts;
        assert_eq!(budget, Duration::from_secs(1200));
        assert!(cfg.stuck_age_threshold > budget);
    }

    #[test]
    fn config_builders() {
        let cfg = OrchestratorConfig::default()
            .with_max_concurrent_per_user(4)
            .with_max_retries(1)
            .with_rate_limit(5, Duration::from_secs(30));
        assert_eq!(cfg.max_concurrent_per_user, 4);
        assert_eq!(cfg.max_retries, 1);
        assert_eq!(cfg.rate_limit_max_requests, 5);
        assert_eq!(cfg.rate_limit_window, Duration::from_secs(30));
    }
}
