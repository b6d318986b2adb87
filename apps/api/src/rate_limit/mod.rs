//! Per-client sliding-window rate limiting.
//!
//! Every client identifier (the peer IP for HTTP traffic) owns a
//! [`RateLimitRecord`]: the timestamps of its requests inside the trailing
//! window plus an optional `blocked_until`. Reaching `max_requests` inside the
//! window blocks the client for a flat `window_seconds` from that moment.
//!
//! Records live behind a [`RateLimitStore`] so a single process can keep them in
//! memory while a multi-instance deployment shares them through Redis.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

pub mod middleware;
pub mod store;

pub use store::{MemoryStore, RateLimitStore, RedisStore};

/// Upper bound on `window_seconds`.
pub const MAX_WINDOW_SECONDS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_seconds: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_seconds.min(MAX_WINDOW_SECONDS) as i64)
    }
}

/// Quota metadata surfaced as `X-RateLimit-*` headers on allowed requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp (seconds) at which the current window resets.
    pub reset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed(RateLimitInfo),
    Denied { blocked_until: DateTime<Utc> },
}

#[cfg(test)]
impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed(_))
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Unexpected store reply: {0}")]
    InvalidReply(String),
}

/// Request history for one client identifier.
#[derive(Debug, Clone, Default)]
pub struct RateLimitRecord {
    pub requests: VecDeque<DateTime<Utc>>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl RateLimitRecord {
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    /// Applies one request at `now` to this record.
    ///
    /// While blocked the request is rejected without being recorded and the
    /// history is left untouched. Otherwise entries at least one window old are
    /// dropped; a full window re-arms the block for `window_seconds` from `now`.
    pub fn check_and_record(
        &mut self,
        now: DateTime<Utc>,
        config: &RateLimitConfig,
    ) -> RateLimitDecision {
        if let Some(until) = self.blocked_until {
            if now < until {
                return RateLimitDecision::Denied {
                    blocked_until: until,
                };
            }
        }

        let window = config.window();
        while self
            .requests
            .front()
            .is_some_and(|&t| now.signed_duration_since(t) >= window)
        {
            self.requests.pop_front();
        }

        if self.requests.len() >= config.max_requests as usize {
            let until = now + window;
            self.blocked_until = Some(until);
            return RateLimitDecision::Denied {
                blocked_until: until,
            };
        }

        self.requests.push_back(now);
        let used = u32::try_from(self.requests.len()).unwrap_or(u32::MAX);
        RateLimitDecision::Allowed(RateLimitInfo {
            limit: config.max_requests,
            remaining: config.max_requests.saturating_sub(used),
            reset: (now + window).timestamp(),
        })
    }

    /// True when the record carries no state that could affect a future request.
    pub fn is_idle(&self, now: DateTime<Utc>, config: &RateLimitConfig) -> bool {
        if self.is_blocked(now) {
            return false;
        }
        let window = config.window();
        self.requests
            .back()
            .map_or(true, |&last| now.signed_duration_since(last) >= window)
    }
}

/// The limiter consulted by the HTTP middleware. Cheap to clone via `Arc`.
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self { config, store }
    }

    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::default()))
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub async fn check_and_record(
        &self,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let decision = self
            .store
            .check_and_record(client_id, now, &self.config)
            .await?;
        if let RateLimitDecision::Denied { blocked_until } = decision {
            debug!("Rate limit hit for {client_id}, blocked until {blocked_until}");
        }
        Ok(decision)
    }

    /// Drops idle client records. Returns how many were evicted.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.store.sweep_idle(now, &self.config).await
    }
}

/// Periodically evicts idle client records so the table does not grow for the
/// lifetime of the process.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = limiter.sweep(Utc::now()).await;
            if evicted > 0 {
                info!("Rate limiter evicted {evicted} idle client records");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn config(max_requests: u32, window_seconds: u64) -> RateLimitConfig {
        RateLimitConfig {
            max_requests,
            window_seconds,
        }
    }

    fn remaining(decision: RateLimitDecision) -> u32 {
        match decision {
            RateLimitDecision::Allowed(info) => info.remaining,
            RateLimitDecision::Denied { .. } => panic!("expected request to be allowed"),
        }
    }

    #[test]
    fn test_block_scenario_three_per_minute() {
        let cfg = config(3, 60);
        let mut record = RateLimitRecord::default();

        assert_eq!(remaining(record.check_and_record(at(0), &cfg)), 2);
        assert_eq!(remaining(record.check_and_record(at(10), &cfg)), 1);
        assert_eq!(remaining(record.check_and_record(at(20), &cfg)), 0);

        assert_eq!(
            record.check_and_record(at(25), &cfg),
            RateLimitDecision::Denied {
                blocked_until: at(85)
            }
        );
        assert!(!record.check_and_record(at(50), &cfg).is_allowed());

        // t=86: the original window has long expired, a fresh one starts here.
        assert_eq!(remaining(record.check_and_record(at(86), &cfg)), 2);
        assert_eq!(record.requests.len(), 1);
    }

    #[test]
    fn test_block_outlives_original_window() {
        let cfg = config(2, 60);
        let mut record = RateLimitRecord::default();
        record.check_and_record(at(0), &cfg);
        record.check_and_record(at(1), &cfg);

        // Blocked at t=59 until t=119, even though t=0/t=1 age out at t=60/61.
        assert!(!record.check_and_record(at(59), &cfg).is_allowed());
        assert!(!record.check_and_record(at(70), &cfg).is_allowed());
        assert!(!record.check_and_record(at(118), &cfg).is_allowed());
        assert!(record.check_and_record(at(119), &cfg).is_allowed());
    }

    #[test]
    fn test_denied_while_blocked_does_not_record() {
        let cfg = config(1, 60);
        let mut record = RateLimitRecord::default();
        record.check_and_record(at(0), &cfg);
        assert!(!record.check_and_record(at(5), &cfg).is_allowed());
        let before = record.requests.clone();

        assert!(!record.check_and_record(at(30), &cfg).is_allowed());
        assert_eq!(record.requests, before);
        assert_eq!(record.blocked_until, Some(at(65)));
    }

    #[test]
    fn test_remaining_decreases_monotonically_under_limit() {
        let cfg = config(10, 60);
        let mut record = RateLimitRecord::default();
        let mut last = u32::MAX;
        for t in 0..10 {
            let r = remaining(record.check_and_record(at(t * 5), &cfg));
            assert!(r < last, "remaining should shrink: {r} after {last}");
            last = r;
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn test_entries_expire_exactly_at_window_boundary() {
        let cfg = config(1, 60);
        let mut record = RateLimitRecord::default();
        assert!(record.check_and_record(at(0), &cfg).is_allowed());
        // now - t == window: the old entry no longer counts.
        assert!(record.check_and_record(at(60), &cfg).is_allowed());
    }

    #[test]
    fn test_reset_is_now_plus_window() {
        let cfg = config(5, 60);
        let mut record = RateLimitRecord::default();
        match record.check_and_record(at(7), &cfg) {
            RateLimitDecision::Allowed(info) => {
                assert_eq!(info.limit, 5);
                assert_eq!(info.reset, at(67).timestamp());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_idle_detection() {
        let cfg = config(1, 60);
        let mut record = RateLimitRecord::default();
        assert!(record.is_idle(at(0), &cfg));

        record.check_and_record(at(0), &cfg);
        assert!(!record.is_idle(at(30), &cfg));

        record.check_and_record(at(30), &cfg); // blocks until t=90
        assert!(!record.is_idle(at(80), &cfg));
        assert!(record.is_idle(at(90), &cfg));
    }

    #[tokio::test]
    async fn test_limiter_keeps_clients_independent() {
        let limiter = RateLimiter::in_memory(config(1, 60));
        assert!(limiter
            .check_and_record("10.0.0.1", at(0))
            .await
            .unwrap()
            .is_allowed());
        assert!(!limiter
            .check_and_record("10.0.0.1", at(1))
            .await
            .unwrap()
            .is_allowed());
        assert!(limiter
            .check_and_record("10.0.0.2", at(1))
            .await
            .unwrap()
            .is_allowed());
    }

    #[test]
    fn test_window_is_clamped() {
        let cfg = config(1, u64::MAX);
        assert_eq!(cfg.window(), chrono::Duration::seconds(MAX_WINDOW_SECONDS as i64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_survives_zero_period() {
        let limiter = Arc::new(RateLimiter::in_memory(config(1, 60)));
        let sweeper = spawn_sweeper(limiter, Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!sweeper.is_finished());
        sweeper.abort();
    }
}
