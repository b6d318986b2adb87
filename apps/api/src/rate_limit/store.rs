use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::Script;
use uuid::Uuid;

use super::{RateLimitConfig, RateLimitDecision, RateLimitError, RateLimitInfo, RateLimitRecord};

/// Backing storage for per-client rate limit records.
///
/// Implementations must apply `check_and_record` atomically per client so
/// requests from one client are judged in arrival order.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn check_and_record(
        &self,
        client_id: &str,
        now: DateTime<Utc>,
        config: &RateLimitConfig,
    ) -> Result<RateLimitDecision, RateLimitError>;

    /// Removes records that can no longer influence a decision.
    async fn sweep_idle(&self, now: DateTime<Utc>, config: &RateLimitConfig) -> usize;
}

/// Process-local store. Records are created lazily on a client's first request.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl MemoryStore {
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn check_and_record(
        &self,
        client_id: &str,
        now: DateTime<Utc>,
        config: &RateLimitConfig,
    ) -> Result<RateLimitDecision, RateLimitError> {
        // Records stay consistent across a poisoned lock.
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = records.entry(client_id.to_string()).or_default();
        Ok(record.check_and_record(now, config))
    }

    async fn sweep_idle(&self, now: DateTime<Utc>, config: &RateLimitConfig) -> usize {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|_, record| !record.is_idle(now, config));
        before - records.len()
    }
}

/// KEYS[1] = sorted set of request timestamps (ms), KEYS[2] = blocked-until (ms)
/// ARGV = now_ms, window_ms, max_requests, member
///
/// Returns {allowed, count, blocked_until_ms}.
const CHECK_AND_RECORD_LUA: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])

local blocked = redis.call('GET', KEYS[2])
if blocked and tonumber(blocked) > now then
  return {0, 0, tonumber(blocked)}
end

redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
if count >= max then
  local until_ms = now + window
  redis.call('SET', KEYS[2], until_ms, 'PX', window)
  return {0, count, until_ms}
end

redis.call('ZADD', KEYS[1], now, ARGV[4])
redis.call('PEXPIRE', KEYS[1], window)
return {1, count + 1, 0}
"#;

/// Redis-backed store shared by every instance behind a load balancer.
///
/// The whole decision runs as one Lua script, so it is atomic across
/// instances. Keys expire with the window; nothing needs sweeping.
pub struct RedisStore {
    client: redis::Client,
    key_prefix: String,
    script: Script,
}

impl RedisStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            key_prefix: "zume:ratelimit".to_string(),
            script: Script::new(CHECK_AND_RECORD_LUA),
        }
    }

    fn keys(&self, client_id: &str) -> (String, String) {
        (
            format!("{}:{}:requests", self.key_prefix, client_id),
            format!("{}:{}:blocked", self.key_prefix, client_id),
        )
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn check_and_record(
        &self,
        client_id: &str,
        now: DateTime<Utc>,
        config: &RateLimitConfig,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let (requests_key, blocked_key) = self.keys(client_id);
        let window_ms = config.window().num_milliseconds();

        let (allowed, count, blocked_until_ms): (i64, i64, i64) = self
            .script
            .key(&requests_key)
            .key(&blocked_key)
            .arg(now.timestamp_millis())
            .arg(window_ms)
            .arg(config.max_requests)
            .arg(Uuid::new_v4().to_string())
            .invoke_async(&mut conn)
            .await?;

        if allowed == 1 {
            let used = u32::try_from(count).unwrap_or(u32::MAX);
            return Ok(RateLimitDecision::Allowed(RateLimitInfo {
                limit: config.max_requests,
                remaining: config.max_requests.saturating_sub(used),
                reset: (now + config.window()).timestamp(),
            }));
        }

        let blocked_until = Utc
            .timestamp_millis_opt(blocked_until_ms)
            .single()
            .ok_or_else(|| {
                RateLimitError::InvalidReply(format!("blocked_until {blocked_until_ms}"))
            })?;
        Ok(RateLimitDecision::Denied { blocked_until })
    }

    async fn sweep_idle(&self, _now: DateTime<Utc>, _config: &RateLimitConfig) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_creates_records_lazily() {
        let store = MemoryStore::default();
        let cfg = RateLimitConfig::default();
        assert_eq!(store.len(), 0);

        store.check_and_record("10.0.0.1", at(0), &cfg).await.unwrap();
        store.check_and_record("10.0.0.1", at(1), &cfg).await.unwrap();
        store.check_and_record("10.0.0.2", at(1), &cfg).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_idle_records() {
        let store = MemoryStore::default();
        let cfg = RateLimitConfig {
            max_requests: 1,
            window_seconds: 60,
        };

        store.check_and_record("idle", at(0), &cfg).await.unwrap();
        store.check_and_record("active", at(50), &cfg).await.unwrap();
        store.check_and_record("blocked", at(0), &cfg).await.unwrap();
        store.check_and_record("blocked", at(40), &cfg).await.unwrap(); // blocked until t=100

        let evicted = store.sweep_idle(at(70), &cfg).await;
        assert_eq!(evicted, 1);
        assert_eq!(store.len(), 2);

        // The blocked client is still rejected after the sweep.
        let decision = store.check_and_record("blocked", at(71), &cfg).await.unwrap();
        assert!(!decision.is_allowed());
    }

    #[test]
    fn test_redis_keys_are_namespaced_per_client() {
        let client = redis::Client::open("redis://127.0.0.1/").unwrap();
        let store = RedisStore::new(client);
        let (requests, blocked) = store.keys("203.0.113.9");
        assert_eq!(requests, "zume:ratelimit:203.0.113.9:requests");
        assert_eq!(blocked, "zume:ratelimit:203.0.113.9:blocked");
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_redis_store_block_scenario_three_per_minute() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let store = RedisStore::new(redis::Client::open(url).unwrap());
        let cfg = RateLimitConfig {
            max_requests: 3,
            window_seconds: 60,
        };
        let client = format!("test-{}", Uuid::new_v4());

        for (t, expected_remaining) in [(0, 2), (10, 1), (20, 0)] {
            match store.check_and_record(&client, at(t), &cfg).await.unwrap() {
                RateLimitDecision::Allowed(info) => {
                    assert_eq!(info.remaining, expected_remaining, "t={t}");
                    assert_eq!(info.reset, at(t + 60).timestamp());
                }
                other => panic!("t={t}: unexpected {other:?}"),
            }
        }

        for t in [25, 50] {
            match store.check_and_record(&client, at(t), &cfg).await.unwrap() {
                RateLimitDecision::Denied { blocked_until } => {
                    assert_eq!(blocked_until, at(85), "t={t}")
                }
                other => panic!("t={t}: unexpected {other:?}"),
            }
        }

        match store.check_and_record(&client, at(86), &cfg).await.unwrap() {
            RateLimitDecision::Allowed(info) => assert_eq!(info.remaining, 2),
            other => panic!("t=86: unexpected {other:?}"),
        }
    }
}
