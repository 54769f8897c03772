//! Redis-backed attempt counter store.
//!
//! Suited for deployments that keep lockout state in a shared cache
//! instead of the primary database. Counters live in a hash per subject
//! key; idle eviction rides on the key TTL instead of a sweep.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::Script;

use stepauth_application::AttemptCounterStore;
use stepauth_core::{AppError, AppResult, SubjectKey};
use stepauth_domain::AttemptCounter;

// Counters idle for a day default back to "no lockout".
const IDLE_TTL_SECONDS: i64 = 86_400;

const RECORD_FAILURE_SCRIPT: &str = r#"
local key = KEYS[1]
local max_failures = tonumber(ARGV[1])
local cooldown = tonumber(ARGV[2])
local now_epoch = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local locked_until = tonumber(redis.call('HGET', key, 'locked_until') or '0')
local count
if locked_until > 0 and locked_until <= now_epoch then
  count = 1
  locked_until = 0
else
  count = tonumber(redis.call('HINCRBY', key, 'failure_count', 1))
end

if count >= max_failures then
  locked_until = now_epoch + cooldown
end

redis.call('HSET', key, 'failure_count', count, 'locked_until', locked_until, 'last_failure_at', now_epoch)
redis.call('EXPIRE', key, ttl)
return {count, locked_until}
"#;

/// Redis implementation of the attempt counter store port.
#[derive(Clone)]
pub struct RedisAttemptStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisAttemptStore {
    /// Creates a store with a configured Redis client and key prefix.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, subject_key: &SubjectKey) -> String {
        format!("{}:{subject_key}", self.key_prefix)
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Storage(format!("failed to connect to redis: {error}")))
    }
}

fn lock_timestamp(epoch: i64) -> AppResult<Option<DateTime<Utc>>> {
    if epoch <= 0 {
        return Ok(None);
    }

    Utc.timestamp_opt(epoch, 0)
        .single()
        .map(Some)
        .ok_or_else(|| AppError::Storage(format!("invalid redis lock timestamp: {epoch}")))
}

#[async_trait]
impl AttemptCounterStore for RedisAttemptStore {
    async fn record_failure(
        &self,
        subject_key: &SubjectKey,
        max_failures: i32,
        cooldown_seconds: i64,
    ) -> AppResult<AttemptCounter> {
        let now = Utc::now();
        let mut connection = self.connection().await?;

        let script = Script::new(RECORD_FAILURE_SCRIPT);
        let (failure_count, locked_until_epoch): (i64, i64) = script
            .key(self.key_for(subject_key))
            .arg(max_failures)
            .arg(cooldown_seconds)
            .arg(now.timestamp())
            .arg(IDLE_TTL_SECONDS)
            .invoke_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Storage(format!("failed to record redis failed attempt: {error}"))
            })?;

        let failure_count = i32::try_from(failure_count).map_err(|error| {
            AppError::Storage(format!("invalid redis failure count: {error}"))
        })?;

        Ok(AttemptCounter {
            subject_key: subject_key.as_str().to_owned(),
            failure_count,
            locked_until: lock_timestamp(locked_until_epoch)?,
            last_failure_at: now,
        })
    }

    async fn find(&self, subject_key: &SubjectKey) -> AppResult<Option<AttemptCounter>> {
        let mut connection = self.connection().await?;

        let values: Vec<Option<i64>> = redis::cmd("HMGET")
            .arg(self.key_for(subject_key))
            .arg("failure_count")
            .arg("locked_until")
            .arg("last_failure_at")
            .query_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Storage(format!("failed to load redis attempt counter: {error}"))
            })?;

        let [Some(failure_count), locked_until_epoch, Some(last_failure_epoch)] = values[..]
        else {
            return Ok(None);
        };

        let failure_count = i32::try_from(failure_count).map_err(|error| {
            AppError::Storage(format!("invalid redis failure count: {error}"))
        })?;
        let last_failure_at = Utc
            .timestamp_opt(last_failure_epoch, 0)
            .single()
            .ok_or_else(|| {
                AppError::Storage(format!(
                    "invalid redis failure timestamp: {last_failure_epoch}"
                ))
            })?;

        Ok(Some(AttemptCounter {
            subject_key: subject_key.as_str().to_owned(),
            failure_count,
            locked_until: lock_timestamp(locked_until_epoch.unwrap_or(0))?,
            last_failure_at,
        }))
    }

    async fn reset(&self, subject_key: &SubjectKey) -> AppResult<()> {
        let mut connection = self.connection().await?;

        redis::cmd("DEL")
            .arg(self.key_for(subject_key))
            .query_async::<()>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Storage(format!("failed to reset redis attempt counter: {error}"))
            })?;

        Ok(())
    }

    async fn cleanup_idle(&self, _before: DateTime<Utc>) -> AppResult<u64> {
        // Keys expire through their TTL; nothing to sweep.
        Ok(0)
    }
}
