//! PostgreSQL-backed attempt counter store using the `mfa_attempt_counters`
//! table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use stepauth_application::AttemptCounterStore;
use stepauth_core::{AppError, AppResult, SubjectKey};
use stepauth_domain::AttemptCounter;

/// PostgreSQL implementation of the attempt counter store port.
#[derive(Clone)]
pub struct PostgresAttemptStore {
    pool: PgPool,
}

impl PostgresAttemptStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptCounterStore for PostgresAttemptStore {
    async fn record_failure(
        &self,
        subject_key: &SubjectKey,
        max_failures: i32,
        cooldown_seconds: i64,
    ) -> AppResult<AttemptCounter> {
        // Single UPSERT so concurrent failures cannot race past the
        // threshold: an expired lockout restarts the count at 1, and the
        // row locks itself the moment the count reaches the maximum.
        let row = sqlx::query_as::<_, CounterRow>(
            r#"
            INSERT INTO mfa_attempt_counters (subject_key, failure_count, locked_until, last_failure_at)
            VALUES (
                $1,
                1,
                CASE WHEN 1 >= $2 THEN now() + make_interval(secs => $3::float8) END,
                now()
            )
            ON CONFLICT (subject_key) DO UPDATE
            SET
                failure_count = CASE
                    WHEN mfa_attempt_counters.locked_until IS NOT NULL
                         AND mfa_attempt_counters.locked_until <= now()
                    THEN 1
                    ELSE mfa_attempt_counters.failure_count + 1
                END,
                locked_until = CASE
                    WHEN mfa_attempt_counters.locked_until IS NOT NULL
                         AND mfa_attempt_counters.locked_until <= now()
                    THEN CASE WHEN 1 >= $2 THEN now() + make_interval(secs => $3::float8) END
                    WHEN mfa_attempt_counters.failure_count + 1 >= $2
                    THEN now() + make_interval(secs => $3::float8)
                    ELSE mfa_attempt_counters.locked_until
                END,
                last_failure_at = now()
            RETURNING subject_key, failure_count, locked_until, last_failure_at
            "#,
        )
        .bind(subject_key.as_str())
        .bind(max_failures)
        .bind(cooldown_seconds as f64)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Storage(format!("failed to record failed attempt: {error}"))
        })?;

        Ok(row.into())
    }

    async fn find(&self, subject_key: &SubjectKey) -> AppResult<Option<AttemptCounter>> {
        let row = sqlx::query_as::<_, CounterRow>(
            r#"
            SELECT subject_key, failure_count, locked_until, last_failure_at
            FROM mfa_attempt_counters
            WHERE subject_key = $1
            "#,
        )
        .bind(subject_key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Storage(format!("failed to load attempt counter: {error}"))
        })?;

        Ok(row.map(CounterRow::into))
    }

    async fn reset(&self, subject_key: &SubjectKey) -> AppResult<()> {
        sqlx::query("DELETE FROM mfa_attempt_counters WHERE subject_key = $1")
            .bind(subject_key.as_str())
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Storage(format!("failed to reset attempt counter: {error}"))
            })?;

        Ok(())
    }

    async fn cleanup_idle(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM mfa_attempt_counters
            WHERE last_failure_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Storage(format!("failed to cleanup idle attempt counters: {error}"))
        })?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CounterRow {
    subject_key: String,
    failure_count: i32,
    locked_until: Option<DateTime<Utc>>,
    last_failure_at: DateTime<Utc>,
}

impl From<CounterRow> for AttemptCounter {
    fn from(row: CounterRow) -> Self {
        Self {
            subject_key: row.subject_key,
            failure_count: row.failure_count,
            locked_until: row.locked_until,
            last_failure_at: row.last_failure_at,
        }
    }
}
