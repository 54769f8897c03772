//! In-memory attempt counter store implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use stepauth_application::AttemptCounterStore;
use stepauth_core::{AppResult, SubjectKey};
use stepauth_domain::AttemptCounter;

/// In-memory attempt counter store.
///
/// The whole read-modify-write of `record_failure` happens under a single
/// write lock, matching the atomicity of the Postgres UPSERT.
#[derive(Debug, Default)]
pub struct InMemoryAttemptStore {
    counters: RwLock<HashMap<String, AttemptCounter>>,
}

impl InMemoryAttemptStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptCounterStore for InMemoryAttemptStore {
    async fn record_failure(
        &self,
        subject_key: &SubjectKey,
        max_failures: i32,
        cooldown_seconds: i64,
    ) -> AppResult<AttemptCounter> {
        let mut counters = self.counters.write().await;
        let now = Utc::now();

        let entry = counters
            .entry(subject_key.as_str().to_owned())
            .or_insert_with(|| AttemptCounter {
                subject_key: subject_key.as_str().to_owned(),
                failure_count: 0,
                locked_until: None,
                last_failure_at: now,
            });

        // An expired lockout restarts the count.
        if entry.locked_until.is_some_and(|until| until <= now) {
            entry.failure_count = 0;
            entry.locked_until = None;
        }

        entry.failure_count += 1;
        entry.last_failure_at = now;
        if entry.failure_count >= max_failures {
            entry.locked_until = Some(now + Duration::seconds(cooldown_seconds));
        }

        Ok(entry.clone())
    }

    async fn find(&self, subject_key: &SubjectKey) -> AppResult<Option<AttemptCounter>> {
        let counters = self.counters.read().await;
        Ok(counters.get(subject_key.as_str()).cloned())
    }

    async fn reset(&self, subject_key: &SubjectKey) -> AppResult<()> {
        self.counters.write().await.remove(subject_key.as_str());
        Ok(())
    }

    async fn cleanup_idle(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let mut counters = self.counters.write().await;
        let initial = counters.len();
        counters.retain(|_, counter| counter.last_failure_at >= before);
        Ok((initial - counters.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use stepauth_application::AttemptCounterStore;
    use stepauth_core::SubjectKey;

    use super::InMemoryAttemptStore;

    fn subject(value: &str) -> SubjectKey {
        match SubjectKey::new(value) {
            Ok(key) => key,
            Err(error) => panic!("invalid test subject key: {error}"),
        }
    }

    #[tokio::test]
    async fn reaching_the_threshold_sets_the_lockout() {
        let store = InMemoryAttemptStore::new();
        let key = subject("login:threshold");

        for expected in 1..=2 {
            let counter = store.record_failure(&key, 3, 300).await;
            assert!(counter.is_ok_and(|counter| {
                counter.failure_count == expected && counter.locked_until.is_none()
            }));
        }

        let counter = store.record_failure(&key, 3, 300).await;
        assert!(counter.is_ok_and(|counter| counter.locked_until.is_some()));
    }

    #[tokio::test]
    async fn concurrent_failures_count_every_attempt() {
        let store = std::sync::Arc::new(InMemoryAttemptStore::new());
        let key = subject("login:race");

        let (first, second) = tokio::join!(
            store.record_failure(&key, 5, 300),
            store.record_failure(&key, 5, 300),
        );
        assert!(first.is_ok());
        assert!(second.is_ok());

        let counter = store.find(&key).await;
        assert!(counter.is_ok_and(|counter| {
            counter.is_some_and(|counter| counter.failure_count == 2)
        }));
    }

    #[tokio::test]
    async fn cleanup_evicts_idle_counters_only() {
        let store = InMemoryAttemptStore::new();
        let stale = subject("login:stale");
        let fresh = subject("login:fresh");

        let recorded = store.record_failure(&stale, 5, 300).await;
        assert!(recorded.is_ok());

        // Make the first counter look idle, then add a fresh one.
        let cutoff = Utc::now() + Duration::seconds(1);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let recorded = store.record_failure(&fresh, 5, 300).await;
        assert!(recorded.is_ok());

        let evicted = store.cleanup_idle(cutoff).await;
        assert_eq!(evicted.ok(), Some(1));

        let remaining = store.find(&fresh).await;
        assert!(remaining.is_ok_and(|counter| counter.is_some()));
    }
}
