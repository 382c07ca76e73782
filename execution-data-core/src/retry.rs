//! Retry policy applied at the storage boundary.
//!
//! Resolution semantics never see retries: `RetryingStore` wraps any
//! backend and retries only transport failures. Uniqueness conflicts are
//! never retried.

use crate::store::{ExecutionDataStore, StoreError, StoreResult};
use crate::types::{Instance, Namespace};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

/// Exponential backoff policy for storage calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles on each further retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(exp))
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Store decorator that retries `Unavailable` errors per [`RetryPolicy`].
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ExecutionDataStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn retrying<T, F, Fut>(&self, op: &'static str, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = StoreResult<T>> + Send,
        T: Send,
    {
        let max = self.policy.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Err(StoreError::Unavailable(e)) if attempt < max => {
                    let backoff = self.policy.backoff_for(attempt);
                    tracing::warn!(
                        op,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Store call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<S: ExecutionDataStore> ExecutionDataStore for RetryingStore<S> {
    async fn insert(&self, namespace: Namespace, instance: &Instance) -> StoreResult<()> {
        let max = self.policy.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.insert(namespace, instance).await {
                Ok(()) => return Ok(()),
                // An earlier attempt may have committed before its response was lost.
                Err(err) if err.is_duplicate() && attempt > 1 => {
                    let landed = self.inner.find_by_ids(namespace, &[instance.uuid]).await?;
                    if landed.iter().any(|i| i.uuid == instance.uuid) {
                        tracing::debug!(
                            namespace = %namespace,
                            name = %instance.name,
                            uuid = %instance.uuid,
                            "Insert landed on an earlier attempt"
                        );
                        return Ok(());
                    }
                    return Err(err);
                }
                Err(StoreError::Unavailable(e)) if attempt < max => {
                    let backoff = self.policy.backoff_for(attempt);
                    tracing::warn!(
                        op = "insert",
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Store call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn find_latest_by_producer_setup_id(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        name: &str,
        setup_id: &str,
    ) -> StoreResult<Option<Instance>> {
        self.retrying("find_latest_by_producer_setup_id", || {
            self.inner
                .find_latest_by_producer_setup_id(namespace, plan_execution_id, name, setup_id)
        })
        .await
    }

    async fn find_by_level_indices(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        name: &str,
        indices: &[String],
    ) -> StoreResult<Vec<Instance>> {
        self.retrying("find_by_level_indices", || {
            self.inner
                .find_by_level_indices(namespace, plan_execution_id, name, indices)
        })
        .await
    }

    async fn find_latest_by_fqn(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        fully_qualified_name: &str,
    ) -> StoreResult<Option<Instance>> {
        self.retrying("find_latest_by_fqn", || {
            self.inner
                .find_latest_by_fqn(namespace, plan_execution_id, fully_qualified_name)
        })
        .await
    }

    async fn find_by_producer_runtime_ids(
        &self,
        namespace: Namespace,
        runtime_ids: &[String],
    ) -> StoreResult<Vec<Instance>> {
        self.retrying("find_by_producer_runtime_ids", || {
            self.inner.find_by_producer_runtime_ids(namespace, runtime_ids)
        })
        .await
    }

    async fn find_by_ids(&self, namespace: Namespace, ids: &[Uuid]) -> StoreResult<Vec<Instance>> {
        self.retrying("find_by_ids", || self.inner.find_by_ids(namespace, ids))
            .await
    }

    async fn find_by_name_and_producer_setup_ids(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        name: &str,
        setup_ids: &[String],
    ) -> StoreResult<Vec<Instance>> {
        self.retrying("find_by_name_and_producer_setup_ids", || {
            self.inner.find_by_name_and_producer_setup_ids(
                namespace,
                plan_execution_id,
                name,
                setup_ids,
            )
        })
        .await
    }

    async fn delete_by_plan_execution_ids(
        &self,
        namespace: Namespace,
        plan_execution_ids: &[String],
    ) -> StoreResult<u64> {
        self.retrying("delete_by_plan_execution_ids", || {
            self.inner
                .delete_by_plan_execution_ids(namespace, plan_execution_ids)
        })
        .await
    }

    async fn update_valid_until(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        valid_until: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.retrying("update_valid_until", || {
            self.inner
                .update_valid_until(namespace, plan_execution_id, valid_until)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_memory::MemoryStore;
    use crate::types::{Level, Payload};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls of every operation with Unavailable.
    /// With `commit_before_fail`, a failing insert still writes first.
    struct FlakyStore {
        inner: MemoryStore,
        failures: u32,
        calls: AtomicU32,
        commit_before_fail: bool,
    }

    impl FlakyStore {
        fn new(failures: u32, commit_before_fail: bool) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures,
                calls: AtomicU32::new(0),
                commit_before_fail,
            }
        }

        fn should_fail(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) < self.failures
        }
    }

    #[async_trait]
    impl ExecutionDataStore for FlakyStore {
        async fn insert(&self, namespace: Namespace, instance: &Instance) -> StoreResult<()> {
            if self.should_fail() {
                if self.commit_before_fail {
                    self.inner.insert(namespace, instance).await?;
                }
                return Err(StoreError::Unavailable(anyhow::anyhow!("connection reset")));
            }
            self.inner.insert(namespace, instance).await
        }

        async fn find_latest_by_producer_setup_id(
            &self,
            namespace: Namespace,
            plan_execution_id: &str,
            name: &str,
            setup_id: &str,
        ) -> StoreResult<Option<Instance>> {
            self.inner
                .find_latest_by_producer_setup_id(namespace, plan_execution_id, name, setup_id)
                .await
        }

        async fn find_by_level_indices(
            &self,
            namespace: Namespace,
            plan_execution_id: &str,
            name: &str,
            indices: &[String],
        ) -> StoreResult<Vec<Instance>> {
            if self.should_fail() {
                return Err(StoreError::Unavailable(anyhow::anyhow!("timeout")));
            }
            self.inner
                .find_by_level_indices(namespace, plan_execution_id, name, indices)
                .await
        }

        async fn find_latest_by_fqn(
            &self,
            namespace: Namespace,
            plan_execution_id: &str,
            fully_qualified_name: &str,
        ) -> StoreResult<Option<Instance>> {
            self.inner
                .find_latest_by_fqn(namespace, plan_execution_id, fully_qualified_name)
                .await
        }

        async fn find_by_producer_runtime_ids(
            &self,
            namespace: Namespace,
            runtime_ids: &[String],
        ) -> StoreResult<Vec<Instance>> {
            self.inner
                .find_by_producer_runtime_ids(namespace, runtime_ids)
                .await
        }

        async fn find_by_ids(
            &self,
            namespace: Namespace,
            ids: &[Uuid],
        ) -> StoreResult<Vec<Instance>> {
            self.inner.find_by_ids(namespace, ids).await
        }

        async fn find_by_name_and_producer_setup_ids(
            &self,
            namespace: Namespace,
            plan_execution_id: &str,
            name: &str,
            setup_ids: &[String],
        ) -> StoreResult<Vec<Instance>> {
            self.inner
                .find_by_name_and_producer_setup_ids(namespace, plan_execution_id, name, setup_ids)
                .await
        }

        async fn delete_by_plan_execution_ids(
            &self,
            namespace: Namespace,
            plan_execution_ids: &[String],
        ) -> StoreResult<u64> {
            self.inner
                .delete_by_plan_execution_ids(namespace, plan_execution_ids)
                .await
        }

        async fn update_valid_until(
            &self,
            namespace: Namespace,
            plan_execution_id: &str,
            valid_until: DateTime<Utc>,
        ) -> StoreResult<u64> {
            self.inner
                .update_valid_until(namespace, plan_execution_id, valid_until)
                .await
        }
    }

    fn instance(name: &str) -> Instance {
        let now = Utc::now();
        Instance {
            uuid: Uuid::now_v7(),
            plan_execution_id: "p".into(),
            stage_execution_id: None,
            produced_by: Level::new("s", "r"),
            name: name.into(),
            payload: Payload::new(serde_json::json!(1)),
            value_json: "1".into(),
            group_name: None,
            level_runtime_id_idx: "r".into(),
            fully_qualified_name: name.into(),
            created_at: now,
            valid_until: now,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(350));
    }

    #[test]
    fn zero_attempts_means_one() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), 1);
        assert_eq!(RetryPolicy::none().attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_retried_until_success() {
        let store = RetryingStore::new(FlakyStore::new(2, false), RetryPolicy::default());
        let rows = store
            .find_by_level_indices(Namespace::Outcome, "p", "x", &["".to_string()])
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_gives_up_after_max_attempts() {
        let store = RetryingStore::new(FlakyStore::new(10, false), RetryPolicy::default());
        let err = store
            .find_by_level_indices(Namespace::Outcome, "p", "x", &["".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_committed_before_lost_response_is_success() {
        let store = RetryingStore::new(FlakyStore::new(1, true), RetryPolicy::default());
        let row = instance("foo");
        store.insert(Namespace::Outcome, &row).await.unwrap();
        assert_eq!(store.inner().inner.count(Namespace::Outcome).unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_genuine_duplicate_is_not_masked() {
        let store = RetryingStore::new(FlakyStore::new(0, false), RetryPolicy::default());
        store.insert(Namespace::Outcome, &instance("foo")).await.unwrap();
        let err = store
            .insert(Namespace::Outcome, &instance("foo"))
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
        // no retry on a first-attempt duplicate
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts":5}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff_ms, 100);
        assert_eq!(policy.max_backoff_ms, 2_000);
    }
}
