use crate::types::{Instance, Namespace};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique index on (plan_execution_id, name, level_runtime_id_idx) hit.
    #[error("duplicate {namespace} '{name}' at level index '{level_runtime_id_idx}'")]
    Duplicate {
        namespace: Namespace,
        name: String,
        level_runtime_id_idx: String,
    },

    /// Transport or backend failure.
    #[error("store unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence port for outcome and sweeping-output instances.
///
/// One method per query shape the resolver issues. Every query is scoped by
/// namespace; the two namespaces are physically separate. Unless noted,
/// results are ordered newest first (created_at, then insertion order).
/// The resolver operates exclusively through this trait, enabling
/// pluggable backends (MemoryStore for tests, Postgres for production).
#[async_trait]
pub trait ExecutionDataStore: Send + Sync {
    // ── Writes ──

    /// Insert a new instance. Must fail with [`StoreError::Duplicate`] when
    /// (plan_execution_id, name, level_runtime_id_idx) already exists;
    /// enforced by the backend, never by a read-then-write.
    async fn insert(&self, namespace: Namespace, instance: &Instance) -> StoreResult<()>;

    // ── Resolution queries ──

    /// Latest instance named `name` produced by the node with `setup_id`.
    async fn find_latest_by_producer_setup_id(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        name: &str,
        setup_id: &str,
    ) -> StoreResult<Option<Instance>>;

    /// All instances named `name` whose level index is one of `indices`.
    async fn find_by_level_indices(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        name: &str,
        indices: &[String],
    ) -> StoreResult<Vec<Instance>>;

    /// Latest instance with the given fully-qualified name.
    async fn find_latest_by_fqn(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        fully_qualified_name: &str,
    ) -> StoreResult<Option<Instance>>;

    // ── Bulk fetch ──

    /// Instances produced by any of `runtime_ids`, oldest first.
    async fn find_by_producer_runtime_ids(
        &self,
        namespace: Namespace,
        runtime_ids: &[String],
    ) -> StoreResult<Vec<Instance>>;

    async fn find_by_ids(&self, namespace: Namespace, ids: &[Uuid]) -> StoreResult<Vec<Instance>>;

    /// Instances named `name` produced by any node in `setup_ids`.
    async fn find_by_name_and_producer_setup_ids(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        name: &str,
        setup_ids: &[String],
    ) -> StoreResult<Vec<Instance>>;

    // ── Maintenance ──

    /// Delete every instance of the given plan executions. Returns rows removed.
    async fn delete_by_plan_execution_ids(
        &self,
        namespace: Namespace,
        plan_execution_ids: &[String],
    ) -> StoreResult<u64>;

    /// Set `valid_until` on every instance of a plan execution. Returns rows matched.
    async fn update_valid_until(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        valid_until: DateTime<Utc>,
    ) -> StoreResult<u64>;
}
