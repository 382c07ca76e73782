use crate::store::{ExecutionDataStore, StoreError, StoreResult};
use crate::types::{Instance, Namespace};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

struct Row {
    seq: u64,
    instance: Instance,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    rows: HashMap<Namespace, Vec<Row>>,
}

impl Inner {
    fn scan(&self, namespace: Namespace) -> impl Iterator<Item = &Row> {
        self.rows.get(&namespace).into_iter().flatten()
    }
}

/// In-memory ExecutionDataStore for tests and embedded runs.
///
/// The uniqueness check and the insert happen under one write lock, so
/// concurrent consumes of the same key see exactly one winner.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Number of stored instances in a namespace.
    pub fn count(&self, namespace: Namespace) -> StoreResult<usize> {
        self.read(|inner| inner.scan(namespace).count())
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> StoreResult<T> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(f(&inner))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest first: created_at, then insertion order.
fn newest_first(mut rows: Vec<&Row>) -> Vec<Instance> {
    rows.sort_by(|a, b| {
        (b.instance.created_at, b.seq).cmp(&(a.instance.created_at, a.seq))
    });
    rows.into_iter().map(|r| r.instance.clone()).collect()
}

fn oldest_first(rows: Vec<&Row>) -> Vec<Instance> {
    let mut out = newest_first(rows);
    out.reverse();
    out
}

#[async_trait]
impl ExecutionDataStore for MemoryStore {
    async fn insert(&self, namespace: Namespace, instance: &Instance) -> StoreResult<()> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;

        let conflict = inner.scan(namespace).any(|r| {
            r.instance.plan_execution_id == instance.plan_execution_id
                && r.instance.name == instance.name
                && r.instance.level_runtime_id_idx == instance.level_runtime_id_idx
        });
        if conflict {
            return Err(StoreError::Duplicate {
                namespace,
                name: instance.name.clone(),
                level_runtime_id_idx: instance.level_runtime_id_idx.clone(),
            });
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.rows.entry(namespace).or_default().push(Row {
            seq,
            instance: instance.clone(),
        });
        Ok(())
    }

    async fn find_latest_by_producer_setup_id(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        name: &str,
        setup_id: &str,
    ) -> StoreResult<Option<Instance>> {
        self.read(|inner| {
            let rows = inner
                .scan(namespace)
                .filter(|r| {
                    r.instance.plan_execution_id == plan_execution_id
                        && r.instance.name == name
                        && r.instance.produced_by.setup_id == setup_id
                })
                .collect();
            newest_first(rows).into_iter().next()
        })
    }

    async fn find_by_level_indices(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        name: &str,
        indices: &[String],
    ) -> StoreResult<Vec<Instance>> {
        self.read(|inner| {
            let rows = inner
                .scan(namespace)
                .filter(|r| {
                    r.instance.plan_execution_id == plan_execution_id
                        && r.instance.name == name
                        && indices.contains(&r.instance.level_runtime_id_idx)
                })
                .collect();
            newest_first(rows)
        })
    }

    async fn find_latest_by_fqn(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        fully_qualified_name: &str,
    ) -> StoreResult<Option<Instance>> {
        self.read(|inner| {
            let rows = inner
                .scan(namespace)
                .filter(|r| {
                    r.instance.plan_execution_id == plan_execution_id
                        && r.instance.fully_qualified_name == fully_qualified_name
                })
                .collect();
            newest_first(rows).into_iter().next()
        })
    }

    async fn find_by_producer_runtime_ids(
        &self,
        namespace: Namespace,
        runtime_ids: &[String],
    ) -> StoreResult<Vec<Instance>> {
        self.read(|inner| {
            let rows = inner
                .scan(namespace)
                .filter(|r| runtime_ids.contains(&r.instance.produced_by.runtime_id))
                .collect();
            oldest_first(rows)
        })
    }

    async fn find_by_ids(&self, namespace: Namespace, ids: &[Uuid]) -> StoreResult<Vec<Instance>> {
        self.read(|inner| {
            let rows = inner
                .scan(namespace)
                .filter(|r| ids.contains(&r.instance.uuid))
                .collect();
            newest_first(rows)
        })
    }

    async fn find_by_name_and_producer_setup_ids(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        name: &str,
        setup_ids: &[String],
    ) -> StoreResult<Vec<Instance>> {
        self.read(|inner| {
            let rows = inner
                .scan(namespace)
                .filter(|r| {
                    r.instance.plan_execution_id == plan_execution_id
                        && r.instance.name == name
                        && setup_ids.contains(&r.instance.produced_by.setup_id)
                })
                .collect();
            newest_first(rows)
        })
    }

    async fn delete_by_plan_execution_ids(
        &self,
        namespace: Namespace,
        plan_execution_ids: &[String],
    ) -> StoreResult<u64> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let Some(rows) = inner.rows.get_mut(&namespace) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !plan_execution_ids.contains(&r.instance.plan_execution_id));
        Ok((before - rows.len()) as u64)
    }

    async fn update_valid_until(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        valid_until: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut matched = 0u64;
        if let Some(rows) = inner.rows.get_mut(&namespace) {
            for row in rows
                .iter_mut()
                .filter(|r| r.instance.plan_execution_id == plan_execution_id)
            {
                row.instance.valid_until = valid_until;
                matched += 1;
            }
        }
        Ok(matched)
    }
}
