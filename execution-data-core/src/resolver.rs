//! Scope-aware consume / resolve protocol shared by both namespaces.
//!
//! Resolution order for `resolve` and `resolve_optional`:
//! 1. `producer_id` set: latest instance from that producer setup id.
//! 2. Plain name: deepest visible write among the ambiance's level indices.
//! 3. Dotted name: latest instance by fully-qualified name, then the
//!    expression evaluator.

use crate::config::ExecutionDataConfig;
use crate::error::{ResolverError, Result};
use crate::evaluator::ExpressionEvaluator;
use crate::levels::{
    fully_qualified_name, level_runtime_id_idx, level_runtime_id_indices, GLOBAL_GROUP_SCOPE,
};
use crate::store::ExecutionDataStore;
use crate::types::{Ambiance, Instance, Namespace, OptionalOutput, Payload, RefObject};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Ambiance a write lands on for the given group.
///
/// Empty group: unchanged. Global sentinel: no levels. Otherwise the chain
/// up to and including the innermost level tagged with `group_name`.
pub fn scope_for_group(ambiance: &Ambiance, group_name: Option<&str>) -> Result<Ambiance> {
    let group = match group_name {
        None | Some("") => return Ok(ambiance.clone()),
        Some(g) => g,
    };
    if group == GLOBAL_GROUP_SCOPE {
        return Ok(ambiance.truncate(0));
    }
    ambiance
        .levels
        .iter()
        .rposition(|l| l.group.as_deref() == Some(group))
        .map(|i| ambiance.truncate(i + 1))
        .ok_or_else(|| ResolverError::GroupNotFound(group.to_string()))
}

/// The consume/resolve protocol over one namespace of an
/// [`ExecutionDataStore`].
#[derive(Clone)]
pub struct ScopedResolver {
    namespace: Namespace,
    store: Arc<dyn ExecutionDataStore>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    ttl_days: i64,
    ttl: Option<TimeDelta>,
}

impl ScopedResolver {
    pub fn new(
        namespace: Namespace,
        store: Arc<dyn ExecutionDataStore>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        config: &ExecutionDataConfig,
    ) -> Self {
        Self {
            namespace,
            store,
            evaluator,
            ttl_days: config.ttl_days,
            ttl: config.ttl(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub(crate) fn store(&self) -> &dyn ExecutionDataStore {
        self.store.as_ref()
    }

    // ── Write ──

    /// Publish `payload` under `name`, optionally scoped to an ancestor group.
    ///
    /// The producer is always the current level of `ambiance`, even when the
    /// write is redirected to a group or the global scope.
    pub async fn consume(
        &self,
        ambiance: &Ambiance,
        name: &str,
        payload: Payload,
        group_name: Option<&str>,
    ) -> Result<Uuid> {
        let scoped = scope_for_group(ambiance, group_name)?;
        self.write(ambiance, &scoped, name, payload, group_name).await
    }

    /// Insert one instance produced by `ambiance`'s current level at the
    /// position of `scoped`.
    async fn write(
        &self,
        ambiance: &Ambiance,
        scoped: &Ambiance,
        name: &str,
        payload: Payload,
        group_name: Option<&str>,
    ) -> Result<Uuid> {
        let value_json = serde_json::to_string(&payload.document)?;
        let created_at = Utc::now();

        let instance = Instance {
            uuid: Uuid::now_v7(),
            plan_execution_id: ambiance.plan_execution_id.clone(),
            stage_execution_id: ambiance.stage_execution_id.clone(),
            produced_by: ambiance.current_level().cloned().unwrap_or_default(),
            name: name.to_string(),
            payload,
            value_json,
            group_name: group_name.filter(|g| !g.is_empty()).map(str::to_string),
            level_runtime_id_idx: level_runtime_id_idx(&scoped.levels),
            fully_qualified_name: fully_qualified_name(scoped, name),
            created_at,
            valid_until: self.valid_until(created_at)?,
        };

        self.store.insert(self.namespace, &instance).await?;

        tracing::debug!(
            namespace = %self.namespace,
            plan_execution_id = %instance.plan_execution_id,
            name,
            fqn = %instance.fully_qualified_name,
            level_runtime_id_idx = %instance.level_runtime_id_idx,
            uuid = %instance.uuid,
            "Consumed"
        );
        Ok(instance.uuid)
    }

    fn valid_until(&self, created_at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.ttl
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .ok_or(ResolverError::InvalidTtl(self.ttl_days))
    }

    // ── Read ──

    /// Resolve `ref_object` from `ambiance`; a miss is [`ResolverError::NotFound`].
    pub async fn resolve(&self, ambiance: &Ambiance, ref_object: &RefObject) -> Result<String> {
        match self.lookup(ambiance, ref_object).await? {
            Some(value) => Ok(value),
            None => Err(ResolverError::NotFound {
                name: ref_object.name.clone(),
                fully_qualified_name: fully_qualified_name(ambiance, &ref_object.name),
            }),
        }
    }

    /// Like [`resolve`](Self::resolve), but every failure becomes `found = false`.
    pub async fn resolve_optional(
        &self,
        ambiance: &Ambiance,
        ref_object: &RefObject,
    ) -> OptionalOutput {
        match self.lookup(ambiance, ref_object).await {
            Ok(Some(value)) => OptionalOutput::found(value),
            Ok(None) => OptionalOutput::missing(),
            Err(e) => {
                tracing::warn!(
                    namespace = %self.namespace,
                    plan_execution_id = %ambiance.plan_execution_id,
                    name = %ref_object.name,
                    error = %e,
                    "Optional resolution failed, treating as not found"
                );
                OptionalOutput::missing()
            }
        }
    }

    async fn lookup(&self, ambiance: &Ambiance, ref_object: &RefObject) -> Result<Option<String>> {
        if let Some(producer_id) = ref_object.producer_id.as_deref().filter(|p| !p.is_empty()) {
            return self.lookup_by_producer(ambiance, &ref_object.name, producer_id).await;
        }
        if !ref_object.is_dotted() {
            return self.lookup_by_scope(ambiance, &ref_object.name).await;
        }
        self.lookup_by_path(ambiance, &ref_object.name).await
    }

    async fn lookup_by_producer(
        &self,
        ambiance: &Ambiance,
        name: &str,
        producer_id: &str,
    ) -> Result<Option<String>> {
        let found = self
            .store
            .find_latest_by_producer_setup_id(
                self.namespace,
                &ambiance.plan_execution_id,
                name,
                producer_id,
            )
            .await?;
        if found.is_none() {
            tracing::info!(
                namespace = %self.namespace,
                plan_execution_id = %ambiance.plan_execution_id,
                name,
                producer_id,
                fqn = %fully_qualified_name(ambiance, name),
                "No instance from producer"
            );
        }
        Ok(found.map(|i| i.value_json))
    }

    async fn lookup_by_scope(&self, ambiance: &Ambiance, name: &str) -> Result<Option<String>> {
        let indices = level_runtime_id_indices(ambiance);
        let candidates = self
            .store
            .find_by_level_indices(self.namespace, &ambiance.plan_execution_id, name, &indices)
            .await?;

        // deepest visible write wins
        let best = candidates
            .into_iter()
            .max_by(|a, b| a.level_runtime_id_idx.cmp(&b.level_runtime_id_idx));
        if best.is_none() {
            tracing::info!(
                namespace = %self.namespace,
                plan_execution_id = %ambiance.plan_execution_id,
                name,
                fqn = %fully_qualified_name(ambiance, name),
                "No visible instance in scope"
            );
        }
        Ok(best.map(|i| i.value_json))
    }

    async fn lookup_by_path(&self, ambiance: &Ambiance, name: &str) -> Result<Option<String>> {
        let relative = fully_qualified_name(ambiance, name);
        let mut candidates = vec![relative];
        if candidates[0] != name {
            candidates.push(name.to_string());
        }

        for fqn in &candidates {
            if let Some(found) = self
                .store
                .find_latest_by_fqn(self.namespace, &ambiance.plan_execution_id, fqn)
                .await?
            {
                return Ok(Some(found.value_json));
            }
        }

        tracing::info!(
            namespace = %self.namespace,
            plan_execution_id = %ambiance.plan_execution_id,
            name,
            fqn = %candidates[0],
            "No instance by fully-qualified name, falling back to expression"
        );

        let evaluated = self
            .evaluator
            .evaluate(ambiance, name)
            .await
            .map_err(|e| ResolverError::from_evaluation(name, e))?;

        match evaluated {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s)),
            Some(other) => Ok(Some(serde_json::to_string(&other)?)),
        }
    }

    // ── Retry ──

    /// Re-publish everything the original node produced under the current
    /// ambiance. A partial failure leaves a partial clone; callers must not
    /// start the new attempt on error.
    ///
    /// Group and global writes go back to their group scope. When that slot
    /// already holds the value (a retry inside the same group instance), the
    /// clone lands at the new attempt's own level instead, keeping its
    /// group name.
    pub async fn clone_for_retry_execution(
        &self,
        ambiance: &Ambiance,
        original_node_runtime_id: &str,
    ) -> Result<Vec<Uuid>> {
        let originals = self
            .store
            .find_by_producer_runtime_ids(self.namespace, &[original_node_runtime_id.to_string()])
            .await?;

        let mut ids = Vec::with_capacity(originals.len());
        for original in originals {
            let group = original.group_name.as_deref();
            let scoped = scope_for_group(ambiance, group)?;
            let written = match self
                .write(ambiance, &scoped, &original.name, original.payload.clone(), group)
                .await
            {
                Err(ResolverError::DuplicateWrite { .. }) if scoped.depth() < ambiance.depth() => {
                    tracing::debug!(
                        namespace = %self.namespace,
                        plan_execution_id = %ambiance.plan_execution_id,
                        name = %original.name,
                        group = group.unwrap_or_default(),
                        "Group slot already filled, cloning at attempt level"
                    );
                    self.write(ambiance, ambiance, &original.name, original.payload, group)
                        .await
                }
                other => other,
            };
            let id = written.map_err(|e| match e {
                ResolverError::DuplicateWrite {
                    name,
                    level_runtime_id_idx,
                } => ResolverError::IntegrityViolation(format!(
                    "retry clone of '{name}' from node {original_node_runtime_id} collided at level index '{level_runtime_id_idx}'"
                )),
                other => other,
            })?;
            ids.push(id);
        }

        tracing::debug!(
            namespace = %self.namespace,
            plan_execution_id = %ambiance.plan_execution_id,
            original_node_runtime_id,
            cloned = ids.len(),
            "Cloned instances for retry"
        );
        Ok(ids)
    }

    // ── Maintenance ──

    /// Delete every instance of the given plan executions. Zero matches is
    /// not an error.
    pub async fn delete_all_instances(&self, plan_execution_ids: &[String]) -> Result<u64> {
        if plan_execution_ids.is_empty() {
            return Ok(0);
        }
        let removed = self
            .store
            .delete_by_plan_execution_ids(self.namespace, plan_execution_ids)
            .await?;
        if removed == 0 {
            tracing::info!(
                namespace = %self.namespace,
                plan_executions = plan_execution_ids.len(),
                "No instances to delete"
            );
        } else {
            tracing::debug!(namespace = %self.namespace, removed, "Deleted instances");
        }
        Ok(removed)
    }

    /// Move `valid_until` of a plan execution's instances. Idempotent;
    /// zero matches is logged, not failed.
    pub async fn update_ttl(
        &self,
        plan_execution_id: &str,
        valid_until: DateTime<Utc>,
    ) -> Result<u64> {
        let matched = self
            .store
            .update_valid_until(self.namespace, plan_execution_id, valid_until)
            .await?;
        if matched == 0 {
            tracing::warn!(
                namespace = %self.namespace,
                plan_execution_id,
                "TTL update matched no instances"
            );
        }
        Ok(matched)
    }
}
