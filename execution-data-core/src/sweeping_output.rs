//! Sweeping-output store: ad-hoc key/value data shared across steps.

use crate::config::ExecutionDataConfig;
use crate::error::Result;
use crate::evaluator::ExpressionEvaluator;
use crate::resolver::ScopedResolver;
use crate::store::ExecutionDataStore;
use crate::types::{Ambiance, Instance, Namespace, OptionalOutput, Payload, RefObject};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Sweeping-output service: the shared protocol over
/// [`Namespace::SweepingOutput`] plus strategy fan-in lookups.
#[derive(Clone)]
pub struct SweepingOutputService {
    resolver: ScopedResolver,
}

impl SweepingOutputService {
    pub fn new(
        store: Arc<dyn ExecutionDataStore>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        config: &ExecutionDataConfig,
    ) -> Self {
        Self {
            resolver: ScopedResolver::new(Namespace::SweepingOutput, store, evaluator, config),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.resolver.namespace()
    }

    pub async fn consume(
        &self,
        ambiance: &Ambiance,
        name: &str,
        payload: Payload,
        group_name: Option<&str>,
    ) -> Result<Uuid> {
        self.resolver.consume(ambiance, name, payload, group_name).await
    }

    pub async fn resolve(&self, ambiance: &Ambiance, ref_object: &RefObject) -> Result<String> {
        self.resolver.resolve(ambiance, ref_object).await
    }

    pub async fn resolve_optional(
        &self,
        ambiance: &Ambiance,
        ref_object: &RefObject,
    ) -> OptionalOutput {
        self.resolver.resolve_optional(ambiance, ref_object).await
    }

    pub async fn clone_for_retry_execution(
        &self,
        ambiance: &Ambiance,
        original_node_runtime_id: &str,
    ) -> Result<Vec<Uuid>> {
        self.resolver
            .clone_for_retry_execution(ambiance, original_node_runtime_id)
            .await
    }

    pub async fn delete_all_instances(&self, plan_execution_ids: &[String]) -> Result<u64> {
        self.resolver.delete_all_instances(plan_execution_ids).await
    }

    pub async fn update_ttl(
        &self,
        plan_execution_id: &str,
        valid_until: DateTime<Utc>,
    ) -> Result<u64> {
        self.resolver.update_ttl(plan_execution_id, valid_until).await
    }

    // ── Sweeping-output only ──

    /// Latest output named `name` per producer setup id. Used when a loop
    /// or matrix collects what each of its children published.
    pub async fn list_outputs_with_given_name_and_setup_ids(
        &self,
        ambiance: &Ambiance,
        name: &str,
        setup_ids: &[String],
    ) -> Result<HashMap<String, OptionalOutput>> {
        let instances = if setup_ids.is_empty() {
            Vec::new()
        } else {
            self.resolver
                .store()
                .find_by_name_and_producer_setup_ids(
                    Namespace::SweepingOutput,
                    &ambiance.plan_execution_id,
                    name,
                    setup_ids,
                )
                .await?
        };

        let mut out: HashMap<String, OptionalOutput> = setup_ids
            .iter()
            .map(|id| (id.clone(), OptionalOutput::missing()))
            .collect();
        // newest first, so the first hit per setup id wins
        for instance in instances {
            let slot = out.entry(instance.produced_by.setup_id).or_default();
            if !slot.found {
                *slot = OptionalOutput::found(instance.value_json);
            }
        }
        Ok(out)
    }

    /// Everything one node execution published.
    pub async fn find_outputs_using_node_id(&self, node_runtime_id: &str) -> Result<Vec<Instance>> {
        Ok(self
            .resolver
            .store()
            .find_by_producer_runtime_ids(
                Namespace::SweepingOutput,
                &[node_runtime_id.to_string()],
            )
            .await?)
    }
}
