//! Outcome store: typed, durable step results.

use crate::config::ExecutionDataConfig;
use crate::error::Result;
use crate::evaluator::ExpressionEvaluator;
use crate::resolver::ScopedResolver;
use crate::store::ExecutionDataStore;
use crate::types::{Ambiance, Instance, Namespace, OptionalOutput, OutcomeRef, Payload, RefObject};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome service: the shared protocol over [`Namespace::Outcome`] plus
/// the outcome-reference lookups step assembly needs.
#[derive(Clone)]
pub struct OutcomeService {
    resolver: ScopedResolver,
}

impl OutcomeService {
    pub fn new(
        store: Arc<dyn ExecutionDataStore>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        config: &ExecutionDataConfig,
    ) -> Self {
        Self {
            resolver: ScopedResolver::new(Namespace::Outcome, store, evaluator, config),
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

    // ── Outcome-only ──

    /// Name/id pairs of everything a node published, without payloads.
    pub async fn fetch_outcome_refs(&self, node_runtime_id: &str) -> Result<Vec<OutcomeRef>> {
        let mut grouped = self
            .fetch_outcome_refs_batch(&[node_runtime_id.to_string()])
            .await?;
        Ok(grouped.remove(node_runtime_id).unwrap_or_default())
    }

    /// Outcome refs grouped by producing node. Every requested id gets an
    /// entry, empty when the node published nothing.
    pub async fn fetch_outcome_refs_batch(
        &self,
        node_runtime_ids: &[String],
    ) -> Result<HashMap<String, Vec<OutcomeRef>>> {
        let mut grouped: HashMap<String, Vec<OutcomeRef>> = node_runtime_ids
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        if node_runtime_ids.is_empty() {
            return Ok(grouped);
        }

        let instances = self
            .resolver
            .store()
            .find_by_producer_runtime_ids(Namespace::Outcome, node_runtime_ids)
            .await?;
        for instance in instances {
            grouped
                .entry(instance.produced_by.runtime_id)
                .or_default()
                .push(OutcomeRef {
                    name: instance.name,
                    instance_id: instance.uuid,
                });
        }
        Ok(grouped)
    }

    pub async fn fetch_outcome(&self, instance_id: Uuid) -> Result<Option<Instance>> {
        let mut found = self.fetch_outcomes(&[instance_id]).await?;
        Ok(found.pop())
    }

    pub async fn fetch_outcomes(&self, instance_ids: &[Uuid]) -> Result<Vec<Instance>> {
        if instance_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .resolver
            .store()
            .find_by_ids(Namespace::Outcome, instance_ids)
            .await?)
    }

    /// Full outcome instances produced by one node execution.
    pub async fn find_all_by_runtime_id(&self, node_runtime_id: &str) -> Result<Vec<Instance>> {
        Ok(self
            .resolver
            .store()
            .find_by_producer_runtime_ids(Namespace::Outcome, &[node_runtime_id.to_string()])
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::NoopEvaluator;
    use crate::store_memory::MemoryStore;
    use crate::types::Level;
    use serde_json::json;

    fn service() -> OutcomeService {
        OutcomeService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NoopEvaluator),
            &ExecutionDataConfig::default(),
        )
    }

    fn node(runtime_id: &str) -> Ambiance {
        Ambiance::new("plan")
            .with_level(Level::new("stage", "r-stage"))
            .with_level(Level::new(format!("setup-{runtime_id}"), runtime_id))
    }

    #[tokio::test]
    async fn test_outcome_refs_grouped_per_node() {
        let svc = service();
        let a1 = svc
            .consume(&node("n1"), "artifact", json!({"tag": "v1"}).into(), None)
            .await
            .unwrap();
        let a2 = svc
            .consume(&node("n1"), "manifest", json!({}).into(), None)
            .await
            .unwrap();
        let b1 = svc
            .consume(&node("n2"), "artifact", json!({"tag": "v2"}).into(), None)
            .await
            .unwrap();

        let grouped = svc
            .fetch_outcome_refs_batch(&["n1".into(), "n2".into(), "n3".into()])
            .await
            .unwrap();
        assert_eq!(grouped.len(), 3);

        let mut n1: Vec<_> = grouped["n1"].iter().map(|r| r.instance_id).collect();
        n1.sort();
        let mut expected = vec![a1, a2];
        expected.sort();
        assert_eq!(n1, expected);
        assert_eq!(
            grouped["n2"],
            vec![OutcomeRef {
                name: "artifact".into(),
                instance_id: b1
            }]
        );
        assert!(grouped["n3"].is_empty());
    }

    #[tokio::test]
    async fn test_fetch_outcome_refs_single_node() {
        let svc = service();
        svc.consume(&node("n1"), "artifact", json!(1).into(), None)
            .await
            .unwrap();
        let refs = svc.fetch_outcome_refs("n1").await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "artifact");
        assert!(svc.fetch_outcome_refs("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_outcome_by_id() {
        let svc = service();
        let id = svc
            .consume(
                &node("n1"),
                "artifact",
                Payload::tagged("DockerArtifactOutcome", json!({"image": "nginx"})),
                None,
            )
            .await
            .unwrap();
        let outcome = svc.fetch_outcome(id).await.unwrap().unwrap();
        assert_eq!(outcome.payload.type_tag.as_deref(), Some("DockerArtifactOutcome"));
        assert_eq!(outcome.payload.document, json!({"image": "nginx"}));
        assert!(svc.fetch_outcome(Uuid::now_v7()).await.unwrap().is_none());
        assert!(svc.fetch_outcomes(&[]).await.unwrap().is_empty());

        let all = svc.find_all_by_runtime_id("n1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].uuid, id);
    }
}
