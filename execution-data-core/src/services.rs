use crate::config::ExecutionDataConfig;
use crate::evaluator::ExpressionEvaluator;
use crate::outcome::OutcomeService;
use crate::retry::RetryingStore;
use crate::store::ExecutionDataStore;
use crate::sweeping_output::SweepingOutputService;
use std::sync::Arc;

/// Both execution-data services over one shared store.
///
/// The store is wrapped in a [`RetryingStore`] using `config.retry`, so
/// transient backend failures are retried before reaching the resolver.
#[derive(Clone)]
pub struct ExecutionDataServices {
    pub outcomes: OutcomeService,
    pub sweeping_outputs: SweepingOutputService,
}

impl ExecutionDataServices {
    pub fn new<S>(
        store: S,
        evaluator: Arc<dyn ExpressionEvaluator>,
        config: &ExecutionDataConfig,
    ) -> Self
    where
        S: ExecutionDataStore + 'static,
    {
        let store: Arc<dyn ExecutionDataStore> =
            Arc::new(RetryingStore::new(store, config.retry.clone()));
        Self::from_shared(store, evaluator, config)
    }

    /// Build over an already-shared store without adding a retry layer.
    pub fn from_shared(
        store: Arc<dyn ExecutionDataStore>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        config: &ExecutionDataConfig,
    ) -> Self {
        tracing::info!(
            ttl_days = config.ttl_days,
            max_attempts = config.retry.max_attempts,
            "Execution data services initialised"
        );
        Self {
            outcomes: OutcomeService::new(store.clone(), evaluator.clone(), config),
            sweeping_outputs: SweepingOutputService::new(store, evaluator, config),
        }
    }

    /// Drop both namespaces for the given plan executions.
    pub async fn delete_all_instances(
        &self,
        plan_execution_ids: &[String],
    ) -> crate::error::Result<u64> {
        let outcomes = self.outcomes.delete_all_instances(plan_execution_ids).await?;
        let outputs = self
            .sweeping_outputs
            .delete_all_instances(plan_execution_ids)
            .await?;
        Ok(outcomes + outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::NoopEvaluator;
    use crate::store_memory::MemoryStore;
    use crate::types::{Ambiance, Level, Namespace, RefObject};
    use serde_json::json;

    #[tokio::test]
    async fn test_namespaces_do_not_see_each_other() {
        let services = ExecutionDataServices::new(
            MemoryStore::new(),
            Arc::new(NoopEvaluator),
            &ExecutionDataConfig::default(),
        );
        let amb = Ambiance::new("plan").with_level(Level::new("step", "r-step"));

        services
            .outcomes
            .consume(&amb, "artifact", json!("image:1").into(), None)
            .await
            .unwrap();

        assert!(services
            .outcomes
            .resolve_optional(&amb, &RefObject::named("artifact"))
            .await
            .found);
        assert!(!services
            .sweeping_outputs
            .resolve_optional(&amb, &RefObject::named("artifact"))
            .await
            .found);

        // same name and level in the other namespace is not a duplicate
        services
            .sweeping_outputs
            .consume(&amb, "artifact", json!("other").into(), None)
            .await
            .unwrap();

        assert_eq!(services.outcomes.namespace(), Namespace::Outcome);
        assert_eq!(
            services.sweeping_outputs.namespace(),
            Namespace::SweepingOutput
        );

        let removed = services
            .delete_all_instances(&["plan".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }
}
