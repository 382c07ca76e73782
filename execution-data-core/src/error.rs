use thiserror::Error;

use crate::evaluator::EvaluationError;
use crate::store::StoreError;

/// Errors surfaced by the resolver protocol.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("could not resolve '{name}' (tried fully-qualified name '{fully_qualified_name}')")]
    NotFound {
        name: String,
        fully_qualified_name: String,
    },

    #[error("group '{0}' not found in the current level chain")]
    GroupNotFound(String),

    #[error("'{name}' is already consumed at level index '{level_runtime_id_idx}'")]
    DuplicateWrite {
        name: String,
        level_runtime_id_idx: String,
    },

    #[error("malformed expression '{expression}': {reason}")]
    MalformedExpression { expression: String, reason: String },

    #[error("expression evaluation failed: {0}")]
    Evaluation(#[source] anyhow::Error),

    #[error("instance ttl of {0} days is out of range")]
    InvalidTtl(i64),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] anyhow::Error),
}

impl ResolverError {
    /// Whether the failure indicates a missing value rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Authoring and integrity errors must not be retried by the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::GroupNotFound(_)
                | Self::DuplicateWrite { .. }
                | Self::InvalidTtl(_)
                | Self::IntegrityViolation(_)
        )
    }

    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate {
                name,
                level_runtime_id_idx,
                ..
            } => Self::DuplicateWrite {
                name,
                level_runtime_id_idx,
            },
            StoreError::Unavailable(e) => Self::StorageUnavailable(e),
        }
    }

    pub(crate) fn from_evaluation(expression: &str, err: EvaluationError) -> Self {
        match err {
            EvaluationError::Malformed(reason) => Self::MalformedExpression {
                expression: expression.to_string(),
                reason,
            },
            EvaluationError::Failed(e) => Self::Evaluation(e),
        }
    }
}

impl From<StoreError> for ResolverError {
    fn from(err: StoreError) -> Self {
        Self::from_store(err)
    }
}

pub type Result<T> = std::result::Result<T, ResolverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_found_mentions_fqn() {
        let e = ResolverError::NotFound {
            name: "foo".into(),
            fully_qualified_name: "pipeline.stage.foo".into(),
        };
        assert_eq!(
            e.to_string(),
            "could not resolve 'foo' (tried fully-qualified name 'pipeline.stage.foo')"
        );
        assert!(e.is_not_found());
        assert!(!e.is_fatal());
    }

    #[test]
    fn display_group_not_found() {
        let e = ResolverError::GroupNotFound("STAGE".into());
        assert_eq!(e.to_string(), "group 'STAGE' not found in the current level chain");
        assert!(e.is_fatal());
    }

    #[test]
    fn duplicate_store_error_maps_to_duplicate_write() {
        let e = ResolverError::from(StoreError::Duplicate {
            namespace: crate::types::Namespace::Outcome,
            name: "foo".into(),
            level_runtime_id_idx: "r1|r2".into(),
        });
        assert!(matches!(e, ResolverError::DuplicateWrite { ref name, .. } if name == "foo"));
        assert!(e.is_fatal());
    }

    #[test]
    fn unavailable_store_error_maps_to_storage_unavailable() {
        let e = ResolverError::from(StoreError::Unavailable(anyhow::anyhow!("conn reset")));
        assert_eq!(e.to_string(), "storage unavailable: conn reset");
        assert!(!e.is_fatal());
    }

    #[test]
    fn malformed_evaluation_maps_to_malformed_expression() {
        let e = ResolverError::from_evaluation(
            "a.b(",
            EvaluationError::Malformed("unbalanced paren".into()),
        );
        assert_eq!(e.to_string(), "malformed expression 'a.b(': unbalanced paren");
    }

    #[test]
    fn display_invalid_ttl() {
        let e = ResolverError::InvalidTtl(-5);
        assert_eq!(e.to_string(), "instance ttl of -5 days is out of range");
        assert!(e.is_fatal());
    }
}
