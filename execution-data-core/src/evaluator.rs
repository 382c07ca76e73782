//! Expression fallback port.
//!
//! Consulted only when a dotted name has no structural match. The
//! expression language itself lives elsewhere; this is its contract.

use crate::types::Ambiance;
use async_trait::async_trait;

/// Error type for expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// The expression could not be parsed or evaluated.
    #[error("malformed expression: {0}")]
    Malformed(String),

    #[error("evaluator failure: {0}")]
    Failed(#[from] anyhow::Error),
}

/// Evaluates raw expression text in the context of an ambiance.
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    /// `Ok(None)` means the expression is well-formed but unresolved.
    async fn evaluate(
        &self,
        ambiance: &Ambiance,
        expression: &str,
    ) -> Result<Option<serde_json::Value>, EvaluationError>;
}

/// Evaluator that never resolves anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvaluator;

#[async_trait]
impl ExpressionEvaluator for NoopEvaluator {
    async fn evaluate(
        &self,
        _ambiance: &Ambiance,
        _expression: &str,
    ) -> Result<Option<serde_json::Value>, EvaluationError> {
        Ok(None)
    }
}
