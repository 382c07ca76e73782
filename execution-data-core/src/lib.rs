//! Scoped execution data for hierarchical pipeline runs.
//!
//! Steps publish named values (outcomes and sweeping outputs) at a position
//! in the execution tree described by an [`Ambiance`]. Later steps resolve
//! those names from their own position: the most specific visible write
//! wins, and sibling branches never see each other's data.
//!
//! ```text
//! step ──consume──► ScopedResolver ──► RetryingStore ──► ExecutionDataStore
//!                        │                                 ├─ MemoryStore
//! step ◄──resolve────────┘                                 └─ PgExecutionDataStore
//! ```

pub mod config;
pub mod error;
pub mod evaluator;
pub mod levels;
pub mod outcome;
pub mod resolver;
pub mod retry;
pub mod services;
pub mod store;
pub mod store_memory;
pub mod sweeping_output;
pub mod types;

#[cfg(feature = "postgres")]
pub mod store_postgres;

pub use config::ExecutionDataConfig;
pub use error::{ResolverError, Result};
pub use evaluator::{EvaluationError, ExpressionEvaluator, NoopEvaluator};
pub use levels::GLOBAL_GROUP_SCOPE;
pub use outcome::OutcomeService;
pub use resolver::{scope_for_group, ScopedResolver};
pub use retry::{RetryPolicy, RetryingStore};
pub use services::ExecutionDataServices;
pub use store::{ExecutionDataStore, StoreError, StoreResult};
pub use store_memory::MemoryStore;
pub use sweeping_output::SweepingOutputService;
pub use types::{
    Ambiance, Instance, Level, Namespace, OptionalOutput, OutcomeRef, Payload, RefObject,
    StepCategory,
};

#[cfg(feature = "postgres")]
pub use store_postgres::PgExecutionDataStore;
