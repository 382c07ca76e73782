use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Step category ────────────────────────────────────────────

/// Kind of node a level represents in the execution DAG.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    Pipeline,
    Stages,
    Stage,
    StepGroup,
    #[default]
    Step,
    /// Loop / matrix container; its children are the iterations.
    Strategy,
    Fork,
}

impl StepCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Stages => "stages",
            Self::Stage => "stage",
            Self::StepGroup => "step_group",
            Self::Step => "step",
            Self::Strategy => "strategy",
            Self::Fork => "fork",
        }
    }
}

impl std::fmt::Display for StepCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Level ────────────────────────────────────────────────────

/// One frame of DAG depth. Appended by the scheduler, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Level {
    /// Static node id from the plan definition.
    pub setup_id: String,
    /// Per-execution node id; fresh for every attempt and iteration.
    pub runtime_id: String,
    /// Structural name of the node. Loop iterations carry their postfix
    /// (`step1_0`, `step1_1`). Empty means "use `setup_id`".
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub step_category: StepCategory,
    /// Wrapper levels that contribute no segment to fully-qualified names.
    #[serde(default)]
    pub skip_expression_chain: bool,
}

impl Level {
    pub fn new(setup_id: impl Into<String>, runtime_id: impl Into<String>) -> Self {
        Self {
            setup_id: setup_id.into(),
            runtime_id: runtime_id.into(),
            ..Default::default()
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_category(mut self, category: StepCategory) -> Self {
        self.step_category = category;
        self
    }

    pub fn skipping_expression_chain(mut self) -> Self {
        self.skip_expression_chain = true;
        self
    }

    /// Segment this level contributes to a fully-qualified name.
    pub fn fqn_segment(&self) -> &str {
        if self.identifier.is_empty() {
            &self.setup_id
        } else {
            &self.identifier
        }
    }
}

// ─── Ambiance ─────────────────────────────────────────────────

/// Where in the execution DAG an evaluation happens.
///
/// Owned by the scheduler; every helper here returns a new value so one
/// ambiance can be shared across parallel sibling executions.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ambiance {
    pub plan_execution_id: String,
    #[serde(default)]
    pub stage_execution_id: Option<String>,
    #[serde(default)]
    pub levels: Vec<Level>,
}

impl Ambiance {
    pub fn new(plan_execution_id: impl Into<String>) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            stage_execution_id: None,
            levels: Vec::new(),
        }
    }

    pub fn with_stage_execution_id(mut self, stage_execution_id: impl Into<String>) -> Self {
        self.stage_execution_id = Some(stage_execution_id.into());
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.levels.push(level);
        self
    }

    /// Copy keeping only the first `level_count` levels (clamped to depth).
    pub fn truncate(&self, level_count: usize) -> Ambiance {
        let keep = level_count.min(self.levels.len());
        Ambiance {
            plan_execution_id: self.plan_execution_id.clone(),
            stage_execution_id: self.stage_execution_id.clone(),
            levels: self.levels[..keep].to_vec(),
        }
    }

    /// Copy extended by one child level.
    pub fn clone_for_child(&self, level: Level) -> Ambiance {
        self.clone().with_level(level)
    }

    /// Copy with the current level dropped.
    pub fn clone_for_finish(&self) -> Ambiance {
        self.truncate(self.levels.len().saturating_sub(1))
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    pub fn current_runtime_id(&self) -> Option<&str> {
        self.current_level().map(|l| l.runtime_id.as_str())
    }

    pub fn current_setup_id(&self) -> Option<&str> {
        self.current_level().map(|l| l.setup_id.as_str())
    }

    pub fn current_group(&self) -> Option<&str> {
        self.current_level().and_then(|l| l.group.as_deref())
    }

    pub fn parent_runtime_id(&self) -> Option<&str> {
        let len = self.levels.len();
        if len < 2 {
            return None;
        }
        Some(self.levels[len - 2].runtime_id.as_str())
    }

    /// Innermost enclosing stage level.
    pub fn stage_level(&self) -> Option<&Level> {
        self.levels
            .iter()
            .rev()
            .find(|l| l.step_category == StepCategory::Stage)
    }
}

// ─── Payload ──────────────────────────────────────────────────

/// Opaque value published by a step. Callers own deserialization; the
/// type tag is carried through untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub type_tag: Option<String>,
    pub document: serde_json::Value,
}

impl Payload {
    pub fn new(document: serde_json::Value) -> Self {
        Self {
            type_tag: None,
            document,
        }
    }

    pub fn tagged(type_tag: impl Into<String>, document: serde_json::Value) -> Self {
        Self {
            type_tag: Some(type_tag.into()),
            document,
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(document: serde_json::Value) -> Self {
        Self::new(document)
    }
}

// ─── Namespace ────────────────────────────────────────────────

/// Which logical store an instance lives in. Outcomes and sweeping outputs
/// never satisfy each other's lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Outcome,
    SweepingOutput,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outcome => "outcome",
            Self::SweepingOutput => "sweeping_output",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Outcome => "outcome_instances",
            Self::SweepingOutput => "sweeping_output_instances",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Instance ─────────────────────────────────────────────────

/// A stored value. Immutable after insert apart from `valid_until`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub uuid: Uuid,
    pub plan_execution_id: String,
    pub stage_execution_id: Option<String>,
    pub produced_by: Level,
    pub name: String,
    pub payload: Payload,
    /// `payload.document` serialized once at write time for fast reads.
    pub value_json: String,
    pub group_name: Option<String>,
    pub level_runtime_id_idx: String,
    pub fully_qualified_name: String,
    pub created_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

// ─── Reference / results ──────────────────────────────────────

/// What a consumer asks for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefObject {
    /// Plain name, or a dotted expression-like path.
    pub name: String,
    /// Pins resolution to the node with this setup id.
    #[serde(default)]
    pub producer_id: Option<String>,
}

impl RefObject {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            producer_id: None,
        }
    }

    pub fn produced_by(name: impl Into<String>, producer_setup_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            producer_id: Some(producer_setup_id.into()),
        }
    }

    pub fn is_dotted(&self) -> bool {
        self.name.contains('.')
    }
}

/// Result of an optional resolution.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OptionalOutput {
    pub found: bool,
    pub output: Option<String>,
}

impl OptionalOutput {
    pub fn found(output: String) -> Self {
        Self {
            found: true,
            output: Some(output),
        }
    }

    pub fn missing() -> Self {
        Self::default()
    }
}

/// Lightweight pointer to an outcome, without its payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutcomeRef {
    pub name: String,
    pub instance_id: Uuid,
}
