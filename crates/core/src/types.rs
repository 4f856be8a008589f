use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for WorkflowId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for WorkflowId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a workflow step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status of a workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Waiting,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Failed or skipped: dependents of such a step never run.
    pub fn blocks_dependents(self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why a step was skipped instead of run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SkipReason {
    /// A dependency failed or was itself skipped
    DependencyFailed { dependency: String },
    /// The workflow was cancelled before the step started
    Cancelled,
    /// The process stopped before the step could start
    Interrupted,
}

/// An input/output pair shown to few-shot techniques
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub input: String,
    pub output: String,
}

fn default_provider() -> String {
    "openai".to_string()
}

/// Caller-supplied definition of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    pub technique: String,
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub examples: Vec<FewShotExample>,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl StepDefinition {
    pub fn new(
        name: impl Into<String>,
        technique: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            technique: technique.into(),
            prompt: prompt.into(),
            context: None,
            examples: Vec::new(),
            provider: default_provider(),
            parameters: serde_json::Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// Caller-supplied definition of a workflow, validated before it is stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Structured payload returned by a technique
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub result: String,
    #[serde(default)]
    pub reasoning: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A step as tracked through execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: StepId,
    pub name: String,
    pub technique: String,
    pub prompt: String,
    pub context: Option<String>,
    #[serde(default)]
    pub examples: Vec<FewShotExample>,
    pub provider: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub status: StepStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub skip_reason: Option<SkipReason>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStep {
    /// Build a waiting step with a fresh id
    pub fn from_definition(def: StepDefinition) -> Self {
        Self {
            id: StepId::new(),
            name: def.name,
            technique: def.technique,
            prompt: def.prompt,
            context: def.context,
            examples: def.examples,
            provider: def.provider,
            parameters: def.parameters,
            depends_on: def.depends_on,
            status: StepStatus::Waiting,
            result: None,
            error: None,
            skip_reason: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = StepStatus::Running;
        self.started_at = Some(now);
    }

    pub fn complete(&mut self, result: String, now: DateTime<Utc>) {
        self.status = StepStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(now);
    }

    pub fn skip(&mut self, reason: SkipReason, now: DateTime<Utc>) {
        self.status = StepStatus::Skipped;
        self.skip_reason = Some(reason);
        self.completed_at = Some(now);
    }
}

/// A workflow record as stored and reported
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub cancel_requested: bool,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub results: BTreeMap<String, AgentOutput>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn step(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.name == name)
    }

    pub fn step_status(&self, name: &str) -> Option<StepStatus> {
        self.step(name).map(|s| s.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn all_steps_terminal(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }
}

/// Filter for listing workflows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowFilter {
    /// Only return workflows that have not reached a terminal status
    #[serde(default)]
    pub active_only: bool,
    /// Only return workflows created with this session id
    #[serde(default)]
    pub session_id: Option<String>,
    /// Maximum number of workflows returned, most recent first
    #[serde(default)]
    pub limit: Option<usize>,
}

impl WorkflowFilter {
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Default::default()
        }
    }

    /// Every workflow of one session
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, workflow: &Workflow) -> bool {
        if self.active_only && workflow.is_terminal() {
            return false;
        }
        match &self.session_id {
            Some(session) => workflow.session_id.as_deref() == Some(session.as_str()),
            None => true,
        }
    }
}
