use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;

use crate::blueprint::Blueprint;
use crate::error::FailureReason;
use crate::state::RunState;

/// Routing decision emitted by the review stage.
///
/// These three labels are the complete route vocabulary of the review
/// node's conditional edges; a blueprint must map all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Re-run the tool that was just reviewed.
    RetrySame,
    /// Advance to the next tool in the current node's sequence.
    NextTool,
    /// Leave the current node for its next-step target.
    NextStep,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetrySame => "retry_same",
            Self::NextTool  => "next_tool",
            Self::NextStep  => "next_step",
        }
    }

    /// All labels the review node's conditional edges must cover.
    pub const LABELS: [&'static str; 3] = ["retry_same", "next_tool", "next_step"];
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Human,
    Assistant,
    Tool,
}

/// One entry in the run's append-only message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role:    MessageRole,
    pub content: String,
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Human, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Tool, content: content.into() }
    }
}

/// One completed (or errored) tool invocation. Errors are recorded as
/// `"Error: …"` result strings, never raised past the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub tool:   String,
    pub args:   Map<String, Value>,
    pub result: String,
}

/// The tool call a suspended run is waiting on. Persisted verbatim in the
/// checkpoint so resumption replays exactly what was approved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTool {
    pub tool_name:     String,
    pub tool_args:     Map<String, Value>,
    pub task:          String,
    pub context:       String,
    pub execution_key: String,
}

/// Raised (as a value) when a guarded tool call needs human approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suspension {
    pub thread_id: String,
    pub pending:   PendingTool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeAction {
    Continue,
    Deny,
}

/// A human decision applied when re-entering a suspended run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeDecision {
    pub action:        ResumeAction,
    #[serde(default)]
    pub approved_keys: Vec<String>,
}

impl ResumeDecision {
    pub fn approve(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            action:        ResumeAction::Continue,
            approved_keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn deny() -> Self {
        Self { action: ResumeAction::Deny, approved_keys: Vec::new() }
    }
}

/// A request to start (or resume) one blueprint run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub thread_id: String,
    pub blueprint: Blueprint,
    pub task:      String,
    #[serde(default)]
    pub resume:    Option<ResumeDecision>,
}

impl RunRequest {
    /// New request with a generated thread id.
    pub fn new(blueprint: Blueprint, task: impl Into<String>) -> Self {
        Self {
            thread_id: uuid::Uuid::new_v4().to_string(),
            blueprint,
            task: task.into(),
            resume: None,
        }
    }

    /// Re-enter a suspended run with a human decision.
    pub fn resume(
        thread_id: impl Into<String>,
        blueprint: Blueprint,
        decision: ResumeDecision,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            blueprint,
            task: String::new(),
            resume: Some(decision),
        }
    }
}

/// Terminal (or suspended) result of driving a run.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunState),
    Failed { state: RunState, reason: FailureReason },
    Suspended(Suspension),
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Completed(_)    => RunStatus::Completed,
            Self::Failed { .. }   => RunStatus::Failed,
            Self::Suspended(_)    => RunStatus::Suspended,
        }
    }
}

/// Engine tuning knobs.
///
/// Defaults match the deployed values; `from_env` overlays the recognized
/// environment variables on top of them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard ceiling on node transitions per run.
    pub step_limit: usize,

    /// Deadline for a single tool invocation.
    pub tool_timeout: Duration,

    /// Deadline for a single Completer call.
    pub completer_timeout: Duration,

    /// Overall deadline for one review (all analyses + judge rounds).
    pub evaluate_timeout: Duration,

    /// Mean judge score at or above which the review passes.
    pub colleagues_threshold: f64,

    /// Maximum reviewer escalation depth; analyses double per level.
    pub colleagues_max_depth: u32,

    /// Tool names that require human approval before execution.
    pub guarded_tools: HashSet<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_limit:           32,
            tool_timeout:         Duration::from_secs(60),
            completer_timeout:    Duration::from_secs(30),
            evaluate_timeout:     Duration::from_secs(120),
            colleagues_threshold: 7.0,
            colleagues_max_depth: 1,
            guarded_tools:        HashSet::new(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `COMPLETER_TIMEOUT_MS`, `TOOL_TIMEOUT_MS`,
    /// `STEP_LIMIT`, `COLLEAGUES_THRESHOLD` and `COLLEAGUES_MAX_DEPTH`.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = read_env::<u64>("COMPLETER_TIMEOUT_MS") {
            config.completer_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read_env::<u64>("TOOL_TIMEOUT_MS") {
            config.tool_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = read_env::<usize>("STEP_LIMIT") {
            config.step_limit = n;
        }
        if let Some(t) = read_env::<f64>("COLLEAGUES_THRESHOLD") {
            config.colleagues_threshold = t;
        }
        if let Some(d) = read_env::<u32>("COLLEAGUES_MAX_DEPTH") {
            config.colleagues_max_depth = d;
        }
        config
    }

    pub fn guard_tool(&mut self, name: impl Into<String>) {
        self.guarded_tools.insert(name.into());
    }
}

fn read_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_labels_serialize_snake_case() {
        assert_eq!(serde_json::to_value(Route::RetrySame).unwrap(), "retry_same");
        assert_eq!(serde_json::to_value(Route::NextTool).unwrap(), "next_tool");
        assert_eq!(serde_json::to_value(Route::NextStep).unwrap(), "next_step");
    }

    #[test]
    fn default_config_matches_deployed_values() {
        let config = EngineConfig::default();
        assert_eq!(config.step_limit, 32);
        assert_eq!(config.tool_timeout, Duration::from_secs(60));
        assert_eq!(config.completer_timeout, Duration::from_secs(30));
        assert_eq!(config.colleagues_threshold, 7.0);
        assert_eq!(config.colleagues_max_depth, 1);
    }
}
