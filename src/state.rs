use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::error::FailureReason;
use crate::types::{Message, PendingTool, Route, RunStatus, ToolExecutionRecord};

/// The single state record that flows through a blueprint run.
///
/// `messages`, `executed_tools` and `tool_execution_results` are
/// append-only and grow in execution order. `current_node`,
/// `current_node_tools`, `tool_sequence_index` and `route` are replaced on
/// transition. The whole record round-trips through serde so it can be
/// checkpointed verbatim while a run is suspended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    // ── Task definition ──────────────────────────────────
    /// The natural-language task. Set at creation, never mutated.
    pub task:                   String,

    // ── Append-only history ──────────────────────────────
    pub messages:               Vec<Message>,
    /// Tool names in execution order; the router's loop-suppression input.
    pub executed_tools:         Vec<String>,
    /// One record per invocation, successful or errored.
    pub tool_execution_results: Vec<ToolExecutionRecord>,

    // ── Position within the blueprint ────────────────────
    /// The tool node whose list is installed. Written only on tool-node
    /// entry, so it still names that node while the review stage runs.
    pub current_node:           String,
    pub current_node_tools:     Vec<String>,
    /// Position of the next tool within `current_node_tools`.
    pub tool_sequence_index:    usize,

    // ── Review & routing ─────────────────────────────────
    /// Last judge score, in `[0, 10]`.
    pub colleagues_score:       f64,
    /// Last recommendations text from the review stage.
    pub colleagues_analysis:    String,
    pub route:                  Option<Route>,

    // ── Human-in-the-loop ────────────────────────────────
    /// Approval keys (`tool:hash` or the `tool:` wildcard form).
    pub approved_tools:         HashSet<String>,
    /// Set while suspended: the call awaiting approval.
    pub pending_tool:           Option<PendingTool>,

    // ── Lifecycle ────────────────────────────────────────
    pub status:                 RunStatus,
    pub failure:                Option<FailureReason>,
}

impl RunState {
    pub fn new(task: impl Into<String>) -> Self {
        let task = task.into();
        Self {
            messages:               vec![Message::human(task.clone())],
            task,
            executed_tools:         Vec::new(),
            tool_execution_results: Vec::new(),
            current_node:           String::new(),
            current_node_tools:     Vec::new(),
            tool_sequence_index:    0,
            colleagues_score:       0.0,
            colleagues_analysis:    String::new(),
            route:                  None,
            approved_tools:         HashSet::new(),
            pending_tool:           None,
            status:                 RunStatus::Running,
            failure:                None,
        }
    }

    /// Records one invocation outcome. The two histories advance together,
    /// which is what keeps `executed_tools` and `tool_execution_results`
    /// the same length at every point in a run.
    pub fn record_execution(
        &mut self,
        tool: impl Into<String>,
        args: Map<String, Value>,
        result: impl Into<String>,
    ) {
        let tool = tool.into();
        let result = result.into();
        self.messages.push(Message::tool(format!("{tool}: {result}")));
        self.executed_tools.push(tool.clone());
        self.tool_execution_results.push(ToolExecutionRecord { tool, args, result });
    }

    /// Renders the last two execution records as short context text for
    /// argument synthesis. Empty when nothing has run yet.
    pub fn context_window(&self) -> String {
        if self.tool_execution_results.is_empty() {
            return String::new();
        }
        let mut context = String::from("\nPrevious results:\n");
        let start = self.tool_execution_results.len().saturating_sub(2);
        for record in &self.tool_execution_results[start..] {
            context.push_str(&format!("- {}: {}\n", record.tool, record.result));
        }
        context
    }

    /// The record the review stage scores, if any.
    pub fn last_execution(&self) -> Option<&ToolExecutionRecord> {
        self.tool_execution_results.last()
    }

    pub fn fail(&mut self, reason: FailureReason) {
        self.status = RunStatus::Failed;
        self.failure = Some(reason);
    }
}
