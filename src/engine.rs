use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Map;
use tokio_util::sync::CancellationToken;

use crate::blueprint::{Blueprint, FINISH_NODE, REVIEW_NODE};
use crate::checkpoint::CheckpointStore;
use crate::colleagues::Colleagues;
use crate::completer::Completer;
use crate::error::{EngineError, FailureReason, InvokeError};
use crate::human::{GateDecision, HilGate};
use crate::prompts::PromptStore;
use crate::registry::ToolSession;
use crate::router;
use crate::state::RunState;
use crate::stores::ArtifactStore;
use crate::synthesizer::ArgSynthesizer;
use crate::types::{
    EngineConfig, Message, PendingTool, ResumeAction, Route, RunOutcome, RunRequest, RunStatus,
    Suspension,
};

/// What a compiled node does when the engine enters it.
#[derive(Debug, Clone, PartialEq)]
enum NodeKind {
    /// The review stage: score the last result, route conditionally.
    Review,
    /// Terminal: mark the run completed.
    Finish,
    /// Execute one tool from the attached ordered list.
    Tool(Vec<String>),
    /// Identity pass-through to the sole successor.
    Passthrough,
}

/// A blueprint lowered to adjacency plus a handler kind per node.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledBlueprint {
    entry:       String,
    kinds:       HashMap<String, NodeKind>,
    successors:  HashMap<String, String>,
    conditional: HashMap<String, HashMap<String, String>>,
}

/// Validates the blueprint and builds its executable form. Idempotent:
/// the same blueprint always lowers to an equal graph.
pub fn compile(blueprint: &Blueprint) -> Result<CompiledBlueprint, EngineError> {
    blueprint.validate()?;

    let mut kinds = HashMap::new();
    let mut successors = HashMap::new();
    for node in &blueprint.nodes {
        let kind = if node.eq_ignore_ascii_case(REVIEW_NODE) {
            NodeKind::Review
        } else if node.eq_ignore_ascii_case(FINISH_NODE) {
            NodeKind::Finish
        } else if let Some(tools) = blueprint.node_tools.get(node) {
            NodeKind::Tool(tools.clone())
        } else {
            NodeKind::Passthrough
        };
        kinds.insert(node.clone(), kind);

        if let Some(next) = blueprint.direct_successor(node) {
            successors.insert(node.clone(), next.to_string());
        }
    }

    Ok(CompiledBlueprint {
        entry:       blueprint.entry().unwrap_or_default().to_string(),
        kinds,
        successors,
        conditional: blueprint.conditional_edges.clone(),
    })
}

enum StepFlow {
    Continue,
    Outcome(RunOutcome),
}

/// Drives compiled blueprints to termination.
///
/// One engine owns one session and serves one run at a time; the outer
/// process may hold many engines concurrently. In-step failures are
/// folded into the state's execution records so the review loop stays the
/// sole retry authority; only faults that make forward progress
/// impossible surface as errors.
pub struct Engine {
    session:     Arc<dyn ToolSession>,
    checkpoints: Arc<dyn CheckpointStore>,
    artifacts:   Option<(Arc<dyn ArtifactStore>, String)>,
    synthesizer: ArgSynthesizer,
    colleagues:  Colleagues,
    gate:        HilGate,
    config:      EngineConfig,
    cancel:      CancellationToken,
}

impl Engine {
    /// Creates a new engine. Prefer `EngineBuilder` for ergonomic
    /// construction.
    pub fn new(
        session: Arc<dyn ToolSession>,
        completer: Arc<dyn Completer>,
        prompts: Arc<dyn PromptStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let synthesizer = ArgSynthesizer::new(Arc::clone(&completer), config.completer_timeout);
        let colleagues = Colleagues::new(
            completer,
            prompts,
            config.colleagues_threshold,
            config.colleagues_max_depth,
            config.completer_timeout,
            config.evaluate_timeout,
        );
        let gate = HilGate::new(config.guarded_tools.clone());
        Self {
            session,
            checkpoints,
            artifacts: None,
            synthesizer,
            colleagues,
            gate,
            config,
            cancel,
        }
    }

    /// Archive terminal states to `bucket` in the given artifact store.
    pub fn with_artifacts(mut self, store: Arc<dyn ArtifactStore>, bucket: impl Into<String>) -> Self {
        self.artifacts = Some((store, bucket.into()));
        self
    }

    pub fn session(&self) -> &Arc<dyn ToolSession> {
        &self.session
    }

    /// Runs (or resumes) one blueprint to completion, failure or
    /// suspension.
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome, EngineError> {
        let compiled = compile(&request.blueprint)?;

        let state = match &request.resume {
            None => RunState::new(&request.task),
            Some(decision) => {
                let mut state = self
                    .checkpoints
                    .load(&request.thread_id)
                    .await
                    .map_err(EngineError::Checkpoint)?
                    .ok_or_else(|| EngineError::ThreadNotFound(request.thread_id.clone()))?;

                match decision.action {
                    ResumeAction::Continue => {
                        state.approved_tools.extend(decision.approved_keys.iter().cloned());
                        // The surfaced execution key is what the caller
                        // approved; merging it guarantees the gate passes
                        // on re-entry. Idempotent, so resuming twice with
                        // the same keys equals resuming once.
                        if let Some(pending) = &state.pending_tool {
                            state.approved_tools.insert(pending.execution_key.clone());
                        }
                        state.status = RunStatus::Running;
                        tracing::info!(thread = %request.thread_id, "resuming after approval");
                        state
                    }
                    ResumeAction::Deny => {
                        if let Some(pending) = state.pending_tool.take() {
                            state.record_execution(
                                pending.tool_name,
                                pending.tool_args,
                                "Error: permission denied by user",
                            );
                        }
                        state.fail(FailureReason::PermissionDenied);
                        self.save(&request.thread_id, &state).await?;
                        self.archive(&request.thread_id, &state).await;
                        tracing::warn!(thread = %request.thread_id, "run denied by user");
                        return Ok(RunOutcome::Failed {
                            state,
                            reason: FailureReason::PermissionDenied,
                        });
                    }
                }
            }
        };

        self.drive(&request.thread_id, &compiled, state).await
    }

    async fn drive(
        &self,
        thread_id: &str,
        compiled: &CompiledBlueprint,
        mut state: RunState,
    ) -> Result<RunOutcome, EngineError> {
        let mut transitions = 0usize;

        // The engine's program counter. `state.current_node` is written
        // only by tool nodes (it names the node whose tool list is
        // installed), so a resumed run re-enters at the suspended tool
        // node and a fresh run starts at the entry.
        let mut cursor = if state.current_node.is_empty() {
            compiled.entry.clone()
        } else {
            state.current_node.clone()
        };

        loop {
            if self.cancel.is_cancelled() {
                return self.finish_cancelled(thread_id, state).await;
            }

            transitions += 1;
            if transitions > self.config.step_limit {
                tracing::warn!(
                    limit = self.config.step_limit,
                    recommendations = %state.colleagues_analysis,
                    "step limit exceeded"
                );
                state.fail(FailureReason::StepLimitExceeded);
                self.save(thread_id, &state).await?;
                self.archive(thread_id, &state).await;
                return Ok(RunOutcome::Failed { state, reason: FailureReason::StepLimitExceeded });
            }

            let node = cursor.clone();
            let kind = compiled
                .kinds
                .get(&node)
                .ok_or_else(|| EngineError::BlueprintInvalid(format!("no handler for node '{node}'")))?
                .clone();

            tracing::info!(node = %node, transition = transitions, "engine tick");

            match kind {
                NodeKind::Finish => {
                    state.status = RunStatus::Completed;
                    self.archive(thread_id, &state).await;
                    return Ok(RunOutcome::Completed(state));
                }

                NodeKind::Review => {
                    let review = tokio::select! {
                        _ = self.cancel.cancelled() => None,
                        review = self.colleagues.evaluate(&state) => Some(review),
                    };
                    let Some(review) = review else {
                        return self.finish_cancelled(thread_id, state).await;
                    };

                    state.colleagues_score = review.score;
                    state.colleagues_analysis = review.recommendations.clone();
                    state.messages.push(Message::assistant(review.recommendations));

                    let route = router::route(
                        review.score,
                        self.config.colleagues_threshold,
                        &state.executed_tools,
                        state.tool_sequence_index,
                        &state.current_node_tools,
                    );
                    state.route = Some(route);

                    let target = compiled
                        .conditional
                        .get(&node)
                        .and_then(|routes| routes.get(route.as_str()))
                        .cloned()
                        .ok_or_else(|| {
                            EngineError::BlueprintInvalid(format!(
                                "review node '{node}' has no target for route '{route}'"
                            ))
                        })?;

                    tracing::info!(from = %node, route = %route, to = %target, "review transition");
                    cursor = target;
                }

                NodeKind::Tool(tools) => {
                    let step = self
                        .execute_tool_node(thread_id, compiled, &mut state, &mut cursor, &tools)
                        .await?;
                    match step {
                        StepFlow::Continue => {}
                        StepFlow::Outcome(outcome) => return Ok(outcome),
                    }
                }

                NodeKind::Passthrough => match compiled.successors.get(&node) {
                    Some(next) => {
                        cursor = next.clone();
                    }
                    None => {
                        state.status = RunStatus::Completed;
                        self.archive(thread_id, &state).await;
                        return Ok(RunOutcome::Completed(state));
                    }
                },
            }
        }
    }

    async fn execute_tool_node(
        &self,
        thread_id: &str,
        compiled: &CompiledBlueprint,
        state: &mut RunState,
        cursor: &mut String,
        tools: &[String],
    ) -> Result<StepFlow, EngineError> {
        let node = cursor.clone();

        // A checkpointed pending call replays with the arguments the
        // human saw (entry bookkeeping already ran before the
        // suspension); everything else selects and synthesizes fresh.
        let (tool_name, args, context) = match state.pending_tool.take() {
            Some(pending) => (pending.tool_name, pending.tool_args, pending.context),
            None => {
                install_node_tools(state, &node, tools);

                let selected = state
                    .current_node_tools
                    .get(state.tool_sequence_index)
                    .cloned()
                    .or_else(|| {
                        // Index out of range: first declared tool that is
                        // actually available in the session.
                        tools.iter().find(|t| self.session.get(t).is_some()).cloned()
                    })
                    .unwrap_or_else(|| tools[0].clone());

                let Some(descriptor) = self.session.get(&selected) else {
                    tracing::warn!(node = %node, tool = %selected, "tool not in session");
                    state.record_execution(
                        selected.clone(),
                        Map::new(),
                        format!("Error: tool '{selected}' not found in registry"),
                    );
                    return self.leave_tool_node(thread_id, compiled, state, cursor).await;
                };

                let context = state.context_window();
                let args = self
                    .synthesizer
                    .synthesize(&descriptor, &state.task, &context)
                    .await;
                (selected, args, context)
            }
        };

        match self.gate.check(&tool_name, &args, &state.approved_tools) {
            GateDecision::Proceed => {}
            GateDecision::Suspend { execution_key } => {
                let pending = PendingTool {
                    tool_name,
                    tool_args: args,
                    task: state.task.clone(),
                    context,
                    execution_key,
                };
                state.pending_tool = Some(pending.clone());
                state.status = RunStatus::Suspended;
                self.save(thread_id, state).await?;
                tracing::info!(tool = %pending.tool_name, thread = %thread_id, "suspended for approval");
                return Ok(StepFlow::Outcome(RunOutcome::Suspended(Suspension {
                    thread_id: thread_id.to_string(),
                    pending,
                })));
            }
        }

        let result = if args.is_empty() {
            // Synthesis produced nothing; the step is recorded as a skip
            // for the reviewer to weigh in on.
            "Error: no arguments generated".to_string()
        } else {
            match self.session.invoke(&tool_name, &args).await {
                Ok(result) => result,
                Err(InvokeError::Cancelled) => {
                    state.record_execution(tool_name, args, "Error: cancelled");
                    let outcome = self.finish_cancelled(thread_id, state.clone()).await?;
                    return Ok(StepFlow::Outcome(outcome));
                }
                Err(InvokeError::ProviderCrashed(msg)) => {
                    self.session.close().await;
                    return Err(EngineError::ProviderCrashed(msg));
                }
                Err(other) => format!("Error: {other}"),
            }
        };

        tracing::debug!(tool = %tool_name, result = %truncate(&result, 120), "tool executed");
        state.record_execution(tool_name, args, result);
        self.leave_tool_node(thread_id, compiled, state, cursor).await
    }

    /// A tool node transitions unconditionally to its successor; with no
    /// successor the run is complete.
    async fn leave_tool_node(
        &self,
        thread_id: &str,
        compiled: &CompiledBlueprint,
        state: &mut RunState,
        cursor: &mut String,
    ) -> Result<StepFlow, EngineError> {
        match compiled.successors.get(cursor.as_str()) {
            Some(next) => {
                *cursor = next.clone();
                Ok(StepFlow::Continue)
            }
            None => {
                state.status = RunStatus::Completed;
                self.archive(thread_id, state).await;
                Ok(StepFlow::Outcome(RunOutcome::Completed(state.clone())))
            }
        }
    }

    async fn finish_cancelled(
        &self,
        thread_id: &str,
        mut state: RunState,
    ) -> Result<RunOutcome, EngineError> {
        state.fail(FailureReason::Cancelled);
        if let Err(e) = self.checkpoints.save(thread_id, &state).await {
            tracing::warn!(thread = %thread_id, error = %e, "failed to save cancelled state");
        }
        self.session.close().await;
        tracing::warn!(thread = %thread_id, "run cancelled");
        Ok(RunOutcome::Failed { state, reason: FailureReason::Cancelled })
    }

    async fn save(&self, thread_id: &str, state: &RunState) -> Result<(), EngineError> {
        self.checkpoints
            .save(thread_id, state)
            .await
            .map_err(EngineError::Checkpoint)
    }

    /// Best-effort archive of a terminal state; off the hot path, never
    /// fatal.
    async fn archive(&self, thread_id: &str, state: &RunState) {
        let Some((store, bucket)) = &self.artifacts else { return };
        let bytes = match serde_json::to_vec_pretty(state) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "could not serialize state for archive");
                return;
            }
        };
        let metadata = HashMap::from([(
            "status".to_string(),
            format!("{:?}", state.status).to_lowercase(),
        )]);
        let key = format!("runs/{thread_id}.json");
        if let Err(e) = store.put_object(bucket, &key, bytes, metadata).await {
            tracing::warn!(bucket = %bucket, key = %key, error = %e, "artifact upload failed");
        }
    }
}

/// Entry bookkeeping for a tool node. Entering a different node installs
/// its tool list and resets the sequence index, keyed on node identity
/// (two nodes may declare identical tool lists); re-entering the same
/// node with route `next_tool` advances the index instead. Only tool
/// nodes write `current_node`, so identity survives the review hop in
/// between.
fn install_node_tools(state: &mut RunState, node: &str, tools: &[String]) {
    if state.current_node != node {
        state.current_node = node.to_string();
        state.current_node_tools = tools.to_vec();
        state.tool_sequence_index = 0;
    } else if state.route == Some(Route::NextTool) {
        state.tool_sequence_index += 1;
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
