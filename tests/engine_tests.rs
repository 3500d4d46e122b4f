//! End-to-end engine tests.
//!
//! All tests use `MockCompleter` and `StaticToolSession` — no network
//! calls and no subprocesses. Run with: `cargo test`

use std::sync::Arc;

use serde_json::json;

use agentrt::{
    Blueprint, CheckpointStore, Completion, EngineBuilder, FailureReason, MockCompleter,
    ResumeDecision, RunOutcome, RunRequest, RunState, RunStatus, StaticToolSession,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test helpers
// ─────────────────────────────────────────────────────────────────────────────

/// A session whose tools all succeed, echoing a fixed result.
fn session_with(tools: &[&str]) -> StaticToolSession {
    let mut session = StaticToolSession::new();
    for name in tools {
        let result = format!("{name} ran fine");
        session.register(
            *name,
            format!("Test tool {name}"),
            json!({
                "type": "object",
                "properties": { "x": { "type": "integer" } },
                "required": ["x"]
            }),
            Box::new(move |_args| Ok(result.clone())),
        );
    }
    session
}

fn chart_blueprint() -> Blueprint {
    serde_json::from_value(json!({
        "nodes": ["chart", "colleagues", "finish"],
        "edges": [["chart", "colleagues"]],
        "node_tools": { "chart": ["chart_bar"] },
        "conditional_edges": {
            "colleagues": {
                "retry_same": "chart",
                "next_tool":  "chart",
                "next_step":  "finish"
            }
        }
    }))
    .unwrap()
}

fn two_tool_blueprint() -> Blueprint {
    serde_json::from_value(json!({
        "nodes": ["work", "colleagues", "finish"],
        "edges": [["work", "colleagues"]],
        "node_tools": { "work": ["t1", "t2"] },
        "conditional_edges": {
            "colleagues": {
                "retry_same": "work",
                "next_tool":  "work",
                "next_step":  "finish"
            }
        }
    }))
    .unwrap()
}

/// The mock script for one tool step: argument synthesis, two colleague
/// analyses, then the judge with the given score.
fn tool_step(score: f64) -> Vec<Completion> {
    vec![
        Completion::structured(json!({ "x": 1 })),
        Completion::structured(json!({ "analysis": "reviewed the step" })),
        Completion::structured(json!({ "analysis": "checked the outcome" })),
        Completion::structured(json!({ "final_score": score, "recommendations": "judge verdict" })),
    ]
}

fn script(steps: Vec<Vec<Completion>>) -> MockCompleter {
    MockCompleter::scripted(steps.into_iter().flatten().collect())
}

async fn run_engine(
    session: StaticToolSession,
    completer: MockCompleter,
    blueprint: Blueprint,
    thread_id: &str,
) -> RunOutcome {
    let engine = EngineBuilder::new()
        .session(Arc::new(session))
        .completer(Arc::new(completer))
        .build()
        .await
        .expect("builder should succeed");
    engine
        .run(RunRequest {
            thread_id: thread_id.to_string(),
            blueprint,
            task: "test task".to_string(),
            resume: None,
        })
        .await
        .expect("run should not hard-fail")
}

fn completed_state(outcome: RunOutcome) -> RunState {
    match outcome {
        RunOutcome::Completed(state) => state,
        other => panic!("expected completion, got {:?}", other.status()),
    }
}

/// Invariants every produced state must satisfy.
fn assert_state_invariants(state: &RunState) {
    assert_eq!(
        state.executed_tools.len(),
        state.tool_execution_results.len(),
        "executed_tools and tool_execution_results must stay in lockstep"
    );
    // No tool name appears more than 3 consecutive times.
    let mut streak = 1;
    for pair in state.executed_tools.windows(2) {
        streak = if pair[0] == pair[1] { streak + 1 } else { 1 };
        assert!(streak <= 3, "tool '{}' ran more than 3 times in a row", pair[1]);
    }
    // The sequence index stays inside the installed tool list.
    if !state.current_node_tools.is_empty() {
        assert!(state.tool_sequence_index < state.current_node_tools.len());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 1: simple chart → finish
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chart_then_finish_on_good_score() {
    let outcome = run_engine(
        session_with(&["chart_bar"]),
        script(vec![tool_step(9.0)]),
        chart_blueprint(),
        "t-chart",
    )
    .await;

    let state = completed_state(outcome);
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.executed_tools, vec!["chart_bar"]);
    assert_eq!(state.tool_execution_results.len(), 1);
    assert_eq!(state.tool_execution_results[0].result, "chart_bar ran fine");
    assert_eq!(state.colleagues_score, 9.0);
    assert_state_invariants(&state);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 2: low score retries, then a good score advances
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn low_score_retries_then_completes() {
    let outcome = run_engine(
        session_with(&["chart_bar"]),
        script(vec![tool_step(4.0), tool_step(8.0)]),
        chart_blueprint(),
        "t-retry",
    )
    .await;

    let state = completed_state(outcome);
    assert_eq!(state.executed_tools, vec!["chart_bar", "chart_bar"]);
    assert_eq!(state.tool_execution_results.len(), 2);
    assert_eq!(state.colleagues_score, 8.0);
    assert_state_invariants(&state);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 3: two-tool node advances on a good score
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_tool_node_advances_through_both_tools() {
    let outcome = run_engine(
        session_with(&["t1", "t2"]),
        script(vec![tool_step(8.0), tool_step(8.0)]),
        two_tool_blueprint(),
        "t-advance",
    )
    .await;

    let state = completed_state(outcome);
    assert_eq!(state.executed_tools, vec!["t1", "t2"]);
    assert_eq!(state.tool_sequence_index, 1);
    assert_state_invariants(&state);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 4: loop guard bounds an always-failing review
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn loop_guard_bounds_consecutive_retries() {
    // The judge hates everything. Each tool runs 3 times before the
    // guard forces the run onward.
    let steps = (0..6).map(|_| tool_step(2.0)).collect();
    let outcome = run_engine(
        session_with(&["t1", "t2"]),
        script(steps),
        two_tool_blueprint(),
        "t-loop",
    )
    .await;

    let state = completed_state(outcome);
    assert_eq!(
        state.executed_tools,
        vec!["t1", "t1", "t1", "t2", "t2", "t2"]
    );
    assert_state_invariants(&state);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 5: human approval on a guarded tool
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn guarded_tool_suspends_then_completes_after_approval() {
    let blueprint: Blueprint = serde_json::from_value(json!({
        "nodes": ["email", "colleagues", "finish"],
        "edges": [["email", "colleagues"]],
        "node_tools": { "email": ["send_email"] },
        "conditional_edges": {
            "colleagues": {
                "retry_same": "email",
                "next_tool":  "email",
                "next_step":  "finish"
            }
        }
    }))
    .unwrap();

    // One mock serves both the initial run (synthesis only; the run
    // suspends before review) and the resumed run (analyses + judge).
    let completer = MockCompleter::scripted(vec![
        Completion::structured(json!({ "x": 7 })),
        Completion::structured(json!({ "analysis": "email looked correct" })),
        Completion::structured(json!({ "analysis": "recipient matches task" })),
        Completion::structured(json!({ "final_score": 9.0, "recommendations": "done" })),
    ]);

    let checkpoints = Arc::new(agentrt::MemoryCheckpointStore::new());
    let engine = EngineBuilder::new()
        .session(Arc::new(session_with(&["send_email"])))
        .completer(Arc::new(completer))
        .checkpoints(checkpoints.clone())
        .guard_tool("send_email")
        .build()
        .await
        .unwrap();

    let request = RunRequest {
        thread_id: "t-hil".to_string(),
        blueprint: blueprint.clone(),
        task: "email the leads".to_string(),
        resume: None,
    };

    // First run suspends with the pending descriptor.
    let suspension = match engine.run(request.clone()).await.unwrap() {
        RunOutcome::Suspended(suspension) => suspension,
        other => panic!("expected suspension, got {:?}", other.status()),
    };
    assert_eq!(suspension.thread_id, "t-hil");
    assert_eq!(suspension.pending.tool_name, "send_email");
    assert_eq!(suspension.pending.tool_args["x"], json!(7));
    assert!(suspension.pending.execution_key.starts_with("send_email:"));

    // Exactly one checkpoint was written, carrying the pending tool.
    let checkpointed = checkpoints.load("t-hil").await.unwrap().unwrap();
    assert_eq!(checkpointed.status, RunStatus::Suspended);
    let pending = checkpointed.pending_tool.as_ref().unwrap();
    assert_eq!(pending.tool_name, "send_email");
    assert!(checkpointed.executed_tools.is_empty());

    // Resume with the surfaced key; the run replays the pending call and
    // completes.
    let resumed = RunRequest {
        resume: Some(ResumeDecision::approve([suspension.pending.execution_key.clone()])),
        ..request
    };
    let state = completed_state(engine.run(resumed).await.unwrap());
    assert_eq!(state.executed_tools, vec!["send_email"]);
    assert_eq!(state.tool_execution_results[0].result, "send_email ran fine");
    assert!(state.pending_tool.is_none());
    assert_state_invariants(&state);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 6: permission denied
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn denied_approval_fails_the_run() {
    let blueprint: Blueprint = serde_json::from_value(json!({
        "nodes": ["email", "colleagues", "finish"],
        "edges": [["email", "colleagues"]],
        "node_tools": { "email": ["send_email"] },
        "conditional_edges": {
            "colleagues": {
                "retry_same": "email",
                "next_tool":  "email",
                "next_step":  "finish"
            }
        }
    }))
    .unwrap();

    let completer = MockCompleter::scripted(vec![Completion::structured(json!({ "x": 7 }))]);
    let engine = EngineBuilder::new()
        .session(Arc::new(session_with(&["send_email"])))
        .completer(Arc::new(completer))
        .guard_tool("send_email")
        .build()
        .await
        .unwrap();

    let request = RunRequest {
        thread_id: "t-deny".to_string(),
        blueprint,
        task: "email the leads".to_string(),
        resume: None,
    };

    match engine.run(request.clone()).await.unwrap() {
        RunOutcome::Suspended(_) => {}
        other => panic!("expected suspension, got {:?}", other.status()),
    }

    let denied = RunRequest { resume: Some(ResumeDecision::deny()), ..request };
    match engine.run(denied).await.unwrap() {
        RunOutcome::Failed { state, reason } => {
            assert_eq!(reason, FailureReason::PermissionDenied);
            assert_eq!(state.status, RunStatus::Failed);
            assert_eq!(state.failure, Some(FailureReason::PermissionDenied));
            // The rejection is recorded as the step's result.
            assert_eq!(state.executed_tools, vec!["send_email"]);
            assert!(state.tool_execution_results[0].result.contains("permission denied"));
            assert_state_invariants(&state);
        }
        other => panic!("expected failure, got {:?}", other.status()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Boundary: a finish-only blueprint completes immediately
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn finish_only_blueprint_completes_with_no_executions() {
    let blueprint: Blueprint = serde_json::from_value(json!({ "nodes": ["finish"] })).unwrap();
    let completer = MockCompleter::scripted(vec![]);
    let outcome = run_engine(session_with(&[]), completer, blueprint, "t-finish").await;

    let state = completed_state(outcome);
    assert!(state.executed_tools.is_empty());
    assert!(state.tool_execution_results.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Boundary: a cyclic blueprint with a failing review hits the step limit
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn always_failing_review_in_a_cycle_hits_the_step_limit() {
    // Every route leads back to the tool node, so nothing can terminate
    // the run except the ceiling.
    let blueprint: Blueprint = serde_json::from_value(json!({
        "nodes": ["chart", "colleagues", "finish"],
        "edges": [["chart", "colleagues"]],
        "node_tools": { "chart": ["chart_bar"] },
        "conditional_edges": {
            "colleagues": {
                "retry_same": "chart",
                "next_tool":  "chart",
                "next_step":  "chart"
            }
        }
    }))
    .unwrap();

    // The mock runs dry immediately: synthesis yields no arguments and
    // every review scores zero, which only ever routes back.
    let engine = EngineBuilder::new()
        .session(Arc::new(session_with(&["chart_bar"])))
        .completer(Arc::new(MockCompleter::scripted(vec![])))
        .step_limit(10)
        .build()
        .await
        .unwrap();

    let outcome = engine
        .run(RunRequest {
            thread_id: "t-limit".to_string(),
            blueprint,
            task: "never good enough".to_string(),
            resume: None,
        })
        .await
        .unwrap();

    match outcome {
        RunOutcome::Failed { state, reason } => {
            assert_eq!(reason, FailureReason::StepLimitExceeded);
            assert_eq!(state.status, RunStatus::Failed);
            // The forced cycle re-executes the same tool, so only the
            // lockstep invariant applies here.
            assert_eq!(state.executed_tools.len(), state.tool_execution_results.len());
        }
        other => panic!("expected step-limit failure, got {:?}", other.status()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// A tool missing from the session is recorded, not raised
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_tool_is_recorded_and_the_run_continues() {
    // chart_bar is in the blueprint but not in the session. The step
    // records the miss, the reviewer sees it and routes onward.
    let completer = MockCompleter::scripted(vec![
        Completion::structured(json!({ "analysis": "tool was unavailable" })),
        Completion::structured(json!({ "analysis": "nothing ran" })),
        Completion::structured(json!({ "final_score": 8.0, "recommendations": "move on" })),
    ]);
    let outcome = run_engine(session_with(&[]), completer, chart_blueprint(), "t-missing").await;

    let state = completed_state(outcome);
    assert_eq!(state.executed_tools, vec!["chart_bar"]);
    assert!(state.tool_execution_results[0].result.contains("not found in registry"));
    assert_state_invariants(&state);
}

// ─────────────────────────────────────────────────────────────────────────────
// Empty argument synthesis is a recorded skip
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_synthesis_records_a_skip() {
    // Synthesis produces no structured output; review scores high so the
    // run moves on with the skip on record.
    let completer = MockCompleter::scripted(vec![
        Completion::text("no tool call, just chatter"),
        Completion::structured(json!({ "analysis": "nothing was generated" })),
        Completion::structured(json!({ "analysis": "skip it" })),
        Completion::structured(json!({ "final_score": 8.0, "recommendations": "proceed" })),
    ]);
    let outcome = run_engine(
        session_with(&["chart_bar"]),
        completer,
        chart_blueprint(),
        "t-skip",
    )
    .await;

    let state = completed_state(outcome);
    assert_eq!(state.tool_execution_results[0].result, "Error: no arguments generated");
    assert_state_invariants(&state);
}

// ─────────────────────────────────────────────────────────────────────────────
// Pass-through nodes forward without touching histories
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn passthrough_node_forwards_to_its_successor() {
    let blueprint: Blueprint = serde_json::from_value(json!({
        "nodes": ["gateway", "chart", "colleagues", "finish"],
        "edges": [["gateway", "chart"], ["chart", "colleagues"]],
        "node_tools": { "chart": ["chart_bar"] },
        "conditional_edges": {
            "colleagues": {
                "retry_same": "chart",
                "next_tool":  "chart",
                "next_step":  "finish"
            }
        }
    }))
    .unwrap();

    let outcome = run_engine(
        session_with(&["chart_bar"]),
        script(vec![tool_step(9.0)]),
        blueprint,
        "t-pass",
    )
    .await;

    let state = completed_state(outcome);
    assert_eq!(state.executed_tools, vec!["chart_bar"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// An invalid blueprint never starts
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_blueprint_is_rejected_before_any_execution() {
    let blueprint: Blueprint = serde_json::from_value(json!({
        "nodes": ["chart", "finish"],
        "edges": [["chart", "nowhere"]],
        "node_tools": { "chart": ["chart_bar"] }
    }))
    .unwrap();

    let completer = MockCompleter::scripted(vec![]);
    let engine = EngineBuilder::new()
        .session(Arc::new(session_with(&["chart_bar"])))
        .completer(Arc::new(completer))
        .build()
        .await
        .unwrap();

    let result = engine
        .run(RunRequest {
            thread_id: "t-invalid".to_string(),
            blueprint,
            task: "won't start".to_string(),
            resume: None,
        })
        .await;

    match result {
        Err(agentrt::EngineError::BlueprintInvalid(msg)) => assert!(msg.contains("nowhere")),
        other => panic!("expected BlueprintInvalid, got {other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wildcard approval lets a guarded tool run without suspension
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn wildcard_approval_skips_the_suspension() {
    let blueprint: Blueprint = serde_json::from_value(json!({
        "nodes": ["email", "colleagues", "finish"],
        "edges": [["email", "colleagues"]],
        "node_tools": { "email": ["send_email"] },
        "conditional_edges": {
            "colleagues": {
                "retry_same": "email",
                "next_tool":  "email",
                "next_step":  "finish"
            }
        }
    }))
    .unwrap();

    // Suspend once, then approve with the wildcard prefix rather than
    // the exact key: any arguments for send_email are now allowed.
    let completer = MockCompleter::scripted(vec![
        Completion::structured(json!({ "x": 7 })),
        Completion::structured(json!({ "analysis": "fine" })),
        Completion::structured(json!({ "analysis": "fine too" })),
        Completion::structured(json!({ "final_score": 9.0, "recommendations": "done" })),
    ]);
    let engine = EngineBuilder::new()
        .session(Arc::new(session_with(&["send_email"])))
        .completer(Arc::new(completer))
        .guard_tool("send_email")
        .build()
        .await
        .unwrap();

    let request = RunRequest {
        thread_id: "t-wild".to_string(),
        blueprint,
        task: "email the leads".to_string(),
        resume: None,
    };

    match engine.run(request.clone()).await.unwrap() {
        RunOutcome::Suspended(_) => {}
        other => panic!("expected suspension, got {:?}", other.status()),
    }

    let resumed = RunRequest {
        resume: Some(ResumeDecision::approve([agentrt::wildcard_key("send_email")])),
        ..request
    };
    let state = completed_state(engine.run(resumed).await.unwrap());
    assert_eq!(state.executed_tools, vec!["send_email"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// An exact-argument approval does not cover different arguments
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn approval_is_scoped_to_the_approved_arguments() {
    let blueprint: Blueprint = serde_json::from_value(json!({
        "nodes": ["email", "colleagues", "finish"],
        "edges": [["email", "colleagues"]],
        "node_tools": { "email": ["send_email"] },
        "conditional_edges": {
            "colleagues": {
                "retry_same": "email",
                "next_tool":  "email",
                "next_step":  "finish"
            }
        }
    }))
    .unwrap();

    // First call suspends; after approval the review scores it low, so
    // the retry synthesizes different arguments. Those were never
    // approved and must suspend again.
    let completer = MockCompleter::scripted(vec![
        Completion::structured(json!({ "x": 1 })),
        Completion::structured(json!({ "analysis": "wrong recipient" })),
        Completion::structured(json!({ "analysis": "needs another attempt" })),
        Completion::structured(json!({ "final_score": 3.0, "recommendations": "redo it" })),
        Completion::structured(json!({ "x": 2 })),
    ]);
    let engine = EngineBuilder::new()
        .session(Arc::new(session_with(&["send_email"])))
        .completer(Arc::new(completer))
        .guard_tool("send_email")
        .build()
        .await
        .unwrap();

    let request = RunRequest {
        thread_id: "t-scoped".to_string(),
        blueprint,
        task: "email the leads".to_string(),
        resume: None,
    };

    let first = match engine.run(request.clone()).await.unwrap() {
        RunOutcome::Suspended(suspension) => suspension,
        other => panic!("expected suspension, got {:?}", other.status()),
    };
    assert_eq!(first.pending.tool_args["x"], json!(1));

    let resumed = RunRequest {
        resume: Some(ResumeDecision::approve([first.pending.execution_key.clone()])),
        ..request
    };
    match engine.run(resumed).await.unwrap() {
        RunOutcome::Suspended(second) => {
            assert_eq!(second.pending.tool_args["x"], json!(2));
            assert_ne!(second.pending.execution_key, first.pending.execution_key);
        }
        other => panic!("expected a second suspension, got {:?}", other.status()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool failures flow to the reviewer as step results
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failing_tool_result_reaches_the_reviewer() {
    let mut session = StaticToolSession::new();
    session.register(
        "chart_bar",
        "Always fails",
        json!({ "type": "object", "properties": { "x": { "type": "integer" } }, "required": ["x"] }),
        Box::new(|_| Err("disk full".to_string())),
    );

    let completer = MockCompleter::scripted(vec![
        Completion::structured(json!({ "x": 1 })),
        Completion::structured(json!({ "analysis": "the tool errored" })),
        Completion::structured(json!({ "analysis": "no output was produced" })),
        Completion::structured(json!({ "final_score": 8.0, "recommendations": "give up gracefully" })),
    ]);

    let outcome = run_engine(session, completer, chart_blueprint(), "t-fail").await;
    let state = completed_state(outcome);
    assert_eq!(state.tool_execution_results[0].result, "Error: tool failed: disk full");

    // The reviewer was shown the error text.
    assert!(state.colleagues_analysis.contains("give up gracefully"));
}
