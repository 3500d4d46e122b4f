//! Suspension survives process boundaries: a run suspended by one engine
//! resumes from a SQLite checkpoint in a fresh engine, and resuming twice
//! with the same keys is equivalent to resuming once.

use std::sync::Arc;

use serde_json::json;

use agentrt::{
    Blueprint, CheckpointStore, Completion, EngineBuilder, MockCompleter, ResumeDecision,
    RunOutcome, RunRequest, RunStatus, SqliteCheckpointStore, StaticToolSession,
};

fn email_blueprint() -> Blueprint {
    serde_json::from_value(json!({
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
    .unwrap()
}

fn email_session() -> StaticToolSession {
    let mut session = StaticToolSession::new();
    session.register(
        "send_email",
        "Send an external email",
        json!({
            "type": "object",
            "properties": { "to": { "type": "string" } },
            "required": ["to"]
        }),
        Box::new(|args| {
            let to = args.get("to").and_then(|v| v.as_str()).unwrap_or("nobody");
            Ok(format!("sent to {to}"))
        }),
    );
    session
}

fn review_script() -> Vec<Completion> {
    vec![
        Completion::structured(json!({ "analysis": "delivery confirmed" })),
        Completion::structured(json!({ "analysis": "matches the request" })),
        Completion::structured(json!({ "final_score": 9.0, "recommendations": "all done" })),
    ]
}

async fn engine_with(
    checkpoints: Arc<SqliteCheckpointStore>,
    responses: Vec<Completion>,
) -> agentrt::Engine {
    EngineBuilder::new()
        .session(Arc::new(email_session()))
        .completer(Arc::new(MockCompleter::scripted(responses)))
        .checkpoints(checkpoints)
        .guard_tool("send_email")
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn suspended_run_resumes_from_sqlite_in_a_new_engine() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("checkpoints.db");

    let request = RunRequest {
        thread_id: "persist-1".to_string(),
        blueprint: email_blueprint(),
        task: "email amir about the leads".to_string(),
        resume: None,
    };

    // Engine #1 synthesizes arguments and suspends at the gate.
    let suspension = {
        let checkpoints = Arc::new(SqliteCheckpointStore::new(&db_path).unwrap());
        let engine = engine_with(
            checkpoints,
            vec![Completion::structured(json!({ "to": "amir@example.com" }))],
        )
        .await;
        match engine.run(request.clone()).await.unwrap() {
            RunOutcome::Suspended(suspension) => suspension,
            other => panic!("expected suspension, got {:?}", other.status()),
        }
    };

    // Engine #2 (a different process in spirit) loads the checkpoint
    // and completes after approval.
    let checkpoints = Arc::new(SqliteCheckpointStore::new(&db_path).unwrap());
    let stored = checkpoints.load("persist-1").await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Suspended);
    assert_eq!(
        stored.pending_tool.as_ref().unwrap().tool_args["to"],
        json!("amir@example.com")
    );

    let engine = engine_with(checkpoints, review_script()).await;
    let resumed = RunRequest {
        resume: Some(ResumeDecision::approve([suspension.pending.execution_key])),
        ..request
    };
    match engine.run(resumed).await.unwrap() {
        RunOutcome::Completed(state) => {
            assert_eq!(state.executed_tools, vec!["send_email"]);
            assert_eq!(state.tool_execution_results[0].result, "sent to amir@example.com");
        }
        other => panic!("expected completion, got {:?}", other.status()),
    }
}

#[tokio::test]
async fn resuming_twice_with_the_same_keys_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("checkpoints.db");
    let checkpoints = Arc::new(SqliteCheckpointStore::new(&db_path).unwrap());

    let request = RunRequest {
        thread_id: "persist-2".to_string(),
        blueprint: email_blueprint(),
        task: "email amir".to_string(),
        resume: None,
    };

    // Suspend once; both resumes replay from the same checkpoint, so the
    // mock scripts two identical review rounds.
    let mut responses = vec![Completion::structured(json!({ "to": "amir@example.com" }))];
    responses.extend(review_script());
    responses.extend(review_script());
    let engine = engine_with(checkpoints, responses).await;

    let suspension = match engine.run(request.clone()).await.unwrap() {
        RunOutcome::Suspended(suspension) => suspension,
        other => panic!("expected suspension, got {:?}", other.status()),
    };

    let resume_request = RunRequest {
        resume: Some(ResumeDecision::approve([suspension.pending.execution_key])),
        ..request
    };

    let first = match engine.run(resume_request.clone()).await.unwrap() {
        RunOutcome::Completed(state) => state,
        other => panic!("expected completion, got {:?}", other.status()),
    };
    let second = match engine.run(resume_request).await.unwrap() {
        RunOutcome::Completed(state) => state,
        other => panic!("expected completion, got {:?}", other.status()),
    };

    assert_eq!(first.executed_tools, second.executed_tools);
    assert_eq!(first.approved_tools, second.approved_tools);
    assert_eq!(
        first.tool_execution_results[0].result,
        second.tool_execution_results[0].result
    );
}
