//! # Chart → Report Blueprint
//!
//! Drives a two-stage blueprint end to end: a chart tool, the colleagues
//! review gate, then a PDF report tool, finishing once the reviewers are
//! satisfied.
//!
//! # Usage
//! ```bash
//! OPENAI_API_KEY=sk-... cargo run --example chart_report
//! RUST_LOG=info OPENAI_API_KEY=sk-... cargo run --example chart_report
//! ```

use std::sync::Arc;

use serde_json::json;

use agentrt::{Blueprint, EngineBuilder, RunOutcome, RunRequest, StaticToolSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging — set RUST_LOG=debug|info|warn
    tracing_subscriber::fmt::init();

    let mut session = StaticToolSession::new();
    session.register(
        "chart_generate_bar_chart",
        "Render a bar chart from rows of category/value data",
        json!({
            "type": "object",
            "properties": {
                "data":  { "type": "array", "description": "Rows of {category, value} objects" },
                "title": { "type": "string" }
            },
            "required": ["data"]
        }),
        Box::new(|args| {
            let rows = args.get("data").and_then(|v| v.as_array()).map_or(0, Vec::len);
            // In production, render an actual image here.
            Ok(format!("bar chart with {rows} rows written to charts/output.png"))
        }),
    );
    session.register(
        "pdf_generate_report",
        "Assemble a PDF report; chart placeholders like {bar_chart} are resolved",
        json!({
            "type": "object",
            "properties": {
                "report_content": { "type": "string" },
                "title":          { "type": "string" }
            },
            "required": ["report_content"]
        }),
        Box::new(|args| {
            let len = args.get("report_content").and_then(|v| v.as_str()).map_or(0, str::len);
            Ok(format!("report ({len} chars) written to reports/output.pdf"))
        }),
    );

    let blueprint: Blueprint = serde_json::from_value(json!({
        "nodes": ["Charts", "colleagues", "PDF", "finish"],
        "edges": [["Charts", "colleagues"], ["PDF", "finish"]],
        "node_tools": {
            "Charts": ["chart_generate_bar_chart"],
            "PDF":    ["pdf_generate_report"]
        },
        "conditional_edges": {
            "colleagues": {
                "retry_same": "Charts",
                "next_tool":  "Charts",
                "next_step":  "PDF"
            }
        }
    }))?;

    let engine = EngineBuilder::new()
        .session(Arc::new(session))
        // Works with any OpenAI-compatible endpoint via .openai_compatible(...)
        .openai("gpt-4o")
        .retry_on_error(2)
        .build()
        .await?;

    let request = RunRequest::new(
        blueprint,
        "Chart quarterly sales with sample data, then assemble a short PDF report \
         that embeds the chart via a {bar_chart} placeholder.",
    );

    match engine.run(request).await? {
        RunOutcome::Completed(state) => {
            println!("run completed");
            println!("executed tools: {:?}", state.executed_tools);
            println!("final review score: {:.1}", state.colleagues_score);
            for record in &state.tool_execution_results {
                println!("  {} -> {}", record.tool, record.result);
            }
        }
        RunOutcome::Failed { state, reason } => {
            eprintln!("run failed: {reason}");
            eprintln!("last recommendations: {}", state.colleagues_analysis);
            std::process::exit(1);
        }
        RunOutcome::Suspended(suspension) => {
            // No guarded tools in this demo, so this is unreachable; a real
            // caller would collect a decision and re-enter via RunRequest::resume.
            println!("awaiting approval for {}", suspension.pending.tool_name);
        }
    }

    Ok(())
}
