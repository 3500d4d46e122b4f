use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::completer::{complete_with_timeout, Completer, CompletionRequest, OutputSchema};
use crate::registry::ToolDescriptor;

/// Produces arguments for a tool call from the task, recent results and
/// the tool's own schema.
///
/// Never fails: if the Completer errors, times out or returns nothing
/// structured, the synthesizer yields an empty mapping and the engine
/// records the skip. Retrying is the review loop's decision, not ours.
pub struct ArgSynthesizer {
    completer: Arc<dyn Completer>,
    timeout:   Duration,
}

impl ArgSynthesizer {
    pub fn new(completer: Arc<dyn Completer>, timeout: Duration) -> Self {
        Self { completer, timeout }
    }

    pub async fn synthesize(
        &self,
        tool: &ToolDescriptor,
        task: &str,
        context: &str,
    ) -> Map<String, Value> {
        let prompt = build_prompt(tool, task, context);
        let schema = OutputSchema::new(
            tool.name.clone(),
            tool.description.clone(),
            tool.input_schema.clone(),
        );

        let request = CompletionRequest::structured(prompt, schema);
        let completion = match complete_with_timeout(self.completer.as_ref(), request, self.timeout).await
        {
            Ok(completion) => completion,
            Err(e) => {
                tracing::warn!(tool = %tool.name, error = %e, "argument synthesis failed");
                return Map::new();
            }
        };

        let args = match completion.structured {
            Some(Value::Object(map)) => map,
            _ => {
                tracing::debug!(tool = %tool.name, "completer produced no structured arguments");
                return Map::new();
            }
        };

        filter_to_schema(args, &tool.input_schema)
    }
}

/// Keeps only keys the schema declares, so synthesized arguments are
/// always a subset of the tool's contract.
fn filter_to_schema(args: Map<String, Value>, input_schema: &Value) -> Map<String, Value> {
    match input_schema.get("properties").and_then(Value::as_object) {
        Some(properties) => args
            .into_iter()
            .filter(|(key, _)| properties.contains_key(key))
            .collect(),
        None => args,
    }
}

fn build_prompt(tool: &ToolDescriptor, task: &str, context: &str) -> String {
    // Chart and pdf tools routinely come back without their structural
    // fields unless prompted for them explicitly. Advisory text only;
    // the schema itself is unchanged.
    if tool.name.starts_with("chart_") {
        format!(
            "You need to generate a chart. Use the {name} tool for: {task}{context}\n\n\
             Chart tools require a 'data' parameter holding a list of row objects, \
             for example [{{\"category\": \"Q1\", \"sales\": 120000}}, \
             {{\"category\": \"Q2\", \"sales\": 150000}}]. Generate realistic data and \
             call the {name} tool with 'data', 'title' and appropriate labels.",
            name = tool.name,
        )
    } else if tool.name.starts_with("pdf_") {
        format!(
            "You need to generate a PDF report. Use the {name} tool for: {task}{context}\n\n\
             PDF tools require a 'report_content' parameter with the report text. To \
             embed charts, reference them with placeholders like {{bar_chart}}, using plain \
             braces rather than markdown image syntax. Call the {name} tool with \
             'report_content', 'title' and placeholders in {{}} form.",
            name = tool.name,
        )
    } else {
        format!(
            "Use the {name} tool for: {task}{context}\n\
             Call the {name} tool with appropriate arguments. Tool description: {description}",
            name = tool.name,
            description = tool.description,
        )
    }
}
