use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

mod openai;
mod mock;
mod retry;

pub use openai::OpenAiCompleter;
pub use mock::MockCompleter;
pub use retry::RetryingCompleter;

/// The single interface between the runtime and any language model.
///
/// # Contract
/// - Must be Send + Sync (used behind Arc<dyn Completer>)
/// - With a schema attached, the call runs in tool-call mode bound to
///   exactly that schema; the extracted arguments come back in
///   `Completion::structured`
/// - Implementations MUST honor the schema's `required` set: if any
///   required field is absent from the model's arguments, return
///   `structured = None` rather than a partial object
/// - Returns Err only for transport-level failures (network, auth,
///   unparseable response); an unhelpful but well-formed completion is
///   Ok
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompleterError>;
}

/// One structured-output request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt:      String,
    /// Present for tool-call mode; absent for free text.
    pub schema:      Option<OutputSchema>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), schema: None, temperature: None }
    }

    pub fn structured(prompt: impl Into<String>, schema: OutputSchema) -> Self {
        Self { prompt: prompt.into(), schema: Some(schema), temperature: None }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// The schema a structured call is bound to: one tool definition in the
/// provider's tool-call surface.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name:        String,
    pub description: String,
    /// JSON Schema object with `properties` and `required`.
    pub parameters:  Value,
}

impl OutputSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self { name: name.into(), description: description.into(), parameters }
    }

    /// Field names listed in the schema's `required` array.
    pub fn required_fields(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// What a Completer call produced.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content:    String,
    /// Arguments extracted from the model's tool call; None when the
    /// model produced none or violated the schema's `required` set.
    pub structured: Option<Value>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), structured: None }
    }

    pub fn structured(value: Value) -> Self {
        Self { content: String::new(), structured: Some(value) }
    }
}

#[derive(Debug, Error)]
pub enum CompleterError {
    #[error("completer API error: {0}")]
    Api(String),

    #[error("completer timed out after {0:?}")]
    TimedOut(Duration),
}

/// Runs a completion under a deadline, folding expiry into the error
/// taxonomy. The engine applies this at every Completer call site.
pub async fn complete_with_timeout(
    completer: &dyn Completer,
    request: CompletionRequest,
    deadline: Duration,
) -> Result<Completion, CompleterError> {
    match tokio::time::timeout(deadline, completer.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(CompleterError::TimedOut(deadline)),
    }
}
