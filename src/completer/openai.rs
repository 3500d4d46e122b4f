use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionNamedToolChoice,
        ChatCompletionRequestMessage,
        ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool,
        ChatCompletionToolChoiceOption,
        ChatCompletionToolType,
        CreateChatCompletionRequestArgs,
        FunctionName,
        FunctionObject,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value;

use super::{Completer, CompleterError, Completion, CompletionRequest, OutputSchema};

/// Completer backed by the OpenAI chat API (or any OpenAI-compatible
/// endpoint via `with_base_url`).
///
/// Structured requests bind exactly one tool (the request's schema) and
/// force the model to call it, so a well-behaved response always carries
/// extractable arguments.
pub struct OpenAiCompleter {
    client: Client<OpenAIConfig>,
    model:  String,
}

impl OpenAiCompleter {
    /// Standard OpenAI client using the OPENAI_API_KEY env var.
    pub fn new(model: impl Into<String>) -> Self {
        Self { client: Client::new(), model: model.into() }
    }

    /// Custom base URL — for Groq, Together, Ollama, Fireworks, etc.
    pub fn with_base_url(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(api_base)
            .with_api_key(api_key);
        Self { client: Client::with_config(config), model: model.into() }
    }

    fn build_tool(schema: &OutputSchema) -> ChatCompletionTool {
        ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function: FunctionObject {
                name:        schema.name.clone(),
                description: Some(schema.description.clone()),
                parameters:  Some(schema.parameters.clone()),
            },
        }
    }

    /// Extracts tool-call arguments, enforcing the schema's `required`
    /// set. Violations yield None rather than a partial object.
    fn extract_structured(schema: &OutputSchema, arguments: &str) -> Option<Value> {
        let value: Value = serde_json::from_str(arguments).ok()?;
        let object = value.as_object()?;
        for field in schema.required_fields() {
            if !object.contains_key(field) {
                tracing::warn!(field, tool = %schema.name, "structured output missing required field");
                return None;
            }
        }
        Some(value)
    }
}

#[async_trait]
impl Completer for OpenAiCompleter {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompleterError> {
        let message: ChatCompletionRequestMessage = ChatCompletionRequestUserMessageArgs::default()
            .content(request.prompt.clone())
            .build()
            .map_err(|e| CompleterError::Api(format!("failed to build message: {e}")))?
            .into();

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(vec![message]);

        if let Some(temperature) = request.temperature {
            builder.temperature(temperature);
        }

        if let Some(schema) = &request.schema {
            builder.tools(vec![Self::build_tool(schema)]);
            builder.tool_choice(ChatCompletionToolChoiceOption::Named(
                ChatCompletionNamedToolChoice {
                    r#type:   ChatCompletionToolType::Function,
                    function: FunctionName { name: schema.name.clone() },
                },
            ));
        }

        let api_request = builder
            .build()
            .map_err(|e| CompleterError::Api(format!("failed to build request: {e}")))?;

        let response = self
            .client
            .chat()
            .create(api_request)
            .await
            .map_err(|e| CompleterError::Api(format!("OpenAI API error: {e}")))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CompleterError::Api("empty response from OpenAI".to_string()))?;

        let content = choice.message.content.unwrap_or_default();

        let structured = match (&request.schema, choice.message.tool_calls) {
            (Some(schema), Some(tool_calls)) => tool_calls
                .first()
                .and_then(|tc| Self::extract_structured(schema, &tc.function.arguments)),
            _ => None,
        };

        Ok(Completion { content, structured })
    }
}
