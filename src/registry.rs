use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, InvokeError};
use crate::mcp::ProviderClient;

/// One tool provider to spawn at session open.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub name:        String,
    pub command:     String,
    pub args:        Vec<String>,
    /// Opaque credentials forwarded in the initialize handshake.
    pub credentials: Option<HashMap<String, String>>,
}

impl ProviderSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name:        name.into(),
            command:     command.into(),
            args,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: HashMap<String, String>) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// A callable tool: name, human description and the JSON Schema of its
/// arguments (typed `properties` with a `required` set).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name:         String,
    pub description:  String,
    pub input_schema: Value,
}

/// The scoped resource that owns tool connectivity for one run.
///
/// # Contract
/// - `list`/`get` are snapshots of the tools discovered at open
/// - `invoke` maps every failure into the `InvokeError` taxonomy and
///   never panics
/// - `close` releases underlying resources; it must be safe to call on
///   every exit path
#[async_trait]
pub trait ToolSession: Send + Sync {
    fn list(&self) -> Vec<ToolDescriptor>;
    fn get(&self, name: &str) -> Option<ToolDescriptor>;
    async fn invoke(&self, name: &str, args: &Map<String, Value>) -> Result<String, InvokeError>;
    async fn close(&self);
}

struct ProviderTool {
    descriptor: ToolDescriptor,
    client:     Arc<ProviderClient>,
}

/// A session over one or more subprocess providers.
///
/// Open is all-or-nothing: if any requested provider cannot be reached,
/// already-spawned providers are shut down and the open fails. Tool names
/// are globally unique across providers (providers prefix their names); a
/// collision is an open failure, not a silent shadow.
pub struct McpSession {
    clients:      Vec<Arc<ProviderClient>>,
    tools:        HashMap<String, ProviderTool>,
    tool_timeout: Duration,
    cancel:       CancellationToken,
}

impl McpSession {
    pub async fn open(
        providers: &[ProviderSpec],
        tool_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, EngineError> {
        let mut clients = Vec::new();
        let mut tools: HashMap<String, ProviderTool> = HashMap::new();

        for spec in providers {
            let connected = ProviderClient::connect(
                &spec.name,
                &spec.command,
                &spec.args,
                spec.credentials.clone(),
            )
            .await;

            let client = match connected {
                Ok(client) => client,
                Err(e) => {
                    Self::shutdown_all(&clients).await;
                    return Err(EngineError::ProviderUnavailable(format!("{}: {e}", spec.name)));
                }
            };

            let listed = match client.list_tools().await {
                Ok(listed) => listed,
                Err(e) => {
                    Self::shutdown_all(&clients).await;
                    client.shutdown().await;
                    return Err(EngineError::ProviderUnavailable(format!("{}: {e}", spec.name)));
                }
            };

            for tool in listed {
                let descriptor = ToolDescriptor {
                    name:         tool.name.clone(),
                    description:  tool.description,
                    input_schema: tool.input_schema,
                };
                let entry = ProviderTool { descriptor, client: Arc::clone(&client) };
                if tools.insert(tool.name.clone(), entry).is_some() {
                    Self::shutdown_all(&clients).await;
                    client.shutdown().await;
                    return Err(EngineError::ProviderUnavailable(format!(
                        "tool name '{}' is exported by more than one provider",
                        tool.name
                    )));
                }
            }

            tracing::info!(provider = %spec.name, tools = tools.len(), "provider connected");
            clients.push(client);
        }

        Ok(Self { clients, tools, tool_timeout, cancel })
    }

    async fn shutdown_all(clients: &[Arc<ProviderClient>]) {
        for client in clients {
            client.shutdown().await;
        }
    }

    /// Providers return arbitrary JSON; tool output travels through the
    /// engine as text. Strings pass through, structures pretty-print.
    fn render_result(value: Value) -> String {
        match value {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

#[async_trait]
impl ToolSession for McpSession {
    fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor.clone()).collect()
    }

    fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.get(name).map(|t| t.descriptor.clone())
    }

    async fn invoke(&self, name: &str, args: &Map<String, Value>) -> Result<String, InvokeError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| InvokeError::ToolUnavailable(name.to_string()))?;

        let value = entry
            .client
            .call_tool(name, args.clone(), self.tool_timeout, &self.cancel)
            .await?;
        Ok(Self::render_result(value))
    }

    async fn close(&self) {
        Self::shutdown_all(&self.clients).await;
    }
}

/// A tool function: takes JSON args, returns a result string or an error
/// string. Heap-allocated, Send + Sync for thread safety.
pub type ToolFn = Box<dyn Fn(&Map<String, Value>) -> Result<String, String> + Send + Sync>;

struct StaticTool {
    descriptor: ToolDescriptor,
    func:       ToolFn,
}

/// An in-process session: tools registered as closures with explicit
/// schemas. Used for embedded tools and for driving the engine in tests
/// without subprocesses.
#[derive(Default)]
pub struct StaticToolSession {
    tools: HashMap<String, StaticTool>,
}

impl StaticToolSession {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Register a tool with its schema and implementation.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        func: ToolFn,
    ) {
        let name = name.into();
        self.tools.insert(name.clone(), StaticTool {
            descriptor: ToolDescriptor {
                name,
                description: description.into(),
                input_schema,
            },
            func,
        });
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolSession for StaticToolSession {
    fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor.clone()).collect()
    }

    fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.get(name).map(|t| t.descriptor.clone())
    }

    async fn invoke(&self, name: &str, args: &Map<String, Value>) -> Result<String, InvokeError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| InvokeError::ToolUnavailable(name.to_string()))?;
        (entry.func)(args).map_err(InvokeError::ToolFailed)
    }

    async fn close(&self) {}
}
