use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A provider request. Serialized as one line of JSON:
/// `{"id": 3, "type": "call_tool", "name": "...", "args": {...}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub id: u64,
    #[serde(flatten)]
    pub body: RequestBody,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBody {
    /// Handshake. Carries client identity and, optionally, the opaque
    /// credentials the provider needs to reach its backing service.
    Initialize {
        client: ClientInfo,
        #[serde(skip_serializing_if = "Option::is_none")]
        credentials: Option<HashMap<String, String>>,
    },
    ListTools,
    CallTool {
        name: String,
        args: Map<String, Value>,
    },
    /// Best-effort abort of an in-flight request. No response expected.
    Cancel { request_id: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name:    String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name:    env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A provider response line: `{"id": 3, "result": ...}` or
/// `{"id": 3, "error": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub id:     u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error:  Option<String>,
}

/// One tool as advertised by a provider's `list_tools` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema with typed `properties` and a `required` set.
    #[serde(default = "empty_object")]
    pub input_schema: Value,
}

fn empty_object() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolSpec>,
}
