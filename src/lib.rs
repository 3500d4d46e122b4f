pub mod types;
pub mod state;
pub mod blueprint;
pub mod router;
pub mod human;
pub mod synthesizer;
pub mod colleagues;
pub mod engine;
pub mod checkpoint;
pub mod registry;
pub mod prompts;
pub mod stores;
pub mod builder;
pub mod error;
pub mod completer;
pub mod mcp;

// Convenience re-exports at crate root
pub use blueprint::Blueprint;
pub use builder::EngineBuilder;
pub use checkpoint::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
pub use colleagues::{Colleagues, Review};
pub use completer::{
    Completer, Completion, CompletionRequest, MockCompleter, OpenAiCompleter, OutputSchema,
    RetryingCompleter,
};
pub use engine::{compile, Engine};
pub use error::{EngineError, FailureReason, InvokeError};
pub use human::{execution_key, wildcard_key, HilGate};
pub use prompts::{PromptStore, PromptWarehouse};
pub use registry::{McpSession, ProviderSpec, StaticToolSession, ToolDescriptor, ToolSession};
pub use state::RunState;
pub use stores::{ArtifactStore, MemoryArtifactStore, MemorySecretStore, SecretStore};
pub use types::{
    EngineConfig, PendingTool, ResumeAction, ResumeDecision, Route, RunOutcome, RunRequest,
    RunStatus, Suspension, ToolExecutionRecord,
};
