use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::completer::{Completer, OpenAiCompleter, RetryingCompleter};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::prompts::{PromptStore, PromptWarehouse};
use crate::registry::{McpSession, ProviderSpec, ToolSession};
use crate::stores::{ArtifactStore, SecretStore};
use crate::types::EngineConfig;

/// Ergonomic construction of an [`Engine`].
///
/// A completer and a tool source (an explicit session or at least one
/// provider) are required; everything else has sensible defaults: an
/// in-memory checkpoint store, the built-in prompt warehouse and
/// `EngineConfig::from_env()`.
pub struct EngineBuilder {
    providers:   Vec<(ProviderSpec, Option<String>)>,
    session:     Option<Arc<dyn ToolSession>>,
    completer:   Option<Arc<dyn Completer>>,
    retry_count: Option<u32>,
    prompts:     Option<Arc<dyn PromptStore>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    secrets:     Option<Arc<dyn SecretStore>>,
    artifacts:   Option<(Arc<dyn ArtifactStore>, String)>,
    config:      EngineConfig,
    cancel:      CancellationToken,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            providers:   Vec::new(),
            session:     None,
            completer:   None,
            retry_count: None,
            prompts:     None,
            checkpoints: None,
            secrets:     None,
            artifacts:   None,
            config:      EngineConfig::from_env(),
            cancel:      CancellationToken::new(),
        }
    }

    // ── Tool sources ─────────────────────────────────────────────────────

    /// Add a provider subprocess to spawn at session open.
    pub fn provider(mut self, spec: ProviderSpec) -> Self {
        self.providers.push((spec, None));
        self
    }

    /// Add a provider whose credentials are fetched from the secret store
    /// at build time and forwarded opaquely in its handshake.
    pub fn provider_with_secret(mut self, spec: ProviderSpec, secret_name: impl Into<String>) -> Self {
        self.providers.push((spec, Some(secret_name.into())));
        self
    }

    /// Use an already-open tool session instead of spawning providers.
    pub fn session(mut self, session: Arc<dyn ToolSession>) -> Self {
        self.session = Some(session);
        self
    }

    // ── Completer ────────────────────────────────────────────────────────

    /// Set the completer explicitly. The escape hatch for any provider
    /// not covered by the convenience methods.
    pub fn completer(mut self, completer: Arc<dyn Completer>) -> Self {
        self.completer = Some(completer);
        self
    }

    /// Use the standard OpenAI API (key from OPENAI_API_KEY).
    pub fn openai(mut self, model: impl Into<String>) -> Self {
        self.completer = Some(Arc::new(OpenAiCompleter::new(model)));
        self
    }

    /// Use any OpenAI-compatible endpoint (Groq, Ollama, Together, …).
    pub fn openai_compatible(
        mut self,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        self.completer = Some(Arc::new(OpenAiCompleter::with_base_url(api_base, api_key, model)));
        self
    }

    /// Wrap the completer with automatic retry on transient errors.
    /// Auth errors are never retried.
    pub fn retry_on_error(mut self, n: u32) -> Self {
        self.retry_count = Some(n);
        self
    }

    // ── Stores ───────────────────────────────────────────────────────────

    pub fn prompts(mut self, prompts: Arc<dyn PromptStore>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Archive terminal run states to `bucket` in this artifact store.
    pub fn artifacts(mut self, store: Arc<dyn ArtifactStore>, bucket: impl Into<String>) -> Self {
        self.artifacts = Some((store, bucket.into()));
        self
    }

    // ── Configuration ────────────────────────────────────────────────────

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn step_limit(mut self, n: usize) -> Self {
        self.config.step_limit = n;
        self
    }

    /// Mark a tool name as guarded: it will not run without approval.
    pub fn guard_tool(mut self, name: impl Into<String>) -> Self {
        self.config.guard_tool(name);
        self
    }

    /// Cancellation signal carried through the run context.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    // ── Build ────────────────────────────────────────────────────────────

    /// Builds the engine, opening the provider session if one was
    /// requested. Fails with `ProviderUnavailable` when any provider
    /// cannot be reached.
    pub async fn build(self) -> Result<Engine, EngineError> {
        let mut completer = self.completer.ok_or_else(|| {
            EngineError::Build(
                "a completer is required. Use .openai(), .openai_compatible() or .completer()"
                    .to_string(),
            )
        })?;

        if let Some(n) = self.retry_count {
            completer = Arc::new(RetryingCompleter::new(completer, n));
        }

        let session: Arc<dyn ToolSession> = match self.session {
            Some(session) => session,
            None => {
                if self.providers.is_empty() {
                    return Err(EngineError::Build(
                        "a tool session or at least one provider is required".to_string(),
                    ));
                }
                let mut specs = Vec::with_capacity(self.providers.len());
                for (mut spec, secret_name) in self.providers {
                    if let Some(name) = secret_name {
                        let secrets = self.secrets.as_ref().ok_or_else(|| {
                            EngineError::Build(format!(
                                "provider '{}' references secret '{name}' but no secret store is set",
                                spec.name
                            ))
                        })?;
                        let credentials = secrets.get_secret(&name).await.ok_or_else(|| {
                            EngineError::Build(format!("secret '{name}' not found"))
                        })?;
                        spec.credentials = Some(credentials);
                    }
                    specs.push(spec);
                }
                Arc::new(
                    McpSession::open(&specs, self.config.tool_timeout, self.cancel.clone()).await?,
                )
            }
        };

        let prompts = self
            .prompts
            .unwrap_or_else(|| Arc::new(PromptWarehouse::new()));
        let checkpoints = self
            .checkpoints
            .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new()));

        let mut engine = Engine::new(
            session,
            completer,
            prompts,
            checkpoints,
            self.config,
            self.cancel,
        );
        if let Some((store, bucket)) = self.artifacts {
            engine = engine.with_artifacts(store, bucket);
        }
        Ok(engine)
    }
}
