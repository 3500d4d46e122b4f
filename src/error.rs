use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that prevent the engine from making any forward progress.
///
/// Everything else (a failing tool, a timeout, a missing tool, a denied
/// approval) is absorbed into the step's result record so the review loop
/// stays the sole authority on retries.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("blueprint invalid: {0}")]
    BlueprintInvalid(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("provider crashed: {0}")]
    ProviderCrashed(String),

    #[error("checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("no checkpoint found for thread '{0}'")]
    ThreadNotFound(String),

    #[error("build error: {0}")]
    Build(String),
}

/// Error taxonomy for a single tool invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("tool '{0}' not found in session")]
    ToolUnavailable(String),

    #[error("tool failed: {0}")]
    ToolFailed(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("provider crashed: {0}")]
    ProviderCrashed(String),

    #[error("cancelled")]
    Cancelled,
}

/// Why a run ended with `RunStatus::Failed`. Stored in the final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    StepLimitExceeded,
    Cancelled,
    PermissionDenied,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::StepLimitExceeded => write!(f, "StepLimitExceeded"),
            Self::Cancelled         => write!(f, "Cancelled"),
            Self::PermissionDenied  => write!(f, "PermissionDenied"),
        }
    }
}
