use std::sync::Arc;

use async_trait::async_trait;

use super::{Completer, CompleterError, Completion, CompletionRequest};

/// A wrapper around any `Completer` that retries transient failures with
/// exponential back-off.
///
/// - Retries up to `max_retries` times (1s, 2s, 4s, … cap 60s; rate
///   limits start at 5s)
/// - Auth errors are never retried
/// - Timeouts pass through: the caller's deadline already elapsed
pub struct RetryingCompleter {
    inner:       Arc<dyn Completer>,
    max_retries: u32,
}

impl RetryingCompleter {
    pub fn new(inner: Arc<dyn Completer>, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }

    fn is_auth_error(err: &str) -> bool {
        let lower = err.to_lowercase();
        lower.contains("401")
            || lower.contains("403")
            || lower.contains("authentication")
            || lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("invalid api key")
    }

    fn is_rate_limit_error(err: &str) -> bool {
        let lower = err.to_lowercase();
        lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("quota")
    }
}

#[async_trait]
impl Completer for RetryingCompleter {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompleterError> {
        let mut last_err = CompleterError::Api("no attempts made".to_string());

        for attempt in 0..=self.max_retries {
            match self.inner.complete(request.clone()).await {
                Ok(completion) => return Ok(completion),
                Err(err @ CompleterError::TimedOut(_)) => return Err(err),
                Err(CompleterError::Api(msg)) if Self::is_auth_error(&msg) => {
                    tracing::error!(error = %msg, "completer auth error — not retrying");
                    return Err(CompleterError::Api(msg));
                }
                Err(CompleterError::Api(msg)) => {
                    if attempt < self.max_retries {
                        let base_wait = if Self::is_rate_limit_error(&msg) { 5 } else { 1 };
                        let wait_secs = std::cmp::min(base_wait << attempt, 60);
                        tracing::warn!(
                            attempt = attempt + 1,
                            max     = self.max_retries,
                            wait_s  = wait_secs,
                            error   = %msg,
                            "completer transient error — retrying"
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(wait_secs)).await;
                    }
                    last_err = CompleterError::Api(msg);
                }
            }
        }

        match last_err {
            CompleterError::Api(msg) => Err(CompleterError::Api(format!(
                "completer failed after {} retries — last error: {msg}",
                self.max_retries
            ))),
            other => Err(other),
        }
    }
}
