use std::sync::Mutex;

use async_trait::async_trait;

use super::{Completer, CompleterError, Completion, CompletionRequest};

/// A scripted completer for tests — no network calls are made.
///
/// Responses are consumed in FIFO order. Parallel callers each pop one
/// entry; analysis fan-outs therefore consume as many entries as there
/// are analyses, in nondeterministic order.
pub struct MockCompleter {
    responses: Mutex<Vec<Result<Completion, CompleterError>>>,
    call_log:  Mutex<Vec<String>>, // prompts, in call order
}

impl MockCompleter {
    pub fn new(responses: Vec<Result<Completion, CompleterError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_log:  Mutex::new(Vec::new()),
        }
    }

    /// Convenience: all responses succeed.
    pub fn scripted(responses: Vec<Completion>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    /// Returns the number of times complete() was invoked.
    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    /// Returns the prompt passed to the Nth call (0-indexed).
    pub fn prompt_for_call(&self, n: usize) -> Option<String> {
        self.call_log.lock().unwrap().get(n).cloned()
    }
}

#[async_trait]
impl Completer for MockCompleter {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompleterError> {
        self.call_log.lock().unwrap().push(request.prompt);

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(CompleterError::Api(
                "MockCompleter: no more programmed responses".to_string(),
            ));
        }
        responses.remove(0)
    }
}
