use std::collections::HashMap;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::io::BufWriter;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::InvokeError;
use crate::mcp::transport::{read_response, send_request, StdioTransport};
use crate::mcp::types::*;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// One provider subprocess: serialized writes, a background reader that
/// multiplexes response lines to pending callers by request id.
pub struct ProviderClient {
    name:    String,
    writer:  Mutex<BufWriter<tokio::process::ChildStdin>>,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<ProviderResponse>>>>,
    child:   Mutex<Option<tokio::process::Child>>,
}

impl ProviderClient {
    /// Spawns the provider, starts the reader loop and completes the
    /// initialize handshake. Credentials are passed through opaquely.
    pub async fn connect(
        name: &str,
        command: &str,
        args: &[String],
        credentials: Option<HashMap<String, String>>,
    ) -> Result<Arc<Self>> {
        let StdioTransport { child, writer, mut reader } = StdioTransport::spawn(command, args)?;

        let client = Arc::new(Self {
            name:    name.to_string(),
            writer:  Mutex::new(writer),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            child:   Mutex::new(Some(child)),
        });

        let pending = Arc::clone(&client.pending);
        let provider = client.name.clone();
        tokio::spawn(async move {
            loop {
                match read_response(&mut reader).await {
                    Ok(response) => {
                        let mut pending_guard = pending.lock().await;
                        if let Some(tx) = pending_guard.remove(&response.id) {
                            let _ = tx.send(response);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(provider = %provider, error = %e, "provider stream ended");
                        // Dropping the senders tells every pending caller
                        // the provider is gone.
                        pending.lock().await.clear();
                        break;
                    }
                }
            }
        });

        let handshake = client.request(RequestBody::Initialize {
            client:      ClientInfo::default(),
            credentials,
        });
        let response = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
            .await
            .context("initialize handshake timed out")??;
        if let Some(err) = response.error {
            return Err(anyhow::anyhow!("initialize failed: {err}"));
        }

        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request(&self, body: RequestBody) -> Result<ProviderResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = ProviderRequest { id, body };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        {
            let mut writer = self.writer.lock().await;
            send_request(&mut writer, &request).await?;
        }

        rx.await.context("provider response channel closed")
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        let response = self.request(RequestBody::ListTools).await?;
        if let Some(err) = response.error {
            return Err(anyhow::anyhow!("list_tools failed: {err}"));
        }
        let result: ListToolsResult =
            serde_json::from_value(response.result.unwrap_or_default())
                .context("unparseable list_tools result")?;
        Ok(result.tools)
    }

    /// Calls one tool under a deadline, racing the cancellation token.
    /// Cancellation and expiry both send a best-effort `cancel` line so
    /// the provider can abort server-side work.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        args: Map<String, Value>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, InvokeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = ProviderRequest {
            id,
            body: RequestBody::CallTool { name: tool_name.to_string(), args },
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = send_request(&mut writer, &request).await {
                self.pending.lock().await.remove(&id);
                return Err(InvokeError::ProviderCrashed(format!(
                    "{}: write failed: {e}", self.name
                )));
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                self.abort_request(id).await;
                Err(InvokeError::Cancelled)
            }
            outcome = tokio::time::timeout(deadline, rx) => match outcome {
                Err(_) => {
                    self.abort_request(id).await;
                    Err(InvokeError::TimedOut(deadline))
                }
                Ok(Err(_)) => Err(InvokeError::ProviderCrashed(format!(
                    "{}: died during call to '{tool_name}'", self.name
                ))),
                Ok(Ok(response)) => match response.error {
                    Some(err) => Err(InvokeError::ToolFailed(err)),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                },
            },
        }
    }

    async fn abort_request(&self, request_id: u64) {
        self.pending.lock().await.remove(&request_id);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel_line = ProviderRequest { id, body: RequestBody::Cancel { request_id } };
        let mut writer = self.writer.lock().await;
        let _ = send_request(&mut writer, &cancel_line).await;
    }

    /// Kills the subprocess. Idempotent; also implied by kill-on-drop.
    pub async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }
}
