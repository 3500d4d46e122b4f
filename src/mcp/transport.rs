use tokio::process::{Child, Command};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use std::process::Stdio;
use anyhow::{Result, Context};
use crate::mcp::types::{ProviderRequest, ProviderResponse};

pub struct StdioTransport {
    pub child:  Child,
    pub writer: BufWriter<tokio::process::ChildStdin>,
    pub reader: BufReader<tokio::process::ChildStdout>,
}

impl StdioTransport {
    /// Spawns the provider subprocess with piped stdio. The child is
    /// killed when its handle drops, so the process cannot outlive the
    /// session even if the owner panics.
    pub fn spawn(command: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn provider process")?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow::anyhow!("failed to open stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("failed to open stdout"))?;

        Ok(Self {
            child,
            writer: BufWriter::new(stdin),
            reader: BufReader::new(stdout),
        })
    }
}

pub async fn send_request(
    writer: &mut BufWriter<tokio::process::ChildStdin>,
    request: &ProviderRequest,
) -> Result<()> {
    let json = serde_json::to_string(request)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_response(
    reader: &mut BufReader<tokio::process::ChildStdout>,
) -> Result<ProviderResponse> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(anyhow::anyhow!("connection closed"));
    }
    serde_json::from_str(&line).context("unparseable provider response line")
}
