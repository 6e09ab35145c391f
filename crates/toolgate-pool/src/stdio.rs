use std::process::Stdio;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::transport::{
    build_notification, build_request, initialize_params, parse_tools, unwrap_response,
    DownstreamConfig, RawTool, Transport,
};

/// Subprocess transport: spawns the configured command and speaks
/// newline-delimited JSON-RPC over its stdio.
pub struct StdioTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
    server: String,
}

impl StdioTransport {
    pub fn spawn(config: &DownstreamConfig) -> Result<Self> {
        let command = config.command.as_ref().ok_or_else(|| {
            Error::Transport(format!("no command specified for stdio server: {}", config.name))
        })?;

        let mut child = Command::new(command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transport(format!("failed to spawn {}: {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("child stdout unavailable".to_string()))?;

        debug!(server = %config.name, command = %command, "stdio server spawned");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 0,
            server: config.name.clone(),
        })
    }

    async fn send(&mut self, payload: &Value) -> Result<()> {
        let mut line = payload.to_string();
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Transport(format!("write to {} failed: {}", self.server, e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("flush to {} failed: {}", self.server, e)))?;
        Ok(())
    }

    /// Send a request and read frames until its response arrives. Server
    /// notifications and requests interleaved on the stream are skipped;
    /// exclusive ownership by the owner task means responses cannot belong
    /// to anyone else.
    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        self.send(&build_request(id, method, params)).await?;

        loop {
            let mut line = String::new();
            let read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Transport(format!("read from {} failed: {}", self.server, e)))?;
            if read == 0 {
                return Err(Error::Transport(format!(
                    "downstream {} closed its stdout",
                    self.server
                )));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let frame: Value = match serde_json::from_str(trimmed) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(server = %self.server, error = %e, "skipping unparseable frame");
                    continue;
                }
            };

            match frame.get("id").and_then(|v| v.as_u64()) {
                Some(frame_id) if frame_id == id => return unwrap_response(frame),
                _ => continue,
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn initialize(&mut self) -> Result<()> {
        self.request("initialize", initialize_params()).await?;
        self.send(&build_notification("notifications/initialized")).await?;
        Ok(())
    }

    async fn list_tools(&mut self) -> Result<Vec<RawTool>> {
        let result = self.request("tools/list", Value::Object(Default::default())).await?;
        parse_tools(result)
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value> {
        self.request(
            "tools/call",
            serde_json::json!({"name": name, "arguments": arguments}),
        )
        .await
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(server = %self.server, error = %e, "failed to kill stdio child");
        }
    }
}
