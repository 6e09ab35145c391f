use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use toolgate_types::TransportKind;

use crate::error::{Error, Result};
use crate::http::StreamableHttpTransport;
use crate::sse::SseTransport;
use crate::stdio::StdioTransport;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Configuration for one downstream server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownstreamConfig {
    /// Unique server id; becomes the prefix of every tool it exposes
    pub name: String,
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    /// Command to spawn, stdio transport only
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint URL, SSE and streamable-http transports only
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
}

fn default_transport() -> TransportKind {
    TransportKind::Stdio
}

/// Tool as listed by a downstream server, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// One downstream protocol session.
///
/// A transport is owned exclusively by its server's owner task; nothing
/// else touches it, so implementations are free to keep per-request state
/// without locking.
#[async_trait]
pub trait Transport: Send {
    /// Perform the protocol initialize handshake.
    async fn initialize(&mut self) -> Result<()>;

    async fn list_tools(&mut self) -> Result<Vec<RawTool>>;

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value>;

    /// Tear the session down. Must be infallible; errors are logged.
    async fn close(&mut self);
}

/// Opens transports for the pool; injectable so tests can substitute mock
/// downstream servers.
pub type TransportFactory =
    Arc<dyn Fn(DownstreamConfig) -> BoxFuture<'static, Result<Box<dyn Transport>>> + Send + Sync>;

pub fn default_transport_factory() -> TransportFactory {
    Arc::new(|config: DownstreamConfig| {
        Box::pin(async move {
            let transport: Box<dyn Transport> = match config.transport {
                TransportKind::Stdio => Box::new(StdioTransport::spawn(&config)?),
                TransportKind::Sse => Box::new(SseTransport::connect(&config).await?),
                TransportKind::StreamableHttp => Box::new(StreamableHttpTransport::new(&config)?),
            };
            Ok(transport)
        })
    })
}

// JSON-RPC plumbing shared by the concrete transports.

pub(crate) fn build_request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

pub(crate) fn build_notification(method: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
    })
}

pub(crate) fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "toolgate",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Extract the result from a JSON-RPC response envelope, mapping error
/// objects to `Error::Downstream`.
pub(crate) fn unwrap_response(response: Value) -> Result<Value> {
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Err(Error::Downstream(message.to_string()));
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| Error::Protocol("response missing result".to_string()))
}

pub(crate) fn parse_tools(result: Value) -> Result<Vec<RawTool>> {
    let tools = result
        .get("tools")
        .cloned()
        .ok_or_else(|| Error::Protocol("tools/list result missing tools".to_string()))?;
    serde_json::from_value(tools).map_err(|e| Error::Protocol(format!("bad tool list: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_response_result() {
        let response = json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}});
        let result = unwrap_response(response).unwrap();
        assert_eq!(result["ok"], true);
    }

    #[test]
    fn test_unwrap_response_error() {
        let response = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "downstream exploded"}
        });
        match unwrap_response(response) {
            Err(Error::Downstream(msg)) => assert_eq!(msg, "downstream exploded"),
            other => panic!("expected Downstream error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_tools() {
        let result = json!({
            "tools": [
                {"name": "echo", "description": "Echo input", "inputSchema": {"type": "object"}},
                {"name": "bare"}
            ]
        });
        let tools = parse_tools(result).unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "echo");
        assert!(tools[1].description.is_none());
    }

    #[test]
    fn test_downstream_config_rejects_unknown_keys() {
        let raw = json!({
            "name": "email",
            "transport": "stdio",
            "command": "email-server",
            "unknown_key": true,
        });
        let parsed: std::result::Result<DownstreamConfig, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }
}
