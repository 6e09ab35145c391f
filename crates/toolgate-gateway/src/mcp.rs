//! Upstream MCP JSON-RPC server over stdio.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;
use uuid::Uuid;

use toolgate_types::Role;

use crate::gateway::Gateway;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
        }
    }
}

pub struct McpServer {
    gateway: Gateway,
}

impl McpServer {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        // Requests without an id are notifications; handle side effects but
        // send nothing back.
        let is_notification = request.id.is_none();
        let id = request
            .id
            .clone()
            .unwrap_or_else(|| Value::Number(serde_json::Number::from(0)));

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_list_tools(id, request.params).await,
            "tools/call" => self.handle_call_tool(id, request.params).await,
            "context/update" => self.handle_update_context(id, request.params).await,
            _ => JsonRpcResponse::err(
                id,
                -32601,
                format!("Method not found: {}", request.method),
            ),
        };

        if is_notification {
            None
        } else {
            Some(response)
        }
    }

    fn handle_initialize(&self, id: Value) -> JsonRpcResponse {
        JsonRpcResponse::ok(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": true }
                },
                "serverInfo": {
                    "name": self.gateway.server_name(),
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "instructions": "Tool-routing gateway. The tool list adapts to the conversation; call context/update with each message so routing stays current.",
            }),
        )
    }

    async fn handle_list_tools(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let session_id = params
            .as_ref()
            .and_then(|p| p.get("sessionId"))
            .and_then(|s| s.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        match self.gateway.list_tools(session_id).await {
            Ok(tools) => JsonRpcResponse::ok(id, json!({ "tools": tools })),
            Err(e) => JsonRpcResponse::err(id, -32603, e.to_string()),
        }
    }

    async fn handle_call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::err(id, -32602, "Missing params".to_string());
        };
        let Some(tool_name) = params.get("name").and_then(|v| v.as_str()) else {
            return JsonRpcResponse::err(id, -32602, "Missing tool name".to_string());
        };
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        // Failures come back as self-correction text, not protocol errors,
        // so the model can adjust and retry.
        let outcome = self.gateway.call_tool(tool_name, arguments).await;
        JsonRpcResponse::ok(
            id,
            json!({
                "content": [
                    { "type": "text", "text": outcome.text }
                ],
                "isError": !outcome.success,
            }),
        )
    }

    async fn handle_update_context(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::err(id, -32602, "Missing params".to_string());
        };
        let Some(message) = params.get("message").and_then(|v| v.as_str()) else {
            return JsonRpcResponse::err(id, -32602, "Missing message".to_string());
        };
        let role = params
            .get("role")
            .and_then(|v| v.as_str())
            .and_then(Role::parse)
            .unwrap_or(Role::User);

        match self.gateway.update_context(message, role).await {
            Ok(()) => JsonRpcResponse::ok(id, json!({ "ok": true })),
            Err(e) => JsonRpcResponse::err(id, -32603, e.to_string()),
        }
    }
}

/// Run the gateway as a stdio MCP server until stdin closes.
pub async fn run_stdio(server: &McpServer) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "unparseable request line");
                let error_response = JsonRpcResponse::err(
                    Value::Number(serde_json::Number::from(-1)),
                    -32700,
                    format!("Parse error: {}", e),
                );
                let payload = serde_json::to_string(&error_response)?;
                stdout.write_all(payload.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
                continue;
            }
        };

        if let Some(response) = server.handle_request(request).await {
            let payload = serde_json::to_string(&response)?;
            stdout.write_all(payload.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}
