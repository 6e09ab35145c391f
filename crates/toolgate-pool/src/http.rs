use serde_json::Value;
use tracing::debug;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::transport::{
    build_notification, build_request, initialize_params, parse_tools, unwrap_response,
    DownstreamConfig, RawTool, Transport,
};

/// Streamable-HTTP transport: every JSON-RPC request is one POST, the
/// response body carries the reply.
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: reqwest::Url,
    session_id: Option<String>,
    next_id: u64,
    server: String,
}

impl StreamableHttpTransport {
    pub fn new(config: &DownstreamConfig) -> Result<Self> {
        let url = config.url.as_ref().ok_or_else(|| {
            Error::Transport(format!(
                "no url specified for streamable-http server: {}",
                config.name
            ))
        })?;
        let url = reqwest::Url::parse(url)
            .map_err(|e| Error::Transport(format!("bad http url {}: {}", url, e)))?;

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            session_id: None,
            next_id: 0,
            server: config.name.clone(),
        })
    }

    async fn post(&mut self, payload: &Value) -> Result<Option<Value>> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header("Accept", "application/json")
            .json(payload);
        if let Some(session_id) = &self.session_id {
            request = request.header("Mcp-Session-Id", session_id.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("post to {} failed: {}", self.server, e)))?
            .error_for_status()
            .map_err(|e| Error::Transport(format!("post to {} rejected: {}", self.server, e)))?;

        // The server assigns a session id on initialize; echo it back after.
        if let Some(session_id) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session_id.to_string());
        }

        if response.status().as_u16() == 202 {
            return Ok(None);
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("bad response body from {}: {}", self.server, e)))?;
        Ok(Some(body))
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        let frame = self
            .post(&build_request(id, method, params))
            .await?
            .ok_or_else(|| Error::Protocol(format!("{} returned no body for request", self.server)))?;
        unwrap_response(frame)
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn initialize(&mut self) -> Result<()> {
        self.request("initialize", initialize_params()).await?;
        self.post(&build_notification("notifications/initialized")).await?;
        debug!(server = %self.server, session = ?self.session_id, "http session initialized");
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
        // Stateless per-request transport; nothing to tear down.
    }
}
