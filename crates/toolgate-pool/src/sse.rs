use std::pin::Pin;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::transport::{
    build_notification, build_request, initialize_params, parse_tools, unwrap_response,
    DownstreamConfig, RawTool, Transport,
};

type EventStream = Pin<
    Box<dyn Stream<Item = std::result::Result<Event, EventStreamError<reqwest::Error>>> + Send + Sync>,
>;

/// HTTP+SSE transport: a long-lived GET stream carries server-to-client
/// messages, requests go out as POSTs to the endpoint the server announces
/// in its first `endpoint` event.
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    events: EventStream,
    next_id: u64,
    server: String,
}

impl SseTransport {
    pub async fn connect(config: &DownstreamConfig) -> Result<Self> {
        let url = config.url.as_ref().ok_or_else(|| {
            Error::Transport(format!("no url specified for sse server: {}", config.name))
        })?;
        let base = reqwest::Url::parse(url)
            .map_err(|e| Error::Transport(format!("bad sse url {}: {}", url, e)))?;

        let client = reqwest::Client::new();
        let response = client
            .get(base.clone())
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::Transport(format!("sse connect to {} failed: {}", url, e)))?;

        let mut events: EventStream = Box::pin(response.bytes_stream().eventsource());

        // The first event names the POST endpoint for this session.
        let endpoint = loop {
            match events.next().await {
                Some(Ok(event)) if event.event == "endpoint" => {
                    break base.join(event.data.trim()).map_err(|e| {
                        Error::Transport(format!("bad endpoint {}: {}", event.data, e))
                    })?;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(Error::Transport(format!("sse stream error: {}", e)));
                }
                None => {
                    return Err(Error::Transport(
                        "sse stream closed before endpoint event".to_string(),
                    ));
                }
            }
        };

        debug!(server = %config.name, endpoint = %endpoint, "sse session established");
        Ok(Self {
            client,
            endpoint,
            events,
            next_id: 0,
            server: config.name.clone(),
        })
    }

    async fn post(&self, payload: &Value) -> Result<()> {
        self.client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("post to {} failed: {}", self.server, e)))?
            .error_for_status()
            .map_err(|e| Error::Transport(format!("post to {} rejected: {}", self.server, e)))?;
        Ok(())
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        self.post(&build_request(id, method, params)).await?;

        loop {
            match self.events.next().await {
                Some(Ok(event)) if event.event == "message" || event.event.is_empty() => {
                    let frame: Value = match serde_json::from_str(&event.data) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(server = %self.server, error = %e, "skipping unparseable sse frame");
                            continue;
                        }
                    };
                    match frame.get("id").and_then(|v| v.as_u64()) {
                        Some(frame_id) if frame_id == id => return unwrap_response(frame),
                        _ => continue,
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(Error::Transport(format!("sse stream error: {}", e)));
                }
                None => {
                    return Err(Error::Transport(format!(
                        "sse stream for {} closed mid-request",
                        self.server
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn initialize(&mut self) -> Result<()> {
        self.request("initialize", initialize_params()).await?;
        self.post(&build_notification("notifications/initialized")).await?;
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
        // Dropping the event stream tears the session down server-side.
    }
}
