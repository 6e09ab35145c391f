use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use toolgate_types::{ServerStatus, ToolSpec};

use crate::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
use crate::error::{Error, Result};
use crate::transport::{DownstreamConfig, RawTool, TransportFactory};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_retries: u32,
    pub retry_delay_base: Duration,
    /// Hard deadline on every downstream tool call
    pub call_timeout: Duration,
    pub breaker: BreakerConfig,
    /// Defer connecting each server until its first call
    pub lazy: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_base: Duration::from_secs(1),
            call_timeout: Duration::from_secs(30),
            breaker: BreakerConfig::default(),
            lazy: false,
        }
    }
}

/// Monitoring view of one downstream server.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerSnapshot {
    pub status: ServerStatus,
    pub tool_count: usize,
    pub last_connected: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub breaker: BreakerSnapshot,
}

enum OwnerRequest {
    Call {
        name: String,
        arguments: Value,
        reply: oneshot::Sender<Result<Value>>,
    },
}

struct OwnerHandle {
    req_tx: mpsc::Sender<OwnerRequest>,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

struct ServerEntry {
    config: DownstreamConfig,
    status: ServerStatus,
    last_connected: Option<DateTime<Utc>>,
    last_error: Option<String>,
    breaker: CircuitBreaker,
    handle: Option<OwnerHandle>,
    tools: Vec<ToolSpec>,
}

#[derive(Default)]
struct PoolInner {
    servers: HashMap<String, ServerEntry>,
    /// Fully-qualified tool name -> owning server id
    tool_index: HashMap<String, String>,
}

/// Holds every downstream connection and dispatches tool calls.
///
/// One owner task per server performs connect, initialize, and tool
/// discovery, then serves call requests off an mpsc channel until its stop
/// signal fires; the transport never leaves that task. Dispatch applies
/// the per-server circuit breaker and a bounded exponential-backoff retry
/// loop, reconnecting first whenever the server is not `Connected`.
pub struct ConnectionPool {
    config: PoolConfig,
    factory: TransportFactory,
    inner: Mutex<PoolInner>,
}

impl ConnectionPool {
    pub fn new(
        servers: Vec<DownstreamConfig>,
        config: PoolConfig,
        factory: TransportFactory,
    ) -> Self {
        let mut inner = PoolInner::default();
        for server_config in servers {
            inner.servers.insert(
                server_config.name.clone(),
                ServerEntry {
                    breaker: CircuitBreaker::new(config.breaker.clone()),
                    config: server_config,
                    status: ServerStatus::Disconnected,
                    last_connected: None,
                    last_error: None,
                    handle: None,
                    tools: Vec::new(),
                },
            );
        }
        Self {
            config,
            factory,
            inner: Mutex::new(inner),
        }
    }

    /// Connect every configured server. In lazy mode this only registers
    /// them; transports spawn on first call.
    pub async fn connect_all(&self) {
        if self.config.lazy {
            let inner = self.inner.lock().await;
            info!(
                available_servers = inner.servers.len(),
                "lazy pool initialized"
            );
            return;
        }

        let server_ids: Vec<String> = {
            let inner = self.inner.lock().await;
            inner.servers.keys().cloned().collect()
        };

        let connections = server_ids.iter().map(|id| self.connect_server(id));
        futures::future::join_all(connections).await;

        let inner = self.inner.lock().await;
        let connected = inner
            .servers
            .values()
            .filter(|s| s.status == ServerStatus::Connected)
            .count();
        info!(
            total_servers = inner.servers.len(),
            connected,
            total_tools = inner.tool_index.len(),
            "connection pool initialized"
        );
    }

    /// Spawn (or respawn) the owner task for one server and wait for its
    /// ready barrier.
    async fn connect_server(&self, server_id: &str) {
        let server_config = {
            let mut inner = self.inner.lock().await;
            let Some(entry) = inner.servers.get_mut(server_id) else {
                return;
            };

            // Stop a previous owner task before respawning.
            if let Some(OwnerHandle { req_tx, stop_tx, join }) = entry.handle.take() {
                let _ = stop_tx.send(true);
                drop(req_tx);
                // Joining happens off the lock.
                tokio::spawn(async move {
                    let _ = join.await;
                });
            }
            entry.status = ServerStatus::Connecting;
            entry.last_error = None;
            entry.config.clone()
        };

        let (req_tx, req_rx) = mpsc::channel(32);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();

        let factory = self.factory.clone();
        let call_timeout = self.config.call_timeout;
        let owner_id = server_id.to_string();
        let join = tokio::spawn(run_owner(
            owner_id,
            server_config.clone(),
            factory,
            call_timeout,
            req_rx,
            stop_rx,
            ready_tx,
        ));

        let ready = match tokio::time::timeout(self.config.call_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Transport("owner task exited before ready".to_string())),
            Err(_) => Err(Error::Timeout(format!("connect to {}", server_id))),
        };

        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.servers.get_mut(server_id) else {
            return;
        };

        match ready {
            Ok(raw_tools) => {
                let tools = convert_tools(&server_config, &raw_tools);
                entry.status = ServerStatus::Connected;
                entry.last_connected = Some(Utc::now());
                entry.handle = Some(OwnerHandle {
                    req_tx,
                    stop_tx,
                    join,
                });
                entry.tools = tools.clone();
                info!(server = server_id, tool_count = tools.len(), "server connected");

                for tool in tools {
                    inner.tool_index.insert(tool.name.clone(), server_id.to_string());
                }
            }
            Err(e) => {
                entry.status = ServerStatus::Error;
                entry.last_error = Some(e.to_string());
                let _ = stop_tx.send(true);
                error!(server = server_id, error = %e, "server connection failed");
            }
        }
    }

    /// Make sure one server has a live session, connecting if needed.
    pub async fn ensure_connected(&self, server_id: &str) -> Result<()> {
        {
            let inner = self.inner.lock().await;
            match inner.servers.get(server_id) {
                Some(entry) if entry.status == ServerStatus::Connected => return Ok(()),
                Some(_) => {}
                None => return Err(Error::ServerNotFound(server_id.to_string())),
            }
        }
        self.connect_server(server_id).await;

        let inner = self.inner.lock().await;
        match inner.servers.get(server_id) {
            Some(entry) if entry.status == ServerStatus::Connected => Ok(()),
            Some(entry) => Err(Error::NotConnected(format!(
                "{}: {}",
                server_id,
                entry.last_error.as_deref().unwrap_or("connect failed")
            ))),
            None => Err(Error::ServerNotFound(server_id.to_string())),
        }
    }

    /// Resolve a wire tool name to `(server id, downstream tool name)`.
    ///
    /// Order: exact fully-qualified match, then `<server>.<rest>` prefix
    /// when the prefix is a known server, then a display-name scan. A
    /// dotted name whose prefix is not a configured server never gets
    /// misparsed as one.
    async fn resolve(&self, tool_name: &str) -> Result<(String, String)> {
        let inner = self.inner.lock().await;

        if let Some(server_id) = inner.tool_index.get(tool_name) {
            let prefix = format!("{}.", server_id);
            let downstream = tool_name
                .strip_prefix(&prefix)
                .unwrap_or(tool_name)
                .to_string();
            return Ok((server_id.clone(), downstream));
        }

        if let Some((prefix, rest)) = tool_name.split_once('.') {
            if inner.servers.contains_key(prefix) {
                return Ok((prefix.to_string(), rest.to_string()));
            }
        }

        for (server_id, entry) in &inner.servers {
            if entry.tools.iter().any(|t| t.display_name == tool_name) {
                return Ok((server_id.clone(), tool_name.to_string()));
            }
        }

        Err(Error::ToolNotFound(tool_name.to_string()))
    }

    async fn record_failure(&self, server_id: &str, error: &Error) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.servers.get_mut(server_id) {
            entry.breaker.record_failure();
            entry.status = ServerStatus::Error;
            entry.last_error = Some(error.to_string());
        }
    }

    async fn record_success(&self, server_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.servers.get_mut(server_id) {
            entry.breaker.record_success();
        }
    }

    /// Dispatch a tool call with circuit-breaker and retry semantics.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        let resolved = match self.resolve(tool_name).await {
            Ok(resolved) => Ok(resolved),
            // In lazy mode the index may be empty until first contact; a
            // known-server prefix is enough to bootstrap the connection.
            Err(Error::ToolNotFound(_)) if self.config.lazy => {
                if let Some((prefix, _)) = tool_name.split_once('.') {
                    let known = {
                        let inner = self.inner.lock().await;
                        inner.servers.contains_key(prefix)
                    };
                    if known {
                        self.ensure_connected(prefix).await?;
                        self.resolve(tool_name).await
                    } else {
                        Err(Error::ToolNotFound(tool_name.to_string()))
                    }
                } else {
                    Err(Error::ToolNotFound(tool_name.to_string()))
                }
            }
            Err(e) => Err(e),
        };
        let (server_id, downstream_name) = resolved?;

        // Circuit state is checked once per call, never inside the retry
        // loop: an open breaker surfaces immediately so the model can
        // self-correct instead of waiting out backoff.
        {
            let mut inner = self.inner.lock().await;
            let entry = inner
                .servers
                .get_mut(&server_id)
                .ok_or_else(|| Error::ServerNotFound(server_id.clone()))?;
            if !entry.breaker.can_attempt() {
                return Err(Error::CircuitOpen(server_id.clone()));
            }
        }

        let mut last_error = Error::NotConnected(server_id.clone());
        for attempt in 0..self.config.max_retries {
            let status = {
                let inner = self.inner.lock().await;
                inner
                    .servers
                    .get(&server_id)
                    .map(|e| e.status)
                    .ok_or_else(|| Error::ServerNotFound(server_id.clone()))?
            };
            if status != ServerStatus::Connected {
                debug!(server = %server_id, attempt, "reconnecting before dispatch");
                self.connect_server(&server_id).await;
            }

            let req_tx = {
                let inner = self.inner.lock().await;
                inner
                    .servers
                    .get(&server_id)
                    .and_then(|e| e.handle.as_ref())
                    .map(|h| h.req_tx.clone())
            };

            match req_tx {
                Some(req_tx) => {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    let request = OwnerRequest::Call {
                        name: downstream_name.clone(),
                        arguments: arguments.clone(),
                        reply: reply_tx,
                    };

                    let outcome = if req_tx.send(request).await.is_err() {
                        Err(Error::NotConnected(server_id.clone()))
                    } else {
                        match reply_rx.await {
                            Ok(result) => result,
                            Err(_) => Err(Error::Transport(format!(
                                "owner task for {} dropped the request",
                                server_id
                            ))),
                        }
                    };

                    match outcome {
                        Ok(value) => {
                            self.record_success(&server_id).await;
                            return Ok(value);
                        }
                        Err(e) => {
                            warn!(
                                tool = tool_name,
                                server = %server_id,
                                attempt = attempt + 1,
                                error = %e,
                                "tool call failed"
                            );
                            self.record_failure(&server_id, &e).await;
                            last_error = e;
                        }
                    }
                }
                None => {
                    let e = Error::NotConnected(server_id.clone());
                    self.record_failure(&server_id, &e).await;
                    last_error = e;
                }
            }

            if attempt + 1 < self.config.max_retries {
                let delay = self.config.retry_delay_base * 2u32.pow(attempt);
                debug!(tool = tool_name, delay_ms = delay.as_millis() as u64, "retrying tool call");
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error)
    }

    /// Every tool known across all connected servers.
    pub async fn all_tools(&self) -> Vec<ToolSpec> {
        let inner = self.inner.lock().await;
        inner
            .servers
            .values()
            .flat_map(|e| e.tools.iter().cloned())
            .collect()
    }

    pub async fn server_status(&self) -> HashMap<String, ServerSnapshot> {
        let mut inner = self.inner.lock().await;
        inner
            .servers
            .iter_mut()
            .map(|(id, entry)| {
                (
                    id.clone(),
                    ServerSnapshot {
                        status: entry.status,
                        tool_count: entry.tools.len(),
                        last_connected: entry.last_connected,
                        error: entry.last_error.clone(),
                        breaker: entry.breaker.snapshot(),
                    },
                )
            })
            .collect()
    }

    /// Stop every owner task and wait for the transports to close in the
    /// tasks that opened them.
    pub async fn disconnect_all(&self) {
        let handles: Vec<(String, OwnerHandle)> = {
            let mut inner = self.inner.lock().await;
            let handles = inner
                .servers
                .iter_mut()
                .filter_map(|(id, entry)| {
                    entry.status = ServerStatus::Disconnected;
                    entry.handle.take().map(|h| (id.clone(), h))
                })
                .collect();
            inner.tool_index.clear();
            handles
        };

        for (server_id, handle) in handles {
            let _ = handle.stop_tx.send(true);
            drop(handle.req_tx);
            if let Err(e) = handle.join.await {
                warn!(server = %server_id, error = %e, "owner task join failed");
            }
        }
        info!("connection pool shut down");
    }
}

/// Owner task body: the transport lives and dies here.
async fn run_owner(
    server_id: String,
    config: DownstreamConfig,
    factory: TransportFactory,
    call_timeout: Duration,
    mut req_rx: mpsc::Receiver<OwnerRequest>,
    mut stop_rx: watch::Receiver<bool>,
    ready_tx: oneshot::Sender<Result<Vec<RawTool>>>,
) {
    let mut transport = match (factory)(config).await {
        Ok(transport) => transport,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = transport.initialize().await {
        let _ = ready_tx.send(Err(e));
        transport.close().await;
        return;
    }

    let tools = match transport.list_tools().await {
        Ok(tools) => tools,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            transport.close().await;
            return;
        }
    };
    let _ = ready_tx.send(Ok(tools));

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            request = req_rx.recv() => {
                match request {
                    Some(OwnerRequest::Call { name, arguments, reply }) => {
                        let result = match tokio::time::timeout(
                            call_timeout,
                            transport.call_tool(&name, arguments),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(Error::Timeout(format!("{} on {}", name, server_id))),
                        };
                        let _ = reply.send(result);
                    }
                    None => break,
                }
            }
        }
    }

    transport.close().await;
    debug!(server = %server_id, "owner task stopped");
}

fn convert_tools(config: &DownstreamConfig, raw_tools: &[RawTool]) -> Vec<ToolSpec> {
    raw_tools
        .iter()
        .map(|raw| {
            ToolSpec::new(
                config.name.clone(),
                raw.name.clone(),
                raw.description.clone().unwrap_or_default(),
                raw.input_schema.clone(),
            )
            .with_tags(config.tags.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Shared behavior knobs for mock downstream servers.
    #[derive(Default)]
    struct MockState {
        connect_count: AtomicUsize,
        call_count: AtomicUsize,
        /// Calls that fail before the mock starts succeeding
        failures_remaining: AtomicUsize,
        /// Per-call artificial latency in ms
        call_delay_ms: AtomicUsize,
    }

    struct MockTransport {
        state: Arc<MockState>,
        tools: Vec<RawTool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn initialize(&mut self) -> Result<()> {
            Ok(())
        }

        async fn list_tools(&mut self) -> Result<Vec<RawTool>> {
            Ok(self.tools.clone())
        }

        async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value> {
            self.state.call_count.fetch_add(1, Ordering::SeqCst);

            let delay = self.state.call_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }

            let remaining = self.state.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.state.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::Downstream("mock failure".to_string()));
            }

            Ok(json!({"echo": name, "arguments": arguments}))
        }

        async fn close(&mut self) {}
    }

    fn mock_factory(state: Arc<MockState>, tools: Vec<RawTool>) -> TransportFactory {
        Arc::new(move |_config: DownstreamConfig| {
            let state = state.clone();
            let tools = tools.clone();
            Box::pin(async move {
                state.connect_count.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MockTransport { state, tools }) as Box<dyn Transport>)
            })
        })
    }

    fn raw_tool(name: &str) -> RawTool {
        RawTool {
            name: name.to_string(),
            description: Some(format!("The {} tool", name)),
            input_schema: json!({"type": "object", "properties": {"input": {}}}),
        }
    }

    fn server_config(name: &str) -> DownstreamConfig {
        DownstreamConfig {
            name: name.to_string(),
            transport: toolgate_types::TransportKind::Stdio,
            command: Some("unused".to_string()),
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            tags: vec![name.to_string()],
            description: String::new(),
        }
    }

    fn fast_config() -> PoolConfig {
        PoolConfig {
            max_retries: 3,
            retry_delay_base: Duration::from_millis(1),
            call_timeout: Duration::from_millis(500),
            breaker: BreakerConfig {
                failure_threshold: 5,
                timeout: Duration::from_millis(100),
                half_open_max_calls: 3,
            },
            lazy: false,
        }
    }

    #[tokio::test]
    async fn test_connect_all_registers_prefixed_tools() {
        let state = Arc::new(MockState::default());
        let pool = ConnectionPool::new(
            vec![server_config("email")],
            fast_config(),
            mock_factory(state.clone(), vec![raw_tool("send"), raw_tool("read")]),
        );
        pool.connect_all().await;

        let tools = pool.all_tools().await;
        assert_eq!(tools.len(), 2);
        assert!(tools.iter().any(|t| t.name == "email.send"));
        assert!(tools.iter().all(|t| t.server_id == "email"));
        assert_eq!(state.connect_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_call_tool_round_trip() {
        let state = Arc::new(MockState::default());
        let pool = ConnectionPool::new(
            vec![server_config("email")],
            fast_config(),
            mock_factory(state.clone(), vec![raw_tool("send")]),
        );
        pool.connect_all().await;

        let result = pool
            .call_tool("email.send", json!({"to": "boss@example.com"}))
            .await
            .unwrap();
        // The downstream server sees the unprefixed name.
        assert_eq!(result["echo"], "send");
        assert_eq!(state.call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_permanent_error() {
        let state = Arc::new(MockState::default());
        let pool = ConnectionPool::new(
            vec![server_config("email")],
            fast_config(),
            mock_factory(state.clone(), vec![raw_tool("send")]),
        );
        pool.connect_all().await;

        match pool.call_tool("nonexistent.tool", json!({})).await {
            Err(Error::ToolNotFound(_)) => {}
            other => panic!("expected ToolNotFound, got {:?}", other),
        }
        assert_eq!(state.call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dotted_tool_resolves_by_display_name() {
        // A downstream tool legitimately named "mock.echo"; "mock" is not a
        // configured server, so resolution must fall through to the
        // display-name scan instead of misparsing the prefix.
        let state = Arc::new(MockState::default());
        let pool = ConnectionPool::new(
            vec![server_config("email")],
            fast_config(),
            mock_factory(state.clone(), vec![raw_tool("mock.echo")]),
        );
        pool.connect_all().await;

        let result = pool.call_tool("mock.echo", json!({})).await.unwrap();
        assert_eq!(result["echo"], "mock.echo");
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let state = Arc::new(MockState::default());
        state.failures_remaining.store(2, Ordering::SeqCst);
        let pool = ConnectionPool::new(
            vec![server_config("email")],
            fast_config(),
            mock_factory(state.clone(), vec![raw_tool("send")]),
        );
        pool.connect_all().await;

        let result = pool.call_tool("email.send", json!({})).await;
        assert!(result.is_ok());
        assert_eq!(state.call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_consecutive_failures() {
        let state = Arc::new(MockState::default());
        state.failures_remaining.store(usize::MAX, Ordering::SeqCst);
        let config = PoolConfig {
            max_retries: 1,
            ..fast_config()
        };
        let pool = ConnectionPool::new(
            vec![server_config("email")],
            config,
            mock_factory(state.clone(), vec![raw_tool("send")]),
        );
        pool.connect_all().await;

        for _ in 0..5 {
            let _ = pool.call_tool("email.send", json!({})).await;
        }

        let before = state.call_count.load(Ordering::SeqCst);
        let started = std::time::Instant::now();
        match pool.call_tool("email.send", json!({})).await {
            Err(Error::CircuitOpen(server)) => assert_eq!(server, "email"),
            other => panic!("expected CircuitOpen, got {:?}", other),
        }
        // Rejected without touching the transport, and fast.
        assert_eq!(state.call_count.load(Ordering::SeqCst), before);
        assert!(started.elapsed() < Duration::from_millis(5));

        // After the breaker timeout the next call is allowed through.
        tokio::time::sleep(Duration::from_millis(120)).await;
        state.failures_remaining.store(0, Ordering::SeqCst);
        let result = pool.call_tool("email.send", json!({})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_call_timeout_is_reported() {
        let state = Arc::new(MockState::default());
        state.call_delay_ms.store(300, Ordering::SeqCst);
        let config = PoolConfig {
            max_retries: 1,
            call_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let pool = ConnectionPool::new(
            vec![server_config("email")],
            config,
            mock_factory(state.clone(), vec![raw_tool("send")]),
        );
        pool.connect_all().await;

        match pool.call_tool("email.send", json!({})).await {
            Err(Error::Timeout(_)) => {}
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lazy_pool_connects_on_first_call() {
        let state = Arc::new(MockState::default());
        let config = PoolConfig {
            lazy: true,
            ..fast_config()
        };
        let pool = ConnectionPool::new(
            vec![server_config("email")],
            config,
            mock_factory(state.clone(), vec![raw_tool("send")]),
        );
        pool.connect_all().await;
        assert_eq!(state.connect_count.load(Ordering::SeqCst), 0);

        let result = pool.call_tool("email.send", json!({})).await;
        assert!(result.is_ok());
        assert_eq!(state.connect_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let state = Arc::new(MockState::default());
        let pool = ConnectionPool::new(
            vec![server_config("email"), server_config("github")],
            fast_config(),
            mock_factory(state.clone(), vec![raw_tool("send")]),
        );
        pool.connect_all().await;
        pool.disconnect_all().await;

        let status = pool.server_status().await;
        assert!(status
            .values()
            .all(|s| s.status == ServerStatus::Disconnected));
    }

    #[tokio::test]
    async fn test_server_status_snapshot() {
        let state = Arc::new(MockState::default());
        let pool = ConnectionPool::new(
            vec![server_config("email")],
            fast_config(),
            mock_factory(state.clone(), vec![raw_tool("send")]),
        );
        pool.connect_all().await;

        let status = pool.server_status().await;
        let email = &status["email"];
        assert_eq!(email.status, ServerStatus::Connected);
        assert_eq!(email.tool_count, 1);
        assert!(email.last_connected.is_some());
        assert!(email.breaker.can_attempt);
    }
}
