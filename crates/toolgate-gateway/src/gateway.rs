use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use toolgate_learning::{
    BanditConfig, BanditScorer, BiasConfig, BiasStore, FeatureExtractor,
};
use toolgate_pool::{ConnectionPool, PoolConfig, TransportFactory};
use toolgate_router::{Router, RouterConfig, RoutingContext, RoutingOutcome};
use toolgate_session::{Session, SessionStore};
use toolgate_telemetry::{
    RewardCalculator, RewardSignal, TelemetryStore, ToolCallRecord,
};
use toolgate_types::Role;
use toolgate_zoo::{tokenize, HashingEmbedder, SqliteVectorStore, ToolZoo};

use crate::config::{Config, SessionPersistence};
use crate::error::{Error, Result};

/// Result of one upstream tool call, already shaped for the wire.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub success: bool,
    pub text: String,
}

#[derive(Default)]
struct CurrentState {
    session: Option<Arc<Mutex<Session>>>,
    last_routing: Option<RoutingOutcome>,
    /// Tools the client used from the current slate, for co-occurrence
    used_since_routing: Vec<String>,
    last_user_message: Option<String>,
    last_tool_called: Option<String>,
}

/// The gateway: upstream-facing orchestration over the zoo, router, pool,
/// session store, and learning loop. Pure glue; every decision lives in
/// the component that owns it.
pub struct Gateway {
    config: Config,
    zoo: Arc<ToolZoo>,
    router: Arc<Router>,
    pool: Arc<ConnectionPool>,
    sessions: Arc<SessionStore>,
    telemetry: Option<Arc<TelemetryStore>>,
    bandit: Option<Arc<Mutex<BanditScorer>>>,
    biases: Option<Arc<Mutex<BiasStore>>>,
    rewards: RewardCalculator,
    extractor: FeatureExtractor,
    current: Mutex<CurrentState>,
}

impl Gateway {
    pub fn new(config: Config) -> Result<Self> {
        let factory = toolgate_pool::default_transport_factory();
        Self::with_transport_factory(config, factory, PoolConfig::default())
    }

    /// Construction with an injected transport factory and pool tuning,
    /// used by tests to stand up mock downstream servers.
    pub fn with_transport_factory(
        config: Config,
        factory: TransportFactory,
        pool_config: PoolConfig,
    ) -> Result<Self> {
        let data_dir = config.data_dir()?;
        std::fs::create_dir_all(&data_dir)?;

        let zoo_dir = config.zoo_dir()?;
        std::fs::create_dir_all(&zoo_dir)?;
        let vectors =
            SqliteVectorStore::open(&zoo_dir.join(format!("{}.db", config.tool_zoo.collection_name)))
                .map_err(|e| Error::Zoo(e.into()))?;
        let zoo = Arc::new(ToolZoo::new(
            Arc::new(HashingEmbedder::default()),
            Box::new(vectors),
            config.tool_zoo.similarity_threshold,
        ));

        let telemetry = if config.telemetry.enabled {
            let store = TelemetryStore::open(&config.telemetry_db()?, config.telemetry.log_query_text)
                .map_err(Error::Telemetry)?;
            Some(Arc::new(store))
        } else {
            None
        };

        let bandit = if config.bandit.enabled {
            let scorer = BanditScorer::open(
                &config.bandit_db()?,
                BanditConfig {
                    feature_dim: config.bandit.feature_dim,
                    learning_rate: config.bandit.learning_rate,
                    l2_regularization: config.bandit.l2_regularization,
                    exploration: config.router.exploration_type,
                    epsilon: config.router.exploration_rate,
                    persist_every_n_updates: config.bandit.persist_every_n_updates,
                    ..Default::default()
                },
            )
            .map_err(Error::Learning)?;
            Some(Arc::new(Mutex::new(scorer)))
        } else {
            None
        };

        let biases = if config.bias_learning.enabled {
            let store = BiasStore::open(
                &config.bias_db()?,
                BiasConfig {
                    learning_rate: config.bias_learning.learning_rate,
                    decay_rate: config.bias_learning.decay_rate,
                    max_bias: config.bias_learning.max_bias,
                    enable_delta_vectors: config.bias_learning.enable_delta_vectors,
                    embedding_dim: HashingEmbedder::DEFAULT_DIM,
                    ..Default::default()
                },
            )
            .map_err(Error::Learning)?;
            Some(Arc::new(Mutex::new(store)))
        } else {
            None
        };

        let sessions = Arc::new(match config.session.persistence {
            SessionPersistence::Sqlite => {
                SessionStore::open(&config.session_db()?, config.session.ttl_seconds)
                    .map_err(Error::Session)?
            }
            SessionPersistence::Memory => SessionStore::in_memory(config.session.ttl_seconds),
        });

        let router_config = RouterConfig {
            mode: config.router.mode,
            strategy: config.router.strategy,
            max_tools: config.router.max_tools,
            min_tools: config.router.min_tools,
            max_per_server: config.router.max_per_server,
            rerank: config.router.rerank,
            candidate_pool_size: config.router.candidate_pool_size,
            max_context_tokens: config.router.max_context_tokens,
            use_cross_encoder: config.router.use_cross_encoder,
            fallback_tools: config.router.fallback_tools.clone(),
            ..Default::default()
        };
        let mut router = Router::new(router_config, zoo.clone());
        if let Some(telemetry) = &telemetry {
            router = router.with_telemetry(telemetry.clone());
        }
        if let Some(bandit) = &bandit {
            router = router.with_bandit(bandit.clone());
        }
        if let Some(biases) = &biases {
            router = router.with_biases(biases.clone());
        }

        let pool = Arc::new(ConnectionPool::new(
            config.downstream_servers.clone(),
            pool_config,
            factory,
        ));

        let rewards = RewardCalculator {
            latency_scale: config.telemetry.latency_scale,
            latency_cap: config.telemetry.latency_cap,
            context_scale: config.telemetry.context_scale,
            context_cap: config.telemetry.context_cap,
            ..Default::default()
        };

        Ok(Self {
            config,
            zoo,
            router: Arc::new(router),
            pool,
            sessions,
            telemetry,
            bandit,
            biases,
            rewards,
            extractor: FeatureExtractor::default(),
            current: Mutex::new(CurrentState::default()),
        })
    }

    /// Connect downstream servers and index every discovered tool.
    pub async fn initialize(&self) -> Result<()> {
        info!("gateway initializing");
        self.pool.connect_all().await;

        let tools = self.pool.all_tools().await;
        if !tools.is_empty() {
            self.zoo.register_tools(&tools)?;
        }

        info!(
            downstream_servers = self.config.downstream_servers.len(),
            total_tools = tools.len(),
            "gateway initialized"
        );
        Ok(())
    }

    fn current_session(&self) -> Result<Arc<Mutex<Session>>> {
        let mut current = self.current.lock().expect("current state lock poisoned");
        if let Some(session) = &current.session {
            return Ok(session.clone());
        }
        let session = self.sessions.create().map_err(Error::Session)?;
        current.session = Some(session.clone());
        Ok(session)
    }

    /// Flush the usage set of the previous slate into the co-occurrence
    /// tracker. Called when a new slate supersedes it and at shutdown.
    fn flush_slate_usage(&self) {
        let (slate, used) = {
            let mut current = self.current.lock().expect("current state lock poisoned");
            let used = std::mem::take(&mut current.used_since_routing);
            (current.last_routing.as_ref().map(|o| o.slate.clone()), used)
        };
        if let (Some(slate), false) = (slate, used.is_empty()) {
            self.router.record_usage(&slate, &used);
        }
    }

    /// Serve `tools/list`: route on the session's current context and
    /// return the selected tool schemas.
    pub async fn list_tools(&self, session_id: Option<Uuid>) -> Result<Vec<Value>> {
        let session = match session_id {
            Some(id) => {
                let session = self
                    .sessions
                    .get_or_create(Some(id))
                    .map_err(Error::Session)?;
                self.current.lock().expect("current state lock poisoned").session =
                    Some(session.clone());
                session
            }
            None => self.current_session()?,
        };

        self.flush_slate_usage();

        let ctx = {
            let session = session.lock().expect("session lock poisoned");
            RoutingContext {
                session_id: Some(session.id),
                context: session.context_for_routing(self.router.config().context_messages),
                tool_usage: session.tool_usage.clone(),
                recent_tools: session.recent_tools.clone(),
            }
        };

        // Embedding may block; route on a worker thread.
        let router = self.router.clone();
        let outcome = tokio::task::spawn_blocking(move || router.route(&ctx))
            .await
            .map_err(|e| Error::Internal(format!("routing worker failed: {}", e)))?;

        let tools: Vec<Value> = outcome
            .slate
            .selected
            .iter()
            .filter_map(|s| self.zoo.get(&s.tool_name))
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                })
            })
            .collect();

        self.current
            .lock()
            .expect("current state lock poisoned")
            .last_routing = Some(outcome);

        Ok(tools)
    }

    /// Serve `tools/call`: dispatch downstream, then feed the outcome back
    /// into telemetry, the bandit, and the bias store.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> CallOutcome {
        let started = Instant::now();
        let result = self.pool.call_tool(name, arguments.clone()).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(value) => {
                self.record_session_usage(name, true, elapsed_ms, None);
                {
                    let mut current =
                        self.current.lock().expect("current state lock poisoned");
                    current.used_since_routing.push(name.to_string());
                    current.last_tool_called = Some(name.to_string());
                }
                self.learn_from_call(name, true, elapsed_ms, None);

                info!(tool = name, time_ms = elapsed_ms, "tool called");
                CallOutcome {
                    success: true,
                    text: render_result(&value),
                }
            }
            Err(e) => {
                self.record_session_usage(name, false, elapsed_ms, Some(&e.to_string()));
                self.learn_from_call(name, false, elapsed_ms, Some(e.class()));

                warn!(tool = name, error = %e, "tool call failed");
                CallOutcome {
                    success: false,
                    text: self.format_self_correction_error(name, &arguments, &e.to_string()),
                }
            }
        }
    }

    fn record_session_usage(
        &self,
        tool_name: &str,
        success: bool,
        elapsed_ms: f64,
        error: Option<&str>,
    ) {
        let Ok(session) = self.current_session() else {
            return;
        };
        let session_id = {
            let mut session = session.lock().expect("session lock poisoned");
            if success {
                session.record_tool_use(tool_name);
            }
            session.id
        };
        if let Err(e) = self
            .sessions
            .log_tool_usage(session_id, tool_name, success, elapsed_ms, error)
        {
            warn!(error = %e, "tool usage log dropped");
        }
        let session = session.lock().expect("session lock poisoned");
        if let Err(e) = self.sessions.save(&session) {
            warn!(error = %e, "session save failed");
        }
    }

    /// Telemetry + learning updates for one call outcome. Never fails the
    /// call path; write errors are logged and dropped.
    fn learn_from_call(
        &self,
        tool_name: &str,
        success: bool,
        elapsed_ms: f64,
        error_class: Option<&str>,
    ) {
        let (session_id, routing_event_id, rank, candidate, query_used) = {
            let current = self.current.lock().expect("current state lock poisoned");
            let session_id = current
                .session
                .as_ref()
                .map(|s| s.lock().expect("session lock poisoned").id);
            match &current.last_routing {
                Some(outcome) => (
                    session_id,
                    Some(outcome.event_id),
                    outcome.slate.rank_of(tool_name),
                    outcome
                        .slate
                        .candidates
                        .iter()
                        .find(|c| c.tool_name == tool_name)
                        .cloned(),
                    outcome.slate.query_used.clone(),
                ),
                None => (session_id, None, None, None, String::new()),
            }
        };

        let schema_tokens = candidate
            .as_ref()
            .map(|c| c.schema_tokens)
            .or_else(|| self.zoo.get(tool_name).map(|t| t.schema_tokens))
            .unwrap_or(0);

        let mut call = ToolCallRecord::new(tool_name, success);
        call.session_id = session_id;
        call.routing_event_id = routing_event_id;
        call.error_class = error_class.map(str::to_string);
        call.execution_time_ms = elapsed_ms;
        call.was_selected = rank.is_some();
        call.selection_rank = rank.map(|r| r as i64).unwrap_or(-1);
        let call_event_id = call.event_id;

        if let Some(telemetry) = &self.telemetry {
            if let Err(e) = telemetry.log_tool_call(&call) {
                warn!(error = %e, "tool call event dropped");
            }
        }

        let mut reward =
            self.rewards
                .calculate(tool_name, success, elapsed_ms, schema_tokens, false);
        reward.tool_call_event_id = Some(call_event_id);

        if let Some(telemetry) = &self.telemetry {
            if let Err(e) = telemetry.log_reward(&reward) {
                warn!(error = %e, "reward signal dropped");
            }
        }

        if let (Some(bandit), Some(candidate)) = (&self.bandit, &candidate) {
            let (rate, latency) = match &self.telemetry {
                Some(telemetry) => (
                    telemetry.rolling_success_rate(tool_name),
                    telemetry.avg_latency_ms(tool_name),
                ),
                None => (0.5, 0.0),
            };
            let features = self.extractor.extract(
                candidate.semantic_score,
                candidate.keyword_score,
                candidate.domain_match,
                candidate.cooccurrence_boost,
                rate,
                latency,
                candidate.schema_tokens,
            );
            match bandit.lock() {
                Ok(mut bandit) => bandit.update(&features, reward.total_reward),
                Err(_) => warn!("bandit lock poisoned, update skipped"),
            }
        }

        if let Some(biases) = &self.biases {
            let embedding = if self.config.bias_learning.enable_delta_vectors {
                self.zoo
                    .embed_query(&query_used)
                    .ok()
                    .map(|v| v.into_iter().map(f64::from).collect::<Vec<f64>>())
            } else {
                None
            };
            match biases.lock() {
                Ok(mut biases) => {
                    biases.update(tool_name, reward.total_reward, embedding.as_deref())
                }
                Err(_) => warn!("bias lock poisoned, update skipped"),
            }
        }
    }

    /// Supplementary penalty when the user's next turn retried the same
    /// request: the original reward already shipped, so this lands as its
    /// own negative signal.
    fn penalize_followup_retry(&self, tool_name: &str) {
        let mut reward = RewardSignal::new(tool_name);
        reward.followup_penalty = -0.2;
        reward.total_reward = -0.2;

        if let Some(telemetry) = &self.telemetry {
            if let Err(e) = telemetry.log_reward(&reward) {
                warn!(error = %e, "followup reward dropped");
            }
        }
        if let Some(biases) = &self.biases {
            if let Ok(mut biases) = biases.lock() {
                biases.update(tool_name, reward.total_reward, None);
            }
        }
        info!(tool = tool_name, "followup retry penalized");
    }

    /// Serve `context/update`: append a message to the current session and
    /// archive on overflow.
    pub async fn update_context(&self, message: &str, role: Role) -> Result<()> {
        if role == Role::User {
            let retried_tool = {
                let mut current = self.current.lock().expect("current state lock poisoned");
                let is_retry = current
                    .last_user_message
                    .as_deref()
                    .map(|prev| near_duplicate(prev, message))
                    .unwrap_or(false);
                let tool = if is_retry {
                    current.last_tool_called.clone()
                } else {
                    None
                };
                current.last_user_message = Some(message.to_string());
                current.last_tool_called = None;
                tool
            };
            if let Some(tool) = retried_tool {
                self.penalize_followup_retry(&tool);
            }
        }

        let session = self.current_session()?;
        {
            let mut session = session.lock().expect("session lock poisoned");
            session.add_message(role, message);
            if session.messages.len() > self.config.session.max_messages {
                session.archive_messages(self.config.session.max_messages / 2);
            }
            self.sessions.save(&session).map_err(Error::Session)?;
        }
        Ok(())
    }

    /// Error text shaped so the model can self-correct: what failed, what
    /// the tool expects, what was attempted, and what to try instead.
    pub fn format_self_correction_error(
        &self,
        tool_name: &str,
        arguments: &Value,
        error: &str,
    ) -> String {
        let mut parts = vec![
            format!("Error calling tool '{}':", tool_name),
            format!("  {}", error),
        ];

        if let Some(tool) = self.zoo.get(tool_name) {
            parts.push(format!("  Tool description: {}", tool.description));
            let params = tool.parameter_names();
            if !params.is_empty() {
                parts.push(format!("  Available parameters: {}", params.join(", ")));
            }
        }

        if arguments.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
            parts.push(format!("  Attempted with arguments: {}", arguments));
        }

        parts.push("  Please try again with:".to_string());
        parts.push("    - Different or corrected arguments".to_string());
        parts.push("    - A different tool if this one is unavailable".to_string());
        parts.join("\n")
    }

    /// Aggregate health/introspection view.
    pub async fn status(&self) -> Value {
        let current = {
            let current = self.current.lock().expect("current state lock poisoned");
            json!({
                "session": current
                    .session
                    .as_ref()
                    .map(|s| s.lock().expect("session lock poisoned").id.to_string()),
                "last_slate": current
                    .last_routing
                    .as_ref()
                    .map(|o| o.slate.tool_names().into_iter().map(String::from).collect::<Vec<_>>()),
            })
        };

        let bandit_stats = self
            .bandit
            .as_ref()
            .and_then(|b| b.lock().ok().map(|b| serde_json::to_value(b.stats()).ok()))
            .flatten();
        let bias_stats = self
            .biases
            .as_ref()
            .and_then(|b| b.lock().ok().map(|b| serde_json::to_value(b.stats()).ok()))
            .flatten();

        json!({
            "server": {
                "name": self.config.server.name,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "downstream_servers": self.pool.server_status().await,
            "tool_zoo": self.zoo.stats(),
            "router": self.router.learning_stats(),
            "bandit": bandit_stats,
            "biases": bias_stats,
            "current": current,
        })
    }

    /// Age out old telemetry events and idle sessions.
    pub fn cleanup(&self) -> Result<(usize, usize)> {
        let events = match &self.telemetry {
            Some(telemetry) => telemetry
                .cleanup(self.config.telemetry.cleanup_hours)
                .map_err(Error::Telemetry)?,
            None => 0,
        };
        let sessions = self.sessions.cleanup(None).map_err(Error::Session)?;
        Ok((events, sessions))
    }

    pub async fn shutdown(&self) {
        info!("gateway shutting down");
        self.flush_slate_usage();
        self.pool.disconnect_all().await;

        if let Some(bandit) = &self.bandit {
            if let Ok(mut bandit) = bandit.lock() {
                bandit.flush();
            }
        }
        if let Some(biases) = &self.biases {
            if let Ok(mut biases) = biases.lock() {
                biases.flush();
            }
        }
        info!("gateway shutdown complete");
    }

    pub fn server_name(&self) -> &str {
        &self.config.server.name
    }

    /// Introspection over the live session, for status surfaces.
    pub fn current_session_info(&self) -> Option<Value> {
        let current = self.current.lock().expect("current state lock poisoned");
        current.session.as_ref().map(|session| {
            let session = session.lock().expect("session lock poisoned");
            json!({
                "id": session.id.to_string(),
                "messages": session.messages.len(),
                "tools_used": session.tool_usage.len(),
                "archived": session.archive_summary,
            })
        })
    }
}

/// Downstream results are returned to the model as text content.
fn render_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Near-duplicate check for follow-up retry detection: high token overlap
/// between consecutive user turns.
fn near_duplicate(previous: &str, current: &str) -> bool {
    let prev_tokens = tokenize(previous);
    let cur_tokens = tokenize(current);
    if prev_tokens.is_empty() || cur_tokens.is_empty() {
        return false;
    }
    let intersection = prev_tokens.intersection(&cur_tokens).count() as f64;
    let union = prev_tokens.union(&cur_tokens).count() as f64;
    intersection / union >= 0.8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_near_duplicate_detection() {
        assert!(near_duplicate(
            "send an email to my boss",
            "send an email to my boss"
        ));
        assert!(near_duplicate(
            "send that email to my boss right now",
            "send that email to my boss now"
        ));
        assert!(!near_duplicate(
            "send an email to my boss",
            "charge the customer card"
        ));
        assert!(!near_duplicate("", "send an email"));
    }

    #[test]
    fn test_render_result() {
        assert_eq!(render_result(&json!("plain text")), "plain text");
        assert_eq!(render_result(&json!({"ok": true})), r#"{"ok":true}"#);
    }
}
