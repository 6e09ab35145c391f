use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use toolgate_learning::{BanditScorer, BiasStore, FeatureExtractor};
use toolgate_telemetry::{hash_query, RoutingEventRecord, TelemetryStore};
use toolgate_types::{Candidate, SelectedTool, Slate, ToolSpec};
use toolgate_zoo::{SearchFilter, ToolZoo};

use crate::cooccur::{CooccurrenceTracker, LearningStats};
use crate::domains::detect_domains;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    Semantic,
    Keyword,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Baseline,
    Sota,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Baseline => "baseline",
            Strategy::Sota => "sota",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub mode: RoutingMode,
    pub strategy: Strategy,
    pub max_tools: usize,
    pub min_tools: usize,
    pub max_per_server: usize,
    pub rerank: bool,
    pub candidate_pool_size: usize,
    pub max_context_tokens: usize,
    /// Reserved: cross-encoder reranking is not wired in yet
    pub use_cross_encoder: bool,
    /// Weight of the bandit score in the final combination
    pub bandit_weight: f64,
    /// How many recent messages feed the routing query
    pub context_messages: usize,
    pub fallback_tools: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mode: RoutingMode::Hybrid,
            strategy: Strategy::Sota,
            max_tools: 10,
            min_tools: 1,
            max_per_server: 3,
            rerank: true,
            candidate_pool_size: 50,
            max_context_tokens: 8000,
            use_cross_encoder: false,
            bandit_weight: 0.3,
            context_messages: 5,
            fallback_tools: Vec::new(),
        }
    }
}

/// A slate plus the id of its persisted routing event, which later
/// tool-call records reference.
#[derive(Debug, Clone)]
pub struct RoutingOutcome {
    pub slate: Slate,
    pub event_id: Uuid,
}

/// The session view the gateway hands to the router: assembled context
/// text plus the usage signals the rerank stage reads. The router never
/// touches the session store itself.
#[derive(Debug, Clone, Default)]
pub struct RoutingContext {
    pub session_id: Option<Uuid>,
    /// Role-prefixed recent user/assistant messages, newline-joined
    pub context: String,
    /// Per-tool usage counts within this session
    pub tool_usage: HashMap<String, u64>,
    /// Distinct tools in order of most recent use, newest last
    pub recent_tools: Vec<String>,
}

impl RoutingContext {
    pub fn from_text(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            ..Default::default()
        }
    }

    fn usage_count(&self, tool_name: &str) -> u64 {
        self.tool_usage.get(tool_name).copied().unwrap_or(0)
    }

    fn recently_used(&self, n: usize) -> &[String] {
        let start = self.recent_tools.len().saturating_sub(n);
        &self.recent_tools[start..]
    }
}

struct ScoredCandidate {
    candidate: Candidate,
    server_id: String,
    rolling_success_rate: f64,
}

/// Context-aware tool selection.
///
/// One router type covers both strategies: `baseline` scores candidates
/// from retrieval and rerank boosts alone, `sota` additionally folds in
/// the bandit score and learned per-tool bias. The learning components are
/// optional; a router without them degrades gracefully.
pub struct Router {
    config: RouterConfig,
    zoo: Arc<ToolZoo>,
    telemetry: Option<Arc<TelemetryStore>>,
    bandit: Option<Arc<Mutex<BanditScorer>>>,
    biases: Option<Arc<Mutex<BiasStore>>>,
    cooccurrence: Mutex<CooccurrenceTracker>,
    extractor: FeatureExtractor,
}

impl Router {
    pub fn new(config: RouterConfig, zoo: Arc<ToolZoo>) -> Self {
        Self {
            config,
            zoo,
            telemetry: None,
            bandit: None,
            biases: None,
            cooccurrence: Mutex::new(CooccurrenceTracker::default()),
            extractor: FeatureExtractor::default(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryStore>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_bandit(mut self, bandit: Arc<Mutex<BanditScorer>>) -> Self {
        self.bandit = Some(bandit);
        self
    }

    pub fn with_biases(mut self, biases: Arc<Mutex<BiasStore>>) -> Self {
        self.biases = Some(biases);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Select the slate for one session. Never fails: retrieval or scorer
    /// faults degrade toward the fallback tools.
    pub fn route(&self, ctx: &RoutingContext) -> RoutingOutcome {
        let started = Instant::now();
        let context = ctx.context.clone();
        let query_used: String = context.chars().take(500).collect();

        if context.trim().is_empty() {
            return self.fallback_outcome(ctx, String::new(), started);
        }

        let domains = detect_domains(&context);
        debug!(?domains, "domains detected");

        let retrieved = self.retrieve(&context);
        if retrieved.is_empty() {
            return self.fallback_outcome(ctx, query_used, started);
        }

        // Keyword overlap per candidate, for the feature vector.
        let keyword_scores: HashMap<String, f64> = self
            .zoo
            .keyword_search(&context, self.config.candidate_pool_size)
            .into_iter()
            .map(|(tool, score)| (tool.name, score))
            .collect();

        let cooccur_boosts = self
            .cooccurrence
            .lock()
            .expect("cooccurrence lock poisoned")
            .boosts_for(ctx.recently_used(3));

        let use_learning = self.config.strategy == Strategy::Sota;
        let mut exploration_triggered = false;
        let mut scored: Vec<ScoredCandidate> = Vec::with_capacity(retrieved.len());

        for (tool, base_score) in retrieved {
            let keyword_score = keyword_scores.get(&tool.name).copied().unwrap_or(0.0);
            let domain_match = tool
                .domain
                .as_deref()
                .map(|d| domains.iter().any(|dom| *dom == d))
                .unwrap_or(false);
            let tag_match = tool
                .tags
                .iter()
                .any(|tag| domains.iter().any(|d| d.eq_ignore_ascii_case(tag)));
            let session_uses = ctx.usage_count(&tool.name);
            let cooccurrence_boost = cooccur_boosts.get(&tool.name).copied().unwrap_or(0.0);

            let (rolling_success_rate, avg_latency_ms) = match &self.telemetry {
                Some(telemetry) => (
                    telemetry.rolling_success_rate(&tool.name),
                    telemetry.avg_latency_ms(&tool.name),
                ),
                None => (0.5, 0.0),
            };

            let features = self.extractor.extract(
                base_score,
                keyword_score,
                domain_match,
                cooccurrence_boost,
                rolling_success_rate,
                avg_latency_ms,
                tool.schema_tokens,
            );

            let (bandit_score, explored) = match (&self.bandit, use_learning) {
                (Some(bandit), true) => match bandit.lock() {
                    Ok(bandit) => bandit.score_with_exploration(&features),
                    Err(_) => {
                        warn!(tool = %tool.name, "bandit lock poisoned, zeroing score");
                        (0.0, false)
                    }
                },
                _ => (0.0, false),
            };
            exploration_triggered |= explored;

            let bias_adjustment = match (&self.biases, use_learning) {
                (Some(biases), true) => match biases.lock() {
                    Ok(biases) => biases.bias(&tool.name),
                    Err(_) => 0.0,
                },
                _ => 0.0,
            };

            let mut adjusted = base_score;
            if self.config.rerank {
                if domain_match {
                    adjusted *= 1.3;
                }
                if tag_match {
                    adjusted *= 1.2;
                }
                adjusted += (session_uses as f64 * 0.02).min(0.1);
                adjusted += cooccurrence_boost;
            }

            let final_score = adjusted + bias_adjustment + self.config.bandit_weight * bandit_score;

            scored.push(ScoredCandidate {
                candidate: Candidate {
                    tool_name: tool.name.clone(),
                    semantic_score: base_score,
                    keyword_score,
                    domain_match,
                    cooccurrence_boost,
                    bandit_score,
                    bias_adjustment,
                    final_score,
                    schema_tokens: tool.schema_tokens,
                },
                server_id: tool.server_id.clone(),
                rolling_success_rate,
            });
        }

        // Ties break on rolling success rate, then tool name.
        scored.sort_by(|a, b| {
            b.candidate
                .final_score
                .total_cmp(&a.candidate.final_score)
                .then_with(|| b.rolling_success_rate.total_cmp(&a.rolling_success_rate))
                .then_with(|| a.candidate.tool_name.cmp(&b.candidate.tool_name))
        });

        let (selected, context_tokens_used) = self.select_budgeted(&scored);
        let candidates: Vec<Candidate> = scored.into_iter().map(|s| s.candidate).collect();

        let slate = Slate {
            selected,
            context_tokens_used,
            candidates,
            exploration_triggered,
            query_used,
            strategy: self.config.strategy.as_str().to_string(),
        };

        let event_id = self.emit_event(ctx, &context, &slate, started);
        info!(
            selected = slate.selected.len(),
            tokens = slate.context_tokens_used,
            explored = slate.exploration_triggered,
            "routing decision"
        );
        RoutingOutcome { slate, event_id }
    }

    fn retrieve(&self, context: &str) -> Vec<(ToolSpec, f64)> {
        let pool = self.config.candidate_pool_size;
        let result = match self.config.mode {
            RoutingMode::Semantic => {
                self.zoo.semantic_search(context, pool, &SearchFilter::default())
            }
            RoutingMode::Keyword => Ok(self.zoo.keyword_search(context, pool)),
            RoutingMode::Hybrid => self.zoo.hybrid_search(
                context,
                pool,
                toolgate_zoo::HYBRID_SEMANTIC_WEIGHT,
                toolgate_zoo::HYBRID_KEYWORD_WEIGHT,
            ),
        };
        match result {
            Ok(retrieved) => retrieved,
            Err(e) => {
                warn!(error = %e, "retrieval failed, falling back");
                Vec::new()
            }
        }
    }

    /// Greedy walk over score-ordered candidates under the token budget
    /// and per-server cap, topped up with fallback tools to reach
    /// `min_tools`.
    fn select_budgeted(&self, scored: &[ScoredCandidate]) -> (Vec<SelectedTool>, usize) {
        let mut selected: Vec<SelectedTool> = Vec::new();
        let mut tokens_used = 0usize;
        let mut server_counts: HashMap<&str, usize> = HashMap::new();

        for entry in scored {
            if selected.len() >= self.config.max_tools {
                break;
            }
            let per_server = server_counts.entry(entry.server_id.as_str()).or_insert(0);
            if *per_server >= self.config.max_per_server {
                continue;
            }
            if tokens_used + entry.candidate.schema_tokens > self.config.max_context_tokens {
                continue;
            }

            tokens_used += entry.candidate.schema_tokens;
            *per_server += 1;
            selected.push(SelectedTool {
                tool_name: entry.candidate.tool_name.clone(),
                score: entry.candidate.final_score,
            });
        }

        if selected.len() < self.config.min_tools {
            self.top_up_with_fallbacks(&mut selected, &mut tokens_used);
        }
        (selected, tokens_used)
    }

    /// Fallback tools score 0.1 and bypass the per-server cap; the
    /// min-tools guarantee outranks diversity.
    fn top_up_with_fallbacks(&self, selected: &mut Vec<SelectedTool>, tokens_used: &mut usize) {
        for fallback in &self.config.fallback_tools {
            if selected.len() >= self.config.min_tools {
                break;
            }
            if selected.iter().any(|s| &s.tool_name == fallback) {
                continue;
            }
            *tokens_used += self
                .zoo
                .get(fallback)
                .map(|t| t.schema_tokens)
                .unwrap_or(0);
            selected.push(SelectedTool {
                tool_name: fallback.clone(),
                score: 0.1,
            });
        }
    }

    /// Slate for an empty or unretrievable context: the configured
    /// fallback tools, nothing else.
    fn fallback_outcome(
        &self,
        ctx: &RoutingContext,
        query_used: String,
        started: Instant,
    ) -> RoutingOutcome {
        let mut selected = Vec::new();
        let mut tokens_used = 0usize;
        for fallback in &self.config.fallback_tools {
            tokens_used += self
                .zoo
                .get(fallback)
                .map(|t| t.schema_tokens)
                .unwrap_or(0);
            selected.push(SelectedTool {
                tool_name: fallback.clone(),
                score: 0.1,
            });
        }

        let slate = Slate {
            selected,
            context_tokens_used: tokens_used,
            candidates: Vec::new(),
            exploration_triggered: false,
            query_used: query_used.clone(),
            strategy: self.config.strategy.as_str().to_string(),
        };
        let event_id = self.emit_event(ctx, &query_used, &slate, started);
        RoutingOutcome { slate, event_id }
    }

    fn emit_event(
        &self,
        ctx: &RoutingContext,
        full_query: &str,
        slate: &Slate,
        started: Instant,
    ) -> Uuid {
        let mut event = RoutingEventRecord::new(hash_query(full_query));
        event.session_id = ctx.session_id;
        event.query_text = Some(slate.query_used.clone());
        event.candidates = slate.candidates.clone();
        event.selected_tools = slate.selected.iter().map(|s| s.tool_name.clone()).collect();
        event.total_candidates = slate.candidates.len();
        event.context_tokens_used = slate.context_tokens_used;
        event.max_context_tokens = self.config.max_context_tokens;
        event.selection_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        event.strategy = slate.strategy.clone();
        event.exploration_triggered = slate.exploration_triggered;
        let event_id = event.event_id;

        // Telemetry never blocks or fails the hot path.
        if let Some(telemetry) = &self.telemetry {
            if let Err(e) = telemetry.log_routing_event(&event) {
                warn!(error = %e, "routing event write dropped");
            }
        }
        event_id
    }

    /// Feed back which slate tools the client actually used; updates the
    /// co-occurrence counters behind future `cooccurrence_boost` features.
    pub fn record_usage(&self, slate: &Slate, used: &[String]) {
        let predicted: Vec<String> = slate
            .selected
            .iter()
            .map(|s| s.tool_name.clone())
            .collect();
        self.cooccurrence
            .lock()
            .expect("cooccurrence lock poisoned")
            .record_usage(&predicted, used);
    }

    pub fn learning_stats(&self) -> LearningStats {
        self.cooccurrence
            .lock()
            .expect("cooccurrence lock poisoned")
            .stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolgate_learning::{BanditConfig, BiasConfig};
    use toolgate_zoo::{HashingEmbedder, SqliteVectorStore};

    fn seed_zoo() -> Arc<ToolZoo> {
        let zoo = ToolZoo::new(
            Arc::new(HashingEmbedder::default()),
            Box::new(SqliteVectorStore::open_in_memory().unwrap()),
            0.0,
        );
        let schema = |params: &[&str]| {
            let props: serde_json::Map<String, serde_json::Value> = params
                .iter()
                .map(|p| (p.to_string(), json!({"type": "string"})))
                .collect();
            json!({"type": "object", "properties": props})
        };
        zoo.register_tools(&[
            ToolSpec::new("email", "send", "Send an email message to a recipient", schema(&["to", "subject", "body"]))
                .with_tags(vec!["email".into(), "communication".into()])
                .with_domain("email"),
            ToolSpec::new("email", "read", "Read messages from the email inbox", schema(&["folder"]))
                .with_tags(vec!["email".into()])
                .with_domain("email"),
            ToolSpec::new("github", "create_pr", "Create a pull request on a repository branch", schema(&["repo", "branch", "title"]))
                .with_tags(vec!["code".into()])
                .with_domain("code"),
            ToolSpec::new("stripe", "charge", "Charge a payment card", schema(&["amount", "currency"]))
                .with_tags(vec!["finance".into()])
                .with_domain("finance"),
            ToolSpec::new("calendar", "create_event", "Create a calendar event or schedule a meeting", schema(&["title", "start", "end"]))
                .with_tags(vec!["calendar".into()])
                .with_domain("calendar"),
            ToolSpec::new("slack", "send_message", "Send a chat message to a slack channel", schema(&["channel", "text"]))
                .with_tags(vec!["communication".into()])
                .with_domain("communication"),
        ])
        .unwrap();
        Arc::new(zoo)
    }

    fn ctx_saying(text: &str) -> RoutingContext {
        RoutingContext {
            session_id: Some(Uuid::new_v4()),
            context: format!("user: {}", text),
            ..Default::default()
        }
    }

    #[test]
    fn test_email_message_selects_email_tool() {
        let router = Router::new(RouterConfig::default(), seed_zoo());
        let outcome = router.route(&ctx_saying("Send an email to my boss"));

        assert!(outcome.slate.selected.len() <= router.config.max_tools);
        assert!(outcome
            .slate
            .selected
            .iter()
            .any(|s| s.tool_name.starts_with("email.")));
    }

    #[test]
    fn test_pull_request_message_selects_github() {
        let router = Router::new(RouterConfig::default(), seed_zoo());
        let outcome = router.route(&ctx_saying("Create a pull request for the feature branch"));
        assert!(outcome.slate.contains("github.create_pr"));
    }

    #[test]
    fn test_schedule_meeting_selects_calendar() {
        let config = RouterConfig {
            max_tools: 3,
            ..Default::default()
        };
        let router = Router::new(config, seed_zoo());
        let outcome = router.route(&ctx_saying("schedule meeting tomorrow"));
        assert!(outcome.slate.contains("calendar.create_event"));
    }

    #[test]
    fn test_empty_context_returns_fallbacks_only() {
        let config = RouterConfig {
            fallback_tools: vec!["email.send".to_string(), "calendar.create_event".to_string()],
            ..Default::default()
        };
        let router = Router::new(config, seed_zoo());
        let outcome = router.route(&RoutingContext::default());

        let names = outcome.slate.tool_names();
        assert_eq!(names, vec!["email.send", "calendar.create_event"]);
        assert!(outcome.slate.selected.iter().all(|s| s.score == 0.1));
    }

    #[test]
    fn test_token_budget_respected() {
        let config = RouterConfig {
            max_context_tokens: 40,
            min_tools: 0,
            ..Default::default()
        };
        let router = Router::new(config, seed_zoo());
        let outcome = router.route(&ctx_saying("send email schedule meeting charge payment"));

        assert!(outcome.slate.context_tokens_used <= 40);
        let total: usize = outcome
            .slate
            .selected
            .iter()
            .map(|s| {
                outcome
                    .slate
                    .candidates
                    .iter()
                    .find(|c| c.tool_name == s.tool_name)
                    .map(|c| c.schema_tokens)
                    .unwrap_or(0)
            })
            .sum();
        assert!(total <= 40);
    }

    #[test]
    fn test_per_server_cap() {
        let config = RouterConfig {
            max_per_server: 1,
            ..Default::default()
        };
        let router = Router::new(config, seed_zoo());
        let outcome = router.route(&ctx_saying("send and read my email inbox"));

        let email_count = outcome
            .slate
            .selected
            .iter()
            .filter(|s| s.tool_name.starts_with("email."))
            .count();
        assert!(email_count <= 1);
    }

    #[test]
    fn test_min_tools_topped_up_by_fallbacks() {
        let config = RouterConfig {
            min_tools: 2,
            max_context_tokens: 0,
            fallback_tools: vec!["email.send".to_string(), "stripe.charge".to_string()],
            ..Default::default()
        };
        let router = Router::new(config, seed_zoo());
        let outcome = router.route(&ctx_saying("schedule a meeting"));

        assert_eq!(outcome.slate.selected.len(), 2);
        assert!(outcome.slate.contains("email.send"));
        assert!(outcome.slate.contains("stripe.charge"));
    }

    #[test]
    fn test_cooccurrence_pulls_in_partner_tool() {
        let config = RouterConfig {
            max_tools: 3,
            ..Default::default()
        };
        let router = Router::new(config, seed_zoo());

        let pair = vec!["email.send".to_string(), "slack.send_message".to_string()];
        for _ in 0..5 {
            let outcome = router.route(&ctx_saying("Send an email update to the team"));
            router.record_usage(&outcome.slate, &pair);
        }

        let mut ctx = ctx_saying("Send an email to my boss");
        ctx.tool_usage.insert("email.send".to_string(), 1);
        ctx.recent_tools.push("email.send".to_string());
        let outcome = router.route(&ctx);
        assert!(outcome.slate.contains("slack.send_message"));

        let stats = router.learning_stats();
        assert_eq!(stats.predictions, 5);
        assert!(stats.cooccurrence_pairs >= 2);
    }

    #[test]
    fn test_routing_event_persisted() {
        let telemetry = Arc::new(TelemetryStore::open_in_memory().unwrap());
        let router =
            Router::new(RouterConfig::default(), seed_zoo()).with_telemetry(telemetry.clone());

        let ctx = ctx_saying("Send an email to my boss");
        let outcome = router.route(&ctx);

        let events = telemetry
            .routing_events(ctx.session_id, 10)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, outcome.event_id);
        assert_eq!(
            events[0].selected_tools,
            outcome
                .slate
                .selected
                .iter()
                .map(|s| s.tool_name.clone())
                .collect::<Vec<_>>()
        );
        assert!(events[0].total_candidates > 0);
    }

    #[test]
    fn test_sota_strategy_with_learning_components() {
        let bandit = Arc::new(Mutex::new(BanditScorer::in_memory(BanditConfig {
            epsilon: 1.0,
            ..Default::default()
        })));
        let biases = Arc::new(Mutex::new(BiasStore::in_memory(BiasConfig::default())));
        let router = Router::new(RouterConfig::default(), seed_zoo())
            .with_bandit(bandit)
            .with_biases(biases);

        let outcome = router.route(&ctx_saying("Send an email to my boss"));
        assert!(outcome.slate.exploration_triggered);
        assert!(outcome
            .slate
            .candidates
            .iter()
            .any(|c| c.bandit_score != 0.0));
    }

    #[test]
    fn test_baseline_strategy_ignores_learning() {
        let bandit = Arc::new(Mutex::new(BanditScorer::in_memory(BanditConfig {
            epsilon: 1.0,
            ..Default::default()
        })));
        let config = RouterConfig {
            strategy: Strategy::Baseline,
            ..Default::default()
        };
        let router = Router::new(config, seed_zoo()).with_bandit(bandit);

        let outcome = router.route(&ctx_saying("Send an email to my boss"));
        assert!(!outcome.slate.exploration_triggered);
        assert!(outcome.slate.candidates.iter().all(|c| c.bandit_score == 0.0));
    }

    #[test]
    fn test_learned_bias_reorders_candidates() {
        let biases = Arc::new(Mutex::new(BiasStore::in_memory(BiasConfig::default())));
        {
            let mut biases = biases.lock().unwrap();
            for _ in 0..100 {
                biases.update("slack.send_message", 1.0, None);
                biases.update("email.read", -1.0, None);
            }
        }
        let config = RouterConfig {
            max_tools: 2,
            ..Default::default()
        };
        let router = Router::new(config, seed_zoo()).with_biases(biases);

        let outcome = router.route(&ctx_saying("send a message to the team"));
        assert!(outcome.slate.contains("slack.send_message"));
    }
}
