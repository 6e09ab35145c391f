use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use toolgate_types::Candidate;

/// Persisted record of one slate selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingEventRecord {
    pub event_id: Uuid,
    pub session_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    /// Truncated SHA-256 of the routing query; always present
    pub query_hash: String,
    /// Raw query, only populated when `log_query_text` is enabled
    pub query_text: Option<String>,
    pub candidates: Vec<Candidate>,
    pub selected_tools: Vec<String>,
    pub total_candidates: usize,
    pub context_tokens_used: usize,
    pub max_context_tokens: usize,
    pub selection_time_ms: f64,
    pub strategy: String,
    pub exploration_triggered: bool,
}

impl RoutingEventRecord {
    pub fn new(query_hash: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            session_id: None,
            timestamp: Utc::now(),
            query_hash: query_hash.into(),
            query_text: None,
            candidates: Vec::new(),
            selected_tools: Vec::new(),
            total_candidates: 0,
            context_tokens_used: 0,
            max_context_tokens: 0,
            selection_time_ms: 0.0,
            strategy: "baseline".to_string(),
            exploration_triggered: false,
        }
    }
}

/// Persisted record of one downstream tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub event_id: Uuid,
    pub session_id: Option<Uuid>,
    /// Routing event whose slate offered this tool
    pub routing_event_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub success: bool,
    pub error_class: Option<String>,
    pub execution_time_ms: f64,
    /// Whether the tool was in the offered slate at all
    pub was_selected: bool,
    /// Rank inside the slate, -1 when not selected
    pub selection_rank: i64,
}

impl ToolCallRecord {
    pub fn new(tool_name: impl Into<String>, success: bool) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            session_id: None,
            routing_event_id: None,
            timestamp: Utc::now(),
            tool_name: tool_name.into(),
            success,
            error_class: None,
            execution_time_ms: 0.0,
            was_selected: true,
            selection_rank: -1,
        }
    }
}

/// Computed reward for one tool call, the unit of online learning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardSignal {
    pub event_id: Uuid,
    pub tool_call_event_id: Option<Uuid>,
    pub tool_name: String,
    pub timestamp: DateTime<Utc>,
    /// +1 success, -1 failure
    pub success_reward: f64,
    /// Negative, applied only on success
    pub latency_penalty: f64,
    /// Negative, applied always
    pub context_cost_penalty: f64,
    /// Negative when the next user turn retried the same request
    pub followup_penalty: f64,
    /// Clamped sum in [-1, +1]
    pub total_reward: f64,
}

impl RewardSignal {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            tool_call_event_id: None,
            tool_name: tool_name.into(),
            timestamp: Utc::now(),
            success_reward: 0.0,
            latency_penalty: 0.0,
            context_cost_penalty: 0.0,
            followup_penalty: 0.0,
            total_reward: 0.0,
        }
    }
}

/// Materialized per-tool statistics, recomputed after every call insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    pub tool_name: String,
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_ms: f64,
    pub avg_reward: f64,
    /// Add-1 smoothed: (successes + 1) / (total + 2)
    pub rolling_success_rate: f64,
}

impl ToolStats {
    pub fn empty(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            avg_latency_ms: 0.0,
            avg_reward: 0.0,
            rolling_success_rate: 0.5,
        }
    }
}
