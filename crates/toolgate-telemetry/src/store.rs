use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::{RewardSignal, RoutingEventRecord, ToolCallRecord, ToolStats};

/// Dashboard-facing aggregate view over the event log.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub routing_events: u64,
    pub tool_calls: u64,
    pub overall_success_rate: f64,
    pub avg_tools_selected: f64,
    pub avg_selection_time_ms: f64,
    pub exploration_rate: f64,
}

/// SQLite-backed telemetry storage.
///
/// Writes serialize through the single connection; the store never blocks
/// the hot path on failure (callers log and drop).
pub struct TelemetryStore {
    conn: Mutex<Connection>,
    log_query_text: bool,
}

impl TelemetryStore {
    pub fn open(db_path: &Path, log_query_text: bool) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open telemetry store: {}", db_path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
            log_query_text,
        };
        store.init_schema()?;
        info!(path = %db_path.display(), "telemetry store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            log_query_text: true,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("telemetry lock poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS routing_events (
                event_id TEXT PRIMARY KEY,
                session_id TEXT,
                timestamp TEXT NOT NULL,
                query_hash TEXT NOT NULL,
                query_text TEXT,
                candidates_json TEXT NOT NULL,
                selected_tools_json TEXT NOT NULL,
                total_candidates INTEGER NOT NULL,
                context_tokens_used INTEGER NOT NULL,
                max_context_tokens INTEGER NOT NULL,
                selection_time_ms REAL NOT NULL,
                strategy TEXT NOT NULL,
                exploration_triggered INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_routing_session
            ON routing_events(session_id, timestamp);

            CREATE INDEX IF NOT EXISTS idx_routing_timestamp
            ON routing_events(timestamp);

            CREATE TABLE IF NOT EXISTS tool_call_events (
                event_id TEXT PRIMARY KEY,
                session_id TEXT,
                routing_event_id TEXT,
                timestamp TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                success INTEGER NOT NULL,
                error_class TEXT,
                execution_time_ms REAL NOT NULL,
                was_selected INTEGER NOT NULL,
                selection_rank INTEGER NOT NULL,
                FOREIGN KEY (routing_event_id) REFERENCES routing_events(event_id)
            );

            CREATE INDEX IF NOT EXISTS idx_tool_call_session
            ON tool_call_events(session_id, timestamp);

            CREATE INDEX IF NOT EXISTS idx_tool_call_tool
            ON tool_call_events(tool_name, timestamp);

            CREATE TABLE IF NOT EXISTS reward_signals (
                event_id TEXT PRIMARY KEY,
                tool_call_event_id TEXT,
                tool_name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                success_reward REAL NOT NULL,
                latency_penalty REAL NOT NULL,
                context_cost_penalty REAL NOT NULL,
                followup_penalty REAL NOT NULL,
                total_reward REAL NOT NULL,
                FOREIGN KEY (tool_call_event_id) REFERENCES tool_call_events(event_id)
            );

            CREATE INDEX IF NOT EXISTS idx_reward_tool
            ON reward_signals(tool_name, timestamp);

            CREATE TABLE IF NOT EXISTS tool_stats_cache (
                tool_name TEXT PRIMARY KEY,
                total_calls INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                avg_latency_ms REAL NOT NULL DEFAULT 0,
                avg_reward REAL NOT NULL DEFAULT 0,
                rolling_success_rate REAL NOT NULL DEFAULT 0.5,
                last_updated TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn log_routing_event(&self, event: &RoutingEventRecord) -> Result<()> {
        let candidates_json = serde_json::to_string(&event.candidates)?;
        let selected_json = serde_json::to_string(&event.selected_tools)?;
        let query_text = if self.log_query_text {
            event.query_text.clone()
        } else {
            None
        };

        let conn = self.conn.lock().expect("telemetry lock poisoned");
        conn.execute(
            r#"
            INSERT OR REPLACE INTO routing_events
            (event_id, session_id, timestamp, query_hash, query_text,
             candidates_json, selected_tools_json, total_candidates,
             context_tokens_used, max_context_tokens, selection_time_ms,
             strategy, exploration_triggered)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                event.event_id.to_string(),
                event.session_id.map(|s| s.to_string()),
                event.timestamp.to_rfc3339(),
                event.query_hash,
                query_text,
                candidates_json,
                selected_json,
                event.total_candidates as i64,
                event.context_tokens_used as i64,
                event.max_context_tokens as i64,
                event.selection_time_ms,
                event.strategy,
                event.exploration_triggered as i64,
            ],
        )?;
        Ok(())
    }

    pub fn log_tool_call(&self, event: &ToolCallRecord) -> Result<()> {
        {
            let conn = self.conn.lock().expect("telemetry lock poisoned");
            conn.execute(
                r#"
                INSERT OR REPLACE INTO tool_call_events
                (event_id, session_id, routing_event_id, timestamp, tool_name,
                 success, error_class, execution_time_ms, was_selected, selection_rank)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    event.event_id.to_string(),
                    event.session_id.map(|s| s.to_string()),
                    event.routing_event_id.map(|s| s.to_string()),
                    event.timestamp.to_rfc3339(),
                    event.tool_name,
                    event.success as i64,
                    event.error_class,
                    event.execution_time_ms,
                    event.was_selected as i64,
                    event.selection_rank,
                ],
            )?;
        }

        self.refresh_tool_stats(&event.tool_name)
    }

    pub fn log_reward(&self, reward: &RewardSignal) -> Result<()> {
        let conn = self.conn.lock().expect("telemetry lock poisoned");
        conn.execute(
            r#"
            INSERT OR REPLACE INTO reward_signals
            (event_id, tool_call_event_id, tool_name, timestamp,
             success_reward, latency_penalty, context_cost_penalty,
             followup_penalty, total_reward)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                reward.event_id.to_string(),
                reward.tool_call_event_id.map(|s| s.to_string()),
                reward.tool_name,
                reward.timestamp.to_rfc3339(),
                reward.success_reward,
                reward.latency_penalty,
                reward.context_cost_penalty,
                reward.followup_penalty,
                reward.total_reward,
            ],
        )?;
        Ok(())
    }

    /// Recompute the materialized stats row for one tool from history.
    fn refresh_tool_stats(&self, tool_name: &str) -> Result<()> {
        let conn = self.conn.lock().expect("telemetry lock poisoned");

        let (total, successes, failures, avg_latency): (i64, i64, i64, f64) = conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(success), 0),
                COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(AVG(execution_time_ms), 0)
            FROM tool_call_events
            WHERE tool_name = ?1
            "#,
            [tool_name],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let avg_reward: f64 = conn.query_row(
            "SELECT COALESCE(AVG(total_reward), 0) FROM reward_signals WHERE tool_name = ?1",
            [tool_name],
            |row| row.get(0),
        )?;

        let rolling_rate = (successes as f64 + 1.0) / (total as f64 + 2.0);

        conn.execute(
            r#"
            INSERT OR REPLACE INTO tool_stats_cache
            (tool_name, total_calls, success_count, failure_count,
             avg_latency_ms, avg_reward, rolling_success_rate, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                tool_name,
                total,
                successes,
                failures,
                avg_latency,
                avg_reward,
                rolling_rate,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn tool_stats(&self, tool_name: &str) -> Result<ToolStats> {
        let conn = self.conn.lock().expect("telemetry lock poisoned");
        let stats = conn
            .query_row(
                r#"
                SELECT tool_name, total_calls, success_count, failure_count,
                       avg_latency_ms, avg_reward, rolling_success_rate
                FROM tool_stats_cache
                WHERE tool_name = ?1
                "#,
                [tool_name],
                Self::stats_from_row,
            )
            .optional()?;
        Ok(stats.unwrap_or_else(|| ToolStats::empty(tool_name)))
    }

    pub fn all_tool_stats(&self) -> Result<Vec<ToolStats>> {
        let conn = self.conn.lock().expect("telemetry lock poisoned");
        let mut stmt = conn.prepare(
            r#"
            SELECT tool_name, total_calls, success_count, failure_count,
                   avg_latency_ms, avg_reward, rolling_success_rate
            FROM tool_stats_cache
            ORDER BY tool_name
            "#,
        )?;
        let stats = stmt
            .query_map([], Self::stats_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(stats)
    }

    fn stats_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToolStats> {
        Ok(ToolStats {
            tool_name: row.get(0)?,
            total_calls: row.get::<_, i64>(1)? as u64,
            success_count: row.get::<_, i64>(2)? as u64,
            failure_count: row.get::<_, i64>(3)? as u64,
            avg_latency_ms: row.get(4)?,
            avg_reward: row.get(5)?,
            rolling_success_rate: row.get(6)?,
        })
    }

    pub fn rolling_success_rate(&self, tool_name: &str) -> f64 {
        self.tool_stats(tool_name)
            .map(|s| s.rolling_success_rate)
            .unwrap_or(0.5)
    }

    pub fn avg_latency_ms(&self, tool_name: &str) -> f64 {
        self.tool_stats(tool_name).map(|s| s.avg_latency_ms).unwrap_or(0.0)
    }

    /// Routing events, newest first.
    pub fn routing_events(
        &self,
        session_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<RoutingEventRecord>> {
        let conn = self.conn.lock().expect("telemetry lock poisoned");
        let mut stmt = conn.prepare(
            r#"
            SELECT event_id, session_id, timestamp, query_hash, query_text,
                   candidates_json, selected_tools_json, total_candidates,
                   context_tokens_used, max_context_tokens, selection_time_ms,
                   strategy, exploration_triggered
            FROM routing_events
            WHERE (?1 IS NULL OR session_id = ?1)
            ORDER BY timestamp DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(
            params![session_id.map(|s| s.to_string()), limit as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, i64>(8)?,
                    row.get::<_, i64>(9)?,
                    row.get::<_, f64>(10)?,
                    row.get::<_, String>(11)?,
                    row.get::<_, i64>(12)?,
                ))
            },
        )?;

        let mut events = Vec::new();
        for row in rows {
            let (
                event_id,
                session_id,
                timestamp,
                query_hash,
                query_text,
                candidates_json,
                selected_json,
                total_candidates,
                tokens_used,
                max_tokens,
                selection_time_ms,
                strategy,
                explored,
            ) = row?;

            events.push(RoutingEventRecord {
                event_id: parse_uuid(&event_id)?,
                session_id: session_id.as_deref().map(parse_uuid).transpose()?,
                timestamp: parse_timestamp(&timestamp)?,
                query_hash,
                query_text,
                candidates: serde_json::from_str(&candidates_json)
                    .context("bad candidates payload")?,
                selected_tools: serde_json::from_str(&selected_json)
                    .context("bad selected tools payload")?,
                total_candidates: total_candidates as usize,
                context_tokens_used: tokens_used as usize,
                max_context_tokens: max_tokens as usize,
                selection_time_ms,
                strategy,
                exploration_triggered: explored != 0,
            });
        }
        Ok(events)
    }

    /// Reward signals, newest first.
    pub fn recent_rewards(
        &self,
        tool_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RewardSignal>> {
        let conn = self.conn.lock().expect("telemetry lock poisoned");
        let mut stmt = conn.prepare(
            r#"
            SELECT event_id, tool_call_event_id, tool_name, timestamp,
                   success_reward, latency_penalty, context_cost_penalty,
                   followup_penalty, total_reward
            FROM reward_signals
            WHERE (?1 IS NULL OR tool_name = ?1)
            ORDER BY timestamp DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![tool_name, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, f64>(7)?,
                row.get::<_, f64>(8)?,
            ))
        })?;

        let mut rewards = Vec::new();
        for row in rows {
            let (event_id, call_id, tool_name, timestamp, success, latency, context, followup, total) =
                row?;
            rewards.push(RewardSignal {
                event_id: parse_uuid(&event_id)?,
                tool_call_event_id: call_id.as_deref().map(parse_uuid).transpose()?,
                tool_name,
                timestamp: parse_timestamp(&timestamp)?,
                success_reward: success,
                latency_penalty: latency,
                context_cost_penalty: context,
                followup_penalty: followup,
                total_reward: total,
            });
        }
        Ok(rewards)
    }

    /// Delete events older than the cutoff, cascading reward -> tool-call ->
    /// routing. Returns the routing-event count removed.
    pub fn cleanup(&self, max_age_hours: i64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::hours(max_age_hours)).to_rfc3339();

        let conn = self.conn.lock().expect("telemetry lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM routing_events WHERE timestamp < ?1",
            [&cutoff],
            |row| row.get(0),
        )?;

        conn.execute("DELETE FROM reward_signals WHERE timestamp < ?1", [&cutoff])?;
        conn.execute("DELETE FROM tool_call_events WHERE timestamp < ?1", [&cutoff])?;
        conn.execute("DELETE FROM routing_events WHERE timestamp < ?1", [&cutoff])?;

        debug!(deleted = count, "telemetry cleanup");
        Ok(count as usize)
    }

    pub fn metrics_summary(&self) -> Result<MetricsSummary> {
        let conn = self.conn.lock().expect("telemetry lock poisoned");

        let routing_events: i64 =
            conn.query_row("SELECT COUNT(*) FROM routing_events", [], |row| row.get(0))?;
        let tool_calls: i64 =
            conn.query_row("SELECT COUNT(*) FROM tool_call_events", [], |row| row.get(0))?;

        let (successes, calls): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(success), 0), COUNT(*) FROM tool_call_events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let overall_success_rate = if calls > 0 {
            successes as f64 / calls as f64
        } else {
            0.0
        };

        let avg_tools_selected: f64 = conn.query_row(
            "SELECT COALESCE(AVG(json_array_length(selected_tools_json)), 0) FROM routing_events",
            [],
            |row| row.get(0),
        )?;
        let avg_selection_time_ms: f64 = conn.query_row(
            "SELECT COALESCE(AVG(selection_time_ms), 0) FROM routing_events",
            [],
            |row| row.get(0),
        )?;

        let (explored, total): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(exploration_triggered), 0), COUNT(*) FROM routing_events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let exploration_rate = if total > 0 {
            explored as f64 / total as f64
        } else {
            0.0
        };

        Ok(MetricsSummary {
            routing_events: routing_events as u64,
            tool_calls: tool_calls as u64,
            overall_success_rate,
            avg_tools_selected,
            avg_selection_time_ms,
            exploration_rate,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("bad uuid: {}", s))
}

fn parse_timestamp(s: &str) -> Result<chrono::DateTime<Utc>> {
    let parsed = chrono::DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp: {}", s))?;
    Ok(parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_types::Candidate;

    #[test]
    fn test_log_and_read_routing_event() {
        let store = TelemetryStore::open_in_memory().unwrap();

        let mut event = RoutingEventRecord::new(crate::hash_query("test query"));
        event.session_id = Some(Uuid::new_v4());
        event.candidates = vec![
            Candidate::new("tool1", 0.8),
            Candidate::new("tool2", 0.6),
        ];
        event.selected_tools = vec!["tool1".to_string()];
        event.total_candidates = 2;
        event.context_tokens_used = 100;
        event.max_context_tokens = 8000;
        event.selection_time_ms = 10.5;
        event.strategy = "sota".to_string();

        store.log_routing_event(&event).unwrap();

        let events = store.routing_events(None, 1).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].query_hash, event.query_hash);
        assert_eq!(events[0].candidates.len(), 2);
        assert_eq!(events[0].selected_tools, vec!["tool1"]);
    }

    #[test]
    fn test_routing_events_filter_by_session() {
        let store = TelemetryStore::open_in_memory().unwrap();
        let session = Uuid::new_v4();

        let mut mine = RoutingEventRecord::new("h1");
        mine.session_id = Some(session);
        store.log_routing_event(&mine).unwrap();

        let mut other = RoutingEventRecord::new("h2");
        other.session_id = Some(Uuid::new_v4());
        store.log_routing_event(&other).unwrap();

        let events = store.routing_events(Some(session), 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].query_hash, "h1");
    }

    #[test]
    fn test_tool_call_updates_stats_cache() {
        let store = TelemetryStore::open_in_memory().unwrap();

        let mut call = ToolCallRecord::new("test_tool", true);
        call.execution_time_ms = 50.0;
        call.selection_rank = 1;
        store.log_tool_call(&call).unwrap();

        let stats = store.tool_stats("test_tool").unwrap();
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.success_count, 1);
        // (1 + 1) / (1 + 2)
        assert!((stats.rolling_success_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_tool_stats_are_neutral() {
        let store = TelemetryStore::open_in_memory().unwrap();
        let stats = store.tool_stats("never_called").unwrap();
        assert_eq!(stats.total_calls, 0);
        assert_eq!(stats.rolling_success_rate, 0.5);
    }

    #[test]
    fn test_log_and_read_reward() {
        let store = TelemetryStore::open_in_memory().unwrap();

        let mut reward = RewardSignal::new("test_tool");
        reward.success_reward = 1.0;
        reward.latency_penalty = -0.1;
        reward.context_cost_penalty = -0.05;
        reward.total_reward = 0.85;
        store.log_reward(&reward).unwrap();

        let rewards = store.recent_rewards(Some("test_tool"), 1).unwrap();
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].total_reward, 0.85);
    }

    #[test]
    fn test_query_text_dropped_when_disabled() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = TelemetryStore::open(&dir.path().join("telemetry.db"), false).unwrap();

        let mut event = RoutingEventRecord::new("hash");
        event.query_text = Some("secret user text".to_string());
        store.log_routing_event(&event).unwrap();

        let events = store.routing_events(None, 1).unwrap();
        assert!(events[0].query_text.is_none());
        assert_eq!(events[0].query_hash, "hash");
    }

    #[test]
    fn test_cleanup_cascades() {
        let store = TelemetryStore::open_in_memory().unwrap();

        let mut old_event = RoutingEventRecord::new("old");
        old_event.timestamp = Utc::now() - Duration::hours(200);
        store.log_routing_event(&old_event).unwrap();

        let mut old_call = ToolCallRecord::new("t", true);
        old_call.timestamp = Utc::now() - Duration::hours(200);
        store.log_tool_call(&old_call).unwrap();

        let mut old_reward = RewardSignal::new("t");
        old_reward.timestamp = Utc::now() - Duration::hours(200);
        store.log_reward(&old_reward).unwrap();

        let fresh = RoutingEventRecord::new("fresh");
        store.log_routing_event(&fresh).unwrap();

        let deleted = store.cleanup(168).unwrap();
        assert_eq!(deleted, 1);

        let events = store.routing_events(None, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].query_hash, "fresh");
        assert!(store.recent_rewards(None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_metrics_summary() {
        let store = TelemetryStore::open_in_memory().unwrap();

        for i in 0..3 {
            let mut event = RoutingEventRecord::new(format!("hash{}", i));
            event.selected_tools = vec![format!("tool{}", i)];
            event.total_candidates = 10;
            event.selection_time_ms = 10.0;
            event.strategy = "sota".to_string();
            store.log_routing_event(&event).unwrap();

            let mut call = ToolCallRecord::new(format!("tool{}", i), i % 2 == 0);
            call.execution_time_ms = 50.0;
            store.log_tool_call(&call).unwrap();
        }

        let summary = store.metrics_summary().unwrap();
        assert_eq!(summary.routing_events, 3);
        assert_eq!(summary.tool_calls, 3);
        assert!(summary.overall_success_rate > 0.0 && summary.overall_success_rate <= 1.0);
        assert!((summary.avg_tools_selected - 1.0).abs() < 1e-9);
    }
}
