use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use toolgate_types::{Message, Role};

use crate::session::Session;

/// Per-tool usage aggregate for one session (or all sessions).
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub uses: u64,
    pub success_rate: f64,
    pub avg_time_ms: f64,
}

/// Durable session storage: SQLite plus an in-memory cache.
///
/// The cache maps session id to `Arc<Mutex<Session>>`; mutation happens
/// under the per-session mutex while the cache map itself only takes a
/// short global lock. Memory-only mode skips the database entirely.
pub struct SessionStore {
    conn: Option<Mutex<Connection>>,
    cache: Mutex<HashMap<Uuid, Arc<Mutex<Session>>>>,
    ttl_seconds: i64,
}

impl SessionStore {
    pub fn open(db_path: &Path, ttl_seconds: i64) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open session store: {}", db_path.display()))?;
        let store = Self {
            conn: Some(Mutex::new(conn)),
            cache: Mutex::new(HashMap::new()),
            ttl_seconds,
        };
        store.init_schema()?;
        info!(path = %db_path.display(), "session store opened");
        Ok(store)
    }

    /// Memory-only store; sessions die with the process.
    pub fn in_memory(ttl_seconds: i64) -> Self {
        Self {
            conn: None,
            cache: Mutex::new(HashMap::new()),
            ttl_seconds,
        }
    }

    /// SQLite store backed by an in-memory database, for tests.
    pub fn open_ephemeral() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Some(Mutex::new(conn)),
            cache: Mutex::new(HashMap::new()),
            ttl_seconds: 3600,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };
        let conn = conn.lock().expect("session db lock poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                state_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                tool_call_id TEXT,
                tool_name TEXT,
                metadata_json TEXT,
                FOREIGN KEY (session_id) REFERENCES sessions(session_id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(session_id, timestamp);

            CREATE TABLE IF NOT EXISTS tool_usage_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                success INTEGER NOT NULL,
                execution_time_ms REAL,
                error TEXT,
                FOREIGN KEY (session_id) REFERENCES sessions(session_id)
            );

            CREATE INDEX IF NOT EXISTS idx_tool_usage_session
            ON tool_usage_log(session_id, timestamp);
            "#,
        )?;
        Ok(())
    }

    pub fn create(&self) -> Result<Arc<Mutex<Session>>> {
        let session = Session::new();
        let id = session.id;
        self.save(&session)?;

        let handle = Arc::new(Mutex::new(session));
        self.cache
            .lock()
            .expect("session cache lock poisoned")
            .insert(id, handle.clone());
        debug!(session_id = %id, "session created");
        Ok(handle)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Arc<Mutex<Session>>>> {
        if let Some(handle) = self
            .cache
            .lock()
            .expect("session cache lock poisoned")
            .get(&id)
        {
            return Ok(Some(handle.clone()));
        }

        let Some(session) = self.load(id)? else {
            return Ok(None);
        };
        let handle = Arc::new(Mutex::new(session));
        self.cache
            .lock()
            .expect("session cache lock poisoned")
            .insert(id, handle.clone());
        Ok(Some(handle))
    }

    pub fn get_or_create(&self, id: Option<Uuid>) -> Result<Arc<Mutex<Session>>> {
        if let Some(id) = id {
            if let Some(existing) = self.get(id)? {
                return Ok(existing);
            }
        }
        self.create()
    }

    /// Persist the session row and its messages.
    pub fn save(&self, session: &Session) -> Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };

        let state_json = serde_json::to_string(session)?;

        let conn = conn.lock().expect("session db lock poisoned");
        conn.execute(
            r#"
            INSERT OR REPLACE INTO sessions (session_id, created_at, updated_at, state_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                session.id.to_string(),
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
                state_json,
            ],
        )?;

        // Archival rewrites history, so replace rather than append.
        conn.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            [session.id.to_string()],
        )?;
        for msg in &session.messages {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO messages
                (id, session_id, role, content, timestamp, tool_call_id, tool_name, metadata_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    msg.id.to_string(),
                    session.id.to_string(),
                    msg.role.as_str(),
                    msg.content,
                    msg.timestamp.to_rfc3339(),
                    msg.tool_call_id,
                    msg.tool_name,
                    msg.metadata.as_ref().map(|m| m.to_string()),
                ],
            )?;
        }
        Ok(())
    }

    fn load(&self, id: Uuid) -> Result<Option<Session>> {
        let Some(conn) = &self.conn else {
            return Ok(None);
        };
        let conn = conn.lock().expect("session db lock poisoned");

        let state_json: Option<String> = conn
            .query_row(
                "SELECT state_json FROM sessions WHERE session_id = ?1",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(state_json) = state_json else {
            return Ok(None);
        };

        let mut session: Session =
            serde_json::from_str(&state_json).context("bad session state payload")?;
        session.id = id;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, role, content, timestamp, tool_call_id, tool_name, metadata_json
            FROM messages
            WHERE session_id = ?1
            ORDER BY timestamp
            "#,
        )?;
        let rows = stmt.query_map([id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (msg_id, role, content, timestamp, tool_call_id, tool_name, metadata_json) = row?;
            messages.push(Message {
                id: Uuid::parse_str(&msg_id)
                    .with_context(|| format!("bad message id: {}", msg_id))?,
                role: Role::parse(&role).unwrap_or(Role::System),
                content,
                timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp)
                    .with_context(|| format!("bad timestamp: {}", timestamp))?
                    .with_timezone(&Utc),
                tool_call_id,
                tool_name,
                metadata: metadata_json.and_then(|m| serde_json::from_str(&m).ok()),
            });
        }
        session.messages = messages;
        Ok(Some(session))
    }

    /// Append to the per-session tool usage log.
    pub fn log_tool_usage(
        &self,
        session_id: Uuid,
        tool_name: &str,
        success: bool,
        execution_time_ms: f64,
        error: Option<&str>,
    ) -> Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };
        let conn = conn.lock().expect("session db lock poisoned");
        conn.execute(
            r#"
            INSERT INTO tool_usage_log
            (session_id, tool_name, timestamp, success, execution_time_ms, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                session_id.to_string(),
                tool_name,
                Utc::now().to_rfc3339(),
                success as i64,
                execution_time_ms,
                error,
            ],
        )?;
        Ok(())
    }

    /// Per-tool usage aggregates, optionally scoped to one session.
    pub fn tool_usage_stats(
        &self,
        session_id: Option<Uuid>,
    ) -> Result<HashMap<String, UsageStats>> {
        let Some(conn) = &self.conn else {
            return Ok(HashMap::new());
        };
        let conn = conn.lock().expect("session db lock poisoned");

        let mut stmt = conn.prepare(
            r#"
            SELECT tool_name, COUNT(*), COALESCE(SUM(success), 0),
                   COALESCE(AVG(execution_time_ms), 0)
            FROM tool_usage_log
            WHERE (?1 IS NULL OR session_id = ?1)
            GROUP BY tool_name
            "#,
        )?;
        let rows = stmt.query_map(params![session_id.map(|s| s.to_string())], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;

        let mut stats = HashMap::new();
        for row in rows {
            let (tool_name, uses, successes, avg_time) = row?;
            stats.insert(
                tool_name,
                UsageStats {
                    uses: uses as u64,
                    success_rate: if uses > 0 {
                        successes as f64 / uses as f64
                    } else {
                        0.0
                    },
                    avg_time_ms: avg_time,
                },
            );
        }
        Ok(stats)
    }

    /// Delete sessions idle beyond the cutoff, cascading messages and usage
    /// rows. Returns the session count removed.
    pub fn cleanup(&self, max_age_hours: Option<i64>) -> Result<usize> {
        let Some(conn) = &self.conn else {
            return Ok(0);
        };

        let max_age = max_age_hours.unwrap_or(self.ttl_seconds / 3600);
        let cutoff = (Utc::now() - Duration::hours(max_age)).to_rfc3339();

        let conn = conn.lock().expect("session db lock poisoned");
        let mut stmt = conn.prepare("SELECT session_id FROM sessions WHERE updated_at < ?1")?;
        let stale: Vec<String> = stmt
            .query_map([&cutoff], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for session_id in &stale {
            conn.execute("DELETE FROM messages WHERE session_id = ?1", [session_id])?;
            conn.execute("DELETE FROM tool_usage_log WHERE session_id = ?1", [session_id])?;
            conn.execute("DELETE FROM sessions WHERE session_id = ?1", [session_id])?;
        }
        drop(stmt);
        drop(conn);

        let mut cache = self.cache.lock().expect("session cache lock poisoned");
        for session_id in &stale {
            if let Ok(id) = Uuid::parse_str(session_id) {
                cache.remove(&id);
            }
        }

        debug!(count = stale.len(), "sessions cleaned up");
        Ok(stale.len())
    }
}
