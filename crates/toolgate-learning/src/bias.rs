use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BiasConfig {
    pub learning_rate: f64,
    /// Slow decay toward zero, applied on every update
    pub decay_rate: f64,
    /// Clamp on bias magnitude
    pub max_bias: f64,
    pub enable_delta_vectors: bool,
    pub embedding_dim: usize,
    pub delta_learning_rate: f64,
    pub delta_l2_reg: f64,
    pub persist_every_n_updates: u64,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            decay_rate: 0.001,
            max_bias: 0.5,
            enable_delta_vectors: false,
            embedding_dim: 384,
            delta_learning_rate: 0.01,
            delta_l2_reg: 0.01,
            persist_every_n_updates: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BiasStats {
    pub tool_count: usize,
    pub mean_bias: f64,
    pub min_bias: f64,
    pub max_bias: f64,
    pub total_updates: u64,
    pub has_deltas: bool,
}

/// Per-tool additive score adjustment learned from rewards.
///
/// A positive bias means the tool performed better than its similarity
/// suggested. Optional delta vectors nudge the tool's effective embedding
/// toward (or away from) queries that rewarded (or punished) it.
pub struct BiasStore {
    config: BiasConfig,
    biases: HashMap<String, f64>,
    deltas: HashMap<String, Vec<f64>>,
    update_counts: HashMap<String, u64>,
    updates_since_persist: u64,
    conn: Option<Connection>,
}

impl BiasStore {
    pub fn open(db_path: &Path, config: BiasConfig) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open bias store: {}", db_path.display()))?;
        // The bandit scorer may share this database file.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tool_biases (
                tool_name TEXT PRIMARY KEY,
                bias REAL NOT NULL,
                delta_vector_json TEXT,
                update_count INTEGER NOT NULL,
                last_updated TEXT NOT NULL
            );
            "#,
        )?;

        let mut store = Self {
            config,
            biases: HashMap::new(),
            deltas: HashMap::new(),
            update_counts: HashMap::new(),
            updates_since_persist: 0,
            conn: Some(conn),
        };
        store.load_all()?;
        Ok(store)
    }

    pub fn in_memory(config: BiasConfig) -> Self {
        Self {
            config,
            biases: HashMap::new(),
            deltas: HashMap::new(),
            update_counts: HashMap::new(),
            updates_since_persist: 0,
            conn: None,
        }
    }

    fn load_all(&mut self) -> Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };

        let mut stmt =
            conn.prepare("SELECT tool_name, bias, delta_vector_json, update_count FROM tool_biases")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut count = 0;
        for row in rows {
            let (tool_name, bias, delta_json, update_count) = row?;
            if let (Some(json), true) = (&delta_json, self.config.enable_delta_vectors) {
                let delta: Vec<f64> = serde_json::from_str(json)
                    .with_context(|| format!("bad delta vector for {}", tool_name))?;
                self.deltas.insert(tool_name.clone(), delta);
            }
            self.biases.insert(tool_name.clone(), bias);
            self.update_counts.insert(tool_name, update_count as u64);
            count += 1;
        }
        if count > 0 {
            info!(count, "tool biases loaded");
        }
        Ok(())
    }

    /// Current bias for a tool, lazily initialized at zero.
    pub fn bias(&self, tool_name: &str) -> f64 {
        self.biases.get(tool_name).copied().unwrap_or(0.0)
    }

    pub fn delta(&self, tool_name: &str) -> Option<&[f64]> {
        if !self.config.enable_delta_vectors {
            return None;
        }
        self.deltas.get(tool_name).map(|d| d.as_slice())
    }

    /// Move the bias toward `reward * max_bias`, decay toward zero, clamp.
    /// Optionally update the delta vector from the query embedding.
    pub fn update(&mut self, tool_name: &str, reward: f64, query_embedding: Option<&[f64]>) {
        let current = self.bias(tool_name);
        let target = reward * self.config.max_bias;
        let mut new_bias = current + self.config.learning_rate * (target - current);
        new_bias *= 1.0 - self.config.decay_rate;
        new_bias = new_bias.clamp(-self.config.max_bias, self.config.max_bias);

        self.biases.insert(tool_name.to_string(), new_bias);
        *self.update_counts.entry(tool_name.to_string()).or_insert(0) += 1;

        if self.config.enable_delta_vectors {
            if let Some(embedding) = query_embedding {
                self.update_delta(tool_name, reward, embedding);
            }
        }

        self.updates_since_persist += 1;
        if self.updates_since_persist >= self.config.persist_every_n_updates {
            self.persist(tool_name);
        }

        debug!(tool = tool_name, old = current, new = new_bias, reward, "bias updated");
    }

    fn update_delta(&mut self, tool_name: &str, reward: f64, query_embedding: &[f64]) {
        if query_embedding.len() != self.config.embedding_dim {
            warn!(
                expected = self.config.embedding_dim,
                got = query_embedding.len(),
                "embedding dimension mismatch, delta update skipped"
            );
            return;
        }

        let delta = self
            .deltas
            .entry(tool_name.to_string())
            .or_insert_with(|| vec![0.0; self.config.embedding_dim]);

        for (d, q) in delta.iter_mut().zip(query_embedding) {
            let gradient = reward * q - self.config.delta_l2_reg * *d;
            *d += self.config.delta_learning_rate * gradient;
        }
    }

    /// Adjusted similarity: `base + bias + 0.1 * <q, delta> / ||q||`,
    /// clamped to [0, 1].
    pub fn adjust_similarity(
        &self,
        tool_name: &str,
        base_similarity: f64,
        query_embedding: Option<&[f64]>,
    ) -> f64 {
        let mut adjusted = base_similarity + self.bias(tool_name);

        if let (Some(delta), Some(query)) = (self.delta(tool_name), query_embedding) {
            let norm: f64 = query.iter().map(|q| q * q).sum::<f64>().sqrt();
            if norm > 0.0 {
                let dot: f64 = query.iter().zip(delta).map(|(q, d)| q * d).sum();
                adjusted += 0.1 * dot / norm;
            }
        }

        adjusted.clamp(0.0, 1.0)
    }

    fn persist(&mut self, tool_name: &str) {
        let Some(conn) = &self.conn else {
            return;
        };

        let bias = self.bias(tool_name);
        let update_count = self.update_counts.get(tool_name).copied().unwrap_or(0);
        let delta_json = self
            .deltas
            .get(tool_name)
            .and_then(|d| serde_json::to_string(d).ok());

        let result = conn.execute(
            r#"
            INSERT OR REPLACE INTO tool_biases
            (tool_name, bias, delta_vector_json, update_count, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                tool_name,
                bias,
                delta_json,
                update_count as i64,
                Utc::now().to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => self.updates_since_persist = 0,
            // In-memory state stays authoritative; the next cycle retries.
            Err(e) => warn!(tool = tool_name, error = %e, "bias persistence failed"),
        }
    }

    /// Persist every tracked tool, used at shutdown.
    pub fn flush(&mut self) {
        let names: Vec<String> = self.biases.keys().cloned().collect();
        for name in names {
            self.persist(&name);
        }
    }

    /// Tools with the strongest learned biases, descending when `positive`.
    pub fn top_biased(&self, n: usize, positive: bool) -> Vec<(String, f64)> {
        let mut entries: Vec<(String, f64)> =
            self.biases.iter().map(|(k, v)| (k.clone(), *v)).collect();
        if positive {
            entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        } else {
            entries.sort_by(|a, b| a.1.total_cmp(&b.1));
        }
        entries.truncate(n);
        entries
    }

    pub fn stats(&self) -> BiasStats {
        if self.biases.is_empty() {
            return BiasStats {
                tool_count: 0,
                mean_bias: 0.0,
                min_bias: 0.0,
                max_bias: 0.0,
                total_updates: 0,
                has_deltas: false,
            };
        }
        let values: Vec<f64> = self.biases.values().copied().collect();
        BiasStats {
            tool_count: values.len(),
            mean_bias: values.iter().sum::<f64>() / values.len() as f64,
            min_bias: values.iter().copied().fold(f64::INFINITY, f64::min),
            max_bias: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            total_updates: self.update_counts.values().sum(),
            has_deltas: !self.deltas.is_empty(),
        }
    }
}
