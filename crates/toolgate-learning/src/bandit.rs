use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::features::FEATURE_DIM;

/// Exploration strategy for slate scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationMode {
    Epsilon,
    Thompson,
}

#[derive(Debug, Clone)]
pub struct BanditConfig {
    pub feature_dim: usize,
    pub learning_rate: f64,
    pub l2_regularization: f64,
    pub exploration: ExplorationMode,
    pub epsilon: f64,
    pub thompson_scale: f64,
    pub persist_every_n_updates: u64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            feature_dim: FEATURE_DIM,
            learning_rate: 0.01,
            l2_regularization: 0.001,
            exploration: ExplorationMode::Epsilon,
            epsilon: 0.1,
            thompson_scale: 0.1,
            persist_every_n_updates: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BanditStats {
    pub update_count: u64,
    pub weight_mean: f64,
    pub weight_std: f64,
    pub bias: f64,
    pub feature_dim: usize,
    pub exploration: ExplorationMode,
}

/// Shared logistic-linear scorer over candidate feature vectors.
///
/// All tools share one weight vector; tools are distinguished by their
/// features, not their identity. A single SGD step per observed reward,
/// weights persisted every N updates.
pub struct BanditScorer {
    config: BanditConfig,
    weights: Vec<f64>,
    bias: f64,
    /// Per-feature squared-sum pseudo-counts for Thompson uncertainty
    feature_sum_sq: Vec<f64>,
    update_count: u64,
    updates_since_persist: u64,
    conn: Option<Connection>,
}

impl BanditScorer {
    pub fn open(db_path: &Path, config: BanditConfig) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open learning store: {}", db_path.display()))?;
        // The bias store may share this database file.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let mut scorer = Self::from_connection(Some(conn), config)?;
        scorer.load_weights()?;
        Ok(scorer)
    }

    /// Ephemeral scorer with no persistence, for tests and memory-only mode.
    pub fn in_memory(config: BanditConfig) -> Self {
        Self::new_state(None, config)
    }

    fn from_connection(conn: Option<Connection>, config: BanditConfig) -> Result<Self> {
        if let Some(conn) = &conn {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS bandit_weights (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    weights_json TEXT NOT NULL,
                    bias REAL NOT NULL,
                    feature_sum_sq_json TEXT NOT NULL,
                    update_count INTEGER NOT NULL,
                    last_updated TEXT NOT NULL
                );
                "#,
            )?;
        }
        Ok(Self::new_state(conn, config))
    }

    fn new_state(conn: Option<Connection>, config: BanditConfig) -> Self {
        Self {
            weights: vec![0.0; config.feature_dim],
            bias: 0.0,
            feature_sum_sq: vec![1.0; config.feature_dim],
            update_count: 0,
            updates_since_persist: 0,
            conn,
            config,
        }
    }

    fn load_weights(&mut self) -> Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };

        let row: Option<(String, f64, String, i64)> = conn
            .query_row(
                "SELECT weights_json, bias, feature_sum_sq_json, update_count FROM bandit_weights WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        if let Some((weights_json, bias, sum_sq_json, update_count)) = row {
            self.weights =
                serde_json::from_str(&weights_json).context("bad persisted weight vector")?;
            self.feature_sum_sq =
                serde_json::from_str(&sum_sq_json).context("bad persisted feature sums")?;
            self.bias = bias;
            self.update_count = update_count as u64;
            self.weights.resize(self.config.feature_dim, 0.0);
            self.feature_sum_sq.resize(self.config.feature_dim, 1.0);
            info!(update_count = self.update_count, "bandit weights loaded");
        }
        Ok(())
    }

    fn persist(&mut self) {
        let Some(conn) = &self.conn else {
            return;
        };

        let result = (|| -> Result<()> {
            let weights_json = serde_json::to_string(&self.weights)?;
            let sum_sq_json = serde_json::to_string(&self.feature_sum_sq)?;
            conn.execute(
                r#"
                INSERT OR REPLACE INTO bandit_weights
                (id, weights_json, bias, feature_sum_sq_json, update_count, last_updated)
                VALUES (1, ?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    weights_json,
                    self.bias,
                    sum_sq_json,
                    self.update_count as i64,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })();

        match result {
            Ok(()) => self.updates_since_persist = 0,
            // In-memory state stays authoritative; the next cycle retries.
            Err(e) => warn!(error = %e, "bandit weight persistence failed"),
        }
    }

    /// Zero-pad or truncate a mismatched feature vector, with a warning.
    fn conform(&self, features: &[f64]) -> Vec<f64> {
        if features.len() == self.config.feature_dim {
            return features.to_vec();
        }
        warn!(
            expected = self.config.feature_dim,
            got = features.len(),
            "feature dimension mismatch"
        );
        let mut padded = features.to_vec();
        padded.resize(self.config.feature_dim, 0.0);
        padded
    }

    fn logit(&self, features: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias
    }

    fn sigmoid(raw: f64) -> f64 {
        1.0 / (1.0 + (-raw).exp())
    }

    /// Score in (0, 1): sigma(w . x + b).
    pub fn score(&self, features: &[f64]) -> f64 {
        let features = self.conform(features);
        Self::sigmoid(self.logit(&features))
    }

    /// Score with the configured exploration strategy.
    ///
    /// Returns `(score, exploration_triggered)`. Epsilon-greedy adds uniform
    /// noise in [-0.3, 0.3] with probability epsilon; Thompson samples
    /// weights from the approximate posterior and always counts as
    /// exploration.
    pub fn score_with_exploration(&self, features: &[f64]) -> (f64, bool) {
        let features = self.conform(features);
        let mut rng = rand::thread_rng();

        match self.config.exploration {
            ExplorationMode::Epsilon => {
                let base = Self::sigmoid(self.logit(&features));
                if rng.gen::<f64>() < self.config.epsilon {
                    (base + rng.gen_range(-0.3..0.3), true)
                } else {
                    (base, false)
                }
            }
            ExplorationMode::Thompson => {
                let mut sampled_logit = self.bias;
                for ((w, x), sum_sq) in
                    self.weights.iter().zip(&features).zip(&self.feature_sum_sq)
                {
                    let uncertainty = self.config.thompson_scale * (1.0 / (sum_sq + 1e-8)).sqrt();
                    let sampled_w = match Normal::new(*w, uncertainty) {
                        Ok(dist) => dist.sample(&mut rng),
                        Err(_) => *w,
                    };
                    sampled_logit += sampled_w * x;
                }
                (Self::sigmoid(sampled_logit), true)
            }
        }
    }

    /// One SGD step with L2 regularization from an observed reward in
    /// [-1, +1].
    pub fn update(&mut self, features: &[f64], reward: f64) {
        let features = self.conform(features);

        let predicted = Self::sigmoid(self.logit(&features));
        let target = (reward + 1.0) / 2.0;
        let error = predicted - target;

        for (i, x) in features.iter().enumerate() {
            let gradient = error * x + self.config.l2_regularization * self.weights[i];
            self.weights[i] -= self.config.learning_rate * gradient;
            self.feature_sum_sq[i] += x * x;
        }
        self.bias -= self.config.learning_rate * error;
        self.update_count += 1;

        self.updates_since_persist += 1;
        if self.updates_since_persist >= self.config.persist_every_n_updates {
            self.persist();
        }
    }

    pub fn stats(&self) -> BanditStats {
        let n = self.weights.len() as f64;
        let mean = self.weights.iter().sum::<f64>() / n;
        let variance = self.weights.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / n;
        BanditStats {
            update_count: self.update_count,
            weight_mean: mean,
            weight_std: variance.sqrt(),
            bias: self.bias,
            feature_dim: self.config.feature_dim,
            exploration: self.config.exploration,
        }
    }

    pub fn reset(&mut self) {
        self.weights = vec![0.0; self.config.feature_dim];
        self.bias = 0.0;
        self.feature_sum_sq = vec![1.0; self.config.feature_dim];
        self.update_count = 0;
        self.persist();
        info!("bandit reset");
    }

    /// Force a persistence cycle, used at shutdown.
    pub fn flush(&mut self) {
        self.persist();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> Vec<f64> {
        vec![0.5, 0.3, 1.0, 0.1, 0.8, 0.5, 0.6]
    }

    #[test]
    fn test_untrained_score_is_half() {
        let scorer = BanditScorer::in_memory(BanditConfig::default());
        let score = scorer.score(&features());
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_positive_rewards_increase_score() {
        let mut scorer = BanditScorer::in_memory(BanditConfig::default());
        let x = features();
        let before = scorer.score(&x);
        for _ in 0..20 {
            scorer.update(&x, 1.0);
        }
        let after = scorer.score(&x);
        assert!(after > before);
    }

    #[test]
    fn test_negative_rewards_decrease_score() {
        let mut scorer = BanditScorer::in_memory(BanditConfig::default());
        let x = features();
        let before = scorer.score(&x);
        for _ in 0..20 {
            scorer.update(&x, -1.0);
        }
        assert!(scorer.score(&x) < before);
    }

    #[test]
    fn test_score_strictly_increases_under_repeated_positive_updates() {
        let mut scorer = BanditScorer::in_memory(BanditConfig::default());
        let x = features();
        let mut last = scorer.score(&x);
        for _ in 0..10 {
            scorer.update(&x, 1.0);
            let next = scorer.score(&x);
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_short_vector_zero_padded() {
        let scorer = BanditScorer::in_memory(BanditConfig::default());
        let score = scorer.score(&[0.5, 0.5]);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_epsilon_zero_never_explores() {
        let config = BanditConfig {
            epsilon: 0.0,
            ..Default::default()
        };
        let scorer = BanditScorer::in_memory(config);
        for _ in 0..50 {
            let (_, explored) = scorer.score_with_exploration(&features());
            assert!(!explored);
        }
    }

    #[test]
    fn test_epsilon_one_always_explores() {
        let config = BanditConfig {
            epsilon: 1.0,
            ..Default::default()
        };
        let scorer = BanditScorer::in_memory(config);
        let (_, explored) = scorer.score_with_exploration(&features());
        assert!(explored);
    }

    #[test]
    fn test_thompson_always_flags_exploration() {
        let config = BanditConfig {
            exploration: ExplorationMode::Thompson,
            ..Default::default()
        };
        let scorer = BanditScorer::in_memory(config);
        let (score, explored) = scorer.score_with_exploration(&features());
        assert!(explored);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_weights_persist_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("bandit.db");

        let config = BanditConfig {
            persist_every_n_updates: 1,
            ..Default::default()
        };
        let x = features();

        let trained_score = {
            let mut scorer = BanditScorer::open(&db_path, config.clone()).unwrap();
            for _ in 0..10 {
                scorer.update(&x, 1.0);
            }
            scorer.score(&x)
        };

        let reopened = BanditScorer::open(&db_path, config).unwrap();
        assert_eq!(reopened.update_count, 10);
        assert!((reopened.score(&x) - trained_score).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let mut scorer = BanditScorer::in_memory(BanditConfig::default());
        let x = features();
        for _ in 0..5 {
            scorer.update(&x, 1.0);
        }
        scorer.reset();
        assert_eq!(scorer.stats().update_count, 0);
        assert!((scorer.score(&x) - 0.5).abs() < 1e-9);
    }
}
