use std::collections::HashMap;

use serde::Serialize;

/// One prediction-vs-usage observation.
#[derive(Debug, Clone)]
struct UsageRecord {
    precision: f64,
    recall: f64,
}

/// Aggregate view of what the router has learned from usage.
#[derive(Debug, Clone, Serialize)]
pub struct LearningStats {
    pub predictions: usize,
    pub avg_precision: f64,
    pub avg_recall: f64,
    pub cooccurrence_pairs: usize,
}

/// Symmetric co-occurrence counts over tools the client used together
/// after one slate, plus precision/recall bookkeeping per prediction.
#[derive(Debug, Default)]
pub struct CooccurrenceTracker {
    counts: HashMap<String, HashMap<String, u64>>,
    history: Vec<UsageRecord>,
}

impl CooccurrenceTracker {
    pub fn record_usage(&mut self, predicted: &[String], used: &[String]) {
        let hits = used.iter().filter(|u| predicted.contains(u)).count() as f64;
        let precision = if predicted.is_empty() {
            0.0
        } else {
            hits / predicted.len() as f64
        };
        let recall = if used.is_empty() {
            1.0
        } else {
            hits / used.len() as f64
        };
        self.history.push(UsageRecord { precision, recall });

        for tool_a in used {
            for tool_b in used {
                if tool_a != tool_b {
                    *self
                        .counts
                        .entry(tool_a.clone())
                        .or_default()
                        .entry(tool_b.clone())
                        .or_insert(0) += 1;
                }
            }
        }
    }

    /// Tools that most often co-occur with `tool_name`, descending.
    pub fn cooccurring(&self, tool_name: &str, top_k: usize) -> Vec<String> {
        let Some(partners) = self.counts.get(tool_name) else {
            return Vec::new();
        };
        let mut sorted: Vec<(&String, &u64)> = partners.iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        sorted.into_iter().take(top_k).map(|(name, _)| name.clone()).collect()
    }

    /// Boost map from recently used tools: +0.1 per recent tool each
    /// candidate co-occurs with.
    pub fn boosts_for(&self, recent_tools: &[String]) -> HashMap<String, f64> {
        let mut boosts: HashMap<String, f64> = HashMap::new();
        for recent in recent_tools {
            for partner in self.cooccurring(recent, 3) {
                *boosts.entry(partner).or_insert(0.0) += 0.1;
            }
        }
        boosts
    }

    pub fn stats(&self) -> LearningStats {
        let n = self.history.len();
        let (avg_precision, avg_recall) = if n == 0 {
            (0.0, 0.0)
        } else {
            (
                self.history.iter().map(|r| r.precision).sum::<f64>() / n as f64,
                self.history.iter().map(|r| r.recall).sum::<f64>() / n as f64,
            )
        };
        LearningStats {
            predictions: n,
            avg_precision,
            avg_recall,
            cooccurrence_pairs: self.counts.values().map(|m| m.len()).sum(),
        }
    }
}
