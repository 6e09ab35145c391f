use serde::{Deserialize, Serialize};

/// Per-candidate scoring breakdown produced during one routing call.
///
/// Kept flat and serializable so the whole candidate set can be persisted
/// alongside the routing event for later evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub tool_name: String,
    /// Base semantic similarity from the vector search
    pub semantic_score: f64,
    #[serde(default)]
    pub keyword_score: f64,
    #[serde(default)]
    pub domain_match: bool,
    #[serde(default)]
    pub cooccurrence_boost: f64,
    #[serde(default)]
    pub bandit_score: f64,
    #[serde(default)]
    pub bias_adjustment: f64,
    #[serde(default)]
    pub final_score: f64,
    #[serde(default)]
    pub schema_tokens: usize,
}

impl Candidate {
    pub fn new(tool_name: impl Into<String>, semantic_score: f64) -> Self {
        Self {
            tool_name: tool_name.into(),
            semantic_score,
            keyword_score: 0.0,
            domain_match: false,
            cooccurrence_boost: 0.0,
            bandit_score: 0.0,
            bias_adjustment: 0.0,
            final_score: 0.0,
            schema_tokens: 0,
        }
    }
}

/// One tool accepted into a slate, with its selection score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedTool {
    pub tool_name: String,
    pub score: f64,
}

/// The outcome of one routing call: the ordered, budgeted subset of tools
/// the gateway will expose upstream. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slate {
    pub selected: Vec<SelectedTool>,
    /// Total schema-token budget consumed by the selection
    pub context_tokens_used: usize,
    /// Full scoring breakdown for every candidate considered
    pub candidates: Vec<Candidate>,
    pub exploration_triggered: bool,
    /// Routing query, truncated for storage
    pub query_used: String,
    pub strategy: String,
}

impl Slate {
    pub fn tool_names(&self) -> Vec<&str> {
        self.selected.iter().map(|s| s.tool_name.as_str()).collect()
    }

    pub fn contains(&self, tool_name: &str) -> bool {
        self.selected.iter().any(|s| s.tool_name == tool_name)
    }

    /// Rank of a tool within the slate, if selected.
    pub fn rank_of(&self, tool_name: &str) -> Option<usize> {
        self.selected.iter().position(|s| s.tool_name == tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slate_lookup() {
        let slate = Slate {
            selected: vec![
                SelectedTool {
                    tool_name: "email.send".to_string(),
                    score: 0.9,
                },
                SelectedTool {
                    tool_name: "calendar.create_event".to_string(),
                    score: 0.4,
                },
            ],
            context_tokens_used: 120,
            candidates: vec![],
            exploration_triggered: false,
            query_used: "user: send an email".to_string(),
            strategy: "sota".to_string(),
        };

        assert!(slate.contains("email.send"));
        assert!(!slate.contains("stripe.charge"));
        assert_eq!(slate.rank_of("calendar.create_event"), Some(1));
        assert_eq!(slate.rank_of("stripe.charge"), None);
        assert_eq!(slate.tool_names(), vec!["email.send", "calendar.create_event"]);
    }
}
