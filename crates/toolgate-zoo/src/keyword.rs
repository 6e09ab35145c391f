use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["the", "a", "an", "is", "are", "was", "were", "to", "of", "in", "for", "on"]
        .into_iter()
        .collect()
});

/// Tokenize for keyword matching: lowercase, split on non-alphanumeric,
/// drop stopwords and words of length <= 2. Returns the distinct set.
pub fn tokenize(text: &str) -> HashSet<String> {
    tokenize_ordered(text).into_iter().collect()
}

/// Same filter as [`tokenize`] but preserves order and duplicates, for
/// n-gram construction in the embedder.
pub(crate) fn tokenize_ordered(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Inverted keyword index: token -> tool names containing it.
#[derive(Debug, Default)]
pub(crate) struct KeywordIndex {
    postings: HashMap<String, HashSet<String>>,
}

impl KeywordIndex {
    pub fn index_tool(&mut self, tool_name: &str, text: &str) {
        for word in tokenize(text) {
            self.postings.entry(word).or_default().insert(tool_name.to_string());
        }
    }

    pub fn remove_tool(&mut self, tool_name: &str) {
        self.postings.retain(|_, names| {
            names.remove(tool_name);
            !names.is_empty()
        });
    }

    pub fn clear(&mut self) {
        self.postings.clear();
    }

    /// Score every tool by matched-token count / query-token count.
    pub fn search(&self, query: &str) -> Vec<(String, f64)> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut matches: HashMap<&str, usize> = HashMap::new();
        for token in &query_tokens {
            if let Some(names) = self.postings.get(token) {
                for name in names {
                    *matches.entry(name.as_str()).or_default() += 1;
                }
            }
        }

        let total = query_tokens.len() as f64;
        let mut scored: Vec<(String, f64)> = matches
            .into_iter()
            .map(|(name, count)| (name.to_string(), count as f64 / total))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_filters_short_and_stopwords() {
        let tokens = tokenize("Send an email to the boss");
        assert!(tokens.contains("send"));
        assert!(tokens.contains("email"));
        assert!(tokens.contains("boss"));
        assert!(!tokens.contains("an"));
        assert!(!tokens.contains("to"));
        assert!(!tokens.contains("the"));
    }

    #[test]
    fn test_keyword_search_scores_by_overlap() {
        let mut index = KeywordIndex::default();
        index.index_tool("email.send", "Send an email message email inbox");
        index.index_tool("stripe.charge", "Charge a payment card");

        let results = index.search("send email now");
        assert_eq!(results[0].0, "email.send");
        // "send" and "email" matched out of {send, email, now}
        assert!((results[0].1 - 2.0 / 3.0).abs() < 1e-9);
        assert!(!results.iter().any(|(name, _)| name == "stripe.charge"));
    }

    #[test]
    fn test_remove_tool_purges_postings() {
        let mut index = KeywordIndex::default();
        index.index_tool("email.send", "send email");
        index.remove_tool("email.send");
        assert!(index.search("send email").is_empty());
    }
}
