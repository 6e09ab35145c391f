/// Number of features in the shared bandit model.
pub const FEATURE_DIM: usize = 7;

/// Feature order in the vector, for introspection and persistence.
pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "semantic_score",
    "keyword_score",
    "domain_match",
    "cooccurrence_boost",
    "success_rate",
    "latency_score",
    "schema_size_score",
];

/// Builds normalized feature vectors for routing candidates.
///
/// Every feature lands in [0, 1]; latency and schema size are inverted so
/// that higher is always better.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    pub latency_cap_ms: f64,
    pub schema_cap_tokens: f64,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self {
            latency_cap_ms: 5000.0,
            schema_cap_tokens: 1000.0,
        }
    }
}

impl FeatureExtractor {
    #[allow(clippy::too_many_arguments)]
    pub fn extract(
        &self,
        semantic_score: f64,
        keyword_score: f64,
        domain_match: bool,
        cooccurrence_boost: f64,
        success_rate: f64,
        latency_ms: f64,
        schema_tokens: usize,
    ) -> Vec<f64> {
        vec![
            semantic_score.clamp(0.0, 1.0),
            keyword_score.clamp(0.0, 1.0),
            if domain_match { 1.0 } else { 0.0 },
            cooccurrence_boost.clamp(0.0, 1.0),
            success_rate.clamp(0.0, 1.0),
            (1.0 - latency_ms / self.latency_cap_ms).clamp(0.0, 1.0),
            (1.0 - schema_tokens as f64 / self.schema_cap_tokens).clamp(0.0, 1.0),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_features_in_unit_range() {
        let extractor = FeatureExtractor::default();
        let features = extractor.extract(1.7, -0.3, true, 2.0, 0.9, 20_000.0, 50_000);
        assert_eq!(features.len(), FEATURE_DIM);
        assert!(features.iter().all(|f| (0.0..=1.0).contains(f)));
    }

    #[test]
    fn test_latency_and_schema_inverted() {
        let extractor = FeatureExtractor::default();
        let fast_small = extractor.extract(0.5, 0.0, false, 0.0, 0.5, 0.0, 0);
        let slow_big = extractor.extract(0.5, 0.0, false, 0.0, 0.5, 5000.0, 1000);
        assert_eq!(fast_small[5], 1.0);
        assert_eq!(fast_small[6], 1.0);
        assert_eq!(slow_big[5], 0.0);
        assert_eq!(slow_big[6], 0.0);
    }

    #[test]
    fn test_domain_match_binary() {
        let extractor = FeatureExtractor::default();
        assert_eq!(extractor.extract(0.0, 0.0, true, 0.0, 0.0, 0.0, 0)[2], 1.0);
        assert_eq!(extractor.extract(0.0, 0.0, false, 0.0, 0.0, 0.0, 0)[2], 0.0);
    }
}
