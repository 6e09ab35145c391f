// Online learning for tool routing.
//
// One shared logistic-linear model scores every candidate from a fixed
// feature vector (O(feature_dim) memory total, no per-tool matrices), and a
// per-tool scalar bias absorbs what the shared model cannot express.

mod bandit;
mod bias;
mod features;

pub use bandit::{BanditConfig, BanditScorer, BanditStats, ExplorationMode};
pub use bias::{BiasConfig, BiasStats, BiasStore};
pub use features::{FeatureExtractor, FEATURE_DIM, FEATURE_NAMES};
