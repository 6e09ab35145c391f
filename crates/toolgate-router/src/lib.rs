// Routing pipeline - decides which tools a session sees.
//
// Retrieve candidates from the zoo, rerank with domain/tag/recency boosts
// plus learned bandit and bias scores, then fill a token-budgeted slate.
// Routing never fails upstream: scorer faults degrade to zeroed features.

mod cooccur;
mod domains;
mod router;

pub use cooccur::{CooccurrenceTracker, LearningStats};
pub use domains::detect_domains;
pub use router::{Router, RouterConfig, RoutingContext, RoutingMode, RoutingOutcome, Strategy};
