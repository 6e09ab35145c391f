// Telemetry - the event log behind online learning and evaluation.
// Raw query text is opt-in; the truncated query hash is always stored.

mod events;
mod reward;
mod store;

pub use events::{RewardSignal, RoutingEventRecord, ToolCallRecord, ToolStats};
pub use reward::RewardCalculator;
pub use store::{MetricsSummary, TelemetryStore};

pub use toolgate_types::short_hash as hash_query;
