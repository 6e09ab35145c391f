// Connection pool for downstream MCP servers.
//
// Each configured server gets one long-lived owner task that holds the
// transport for the lifetime of the connection; every caller reaches the
// transport through the handle that task publishes. Dispatch goes through
// a per-server circuit breaker and a bounded retry loop.

mod breaker;
mod error;
mod http;
mod pool;
mod sse;
mod stdio;
mod transport;

pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use error::{Error, Result};
pub use http::StreamableHttpTransport;
pub use pool::{ConnectionPool, PoolConfig, ServerSnapshot};
pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use transport::{
    default_transport_factory, DownstreamConfig, RawTool, Transport, TransportFactory,
};
