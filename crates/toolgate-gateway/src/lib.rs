// Gateway crate: configuration, orchestration glue, and the upstream
// JSON-RPC surface. All routing and dispatch decisions live in the
// component crates; this layer only wires them together.

pub mod config;
mod error;
mod gateway;
pub mod mcp;

pub use config::{Config, resolve_data_path};
pub use error::{Error, Result};
pub use gateway::{CallOutcome, Gateway};
pub use mcp::{run_stdio, McpServer};
