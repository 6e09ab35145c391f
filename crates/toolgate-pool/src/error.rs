use std::fmt;

/// Result type for toolgate-pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur when dispatching to downstream servers
#[derive(Debug)]
pub enum Error {
    /// No server owns the requested tool (permanent, not retried)
    ToolNotFound(String),

    /// Server id is not in the pool
    ServerNotFound(String),

    /// Server exists but has no live session
    NotConnected(String),

    /// Circuit breaker is open for the server (not retried)
    CircuitOpen(String),

    /// Downstream call exceeded its deadline
    Timeout(String),

    /// Downstream server returned an error object
    Downstream(String),

    /// Transport-level failure (spawn, connect, framing)
    Transport(String),

    /// Malformed JSON-RPC traffic
    Protocol(String),
}

impl Error {
    /// Whether the retry loop may attempt again after this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ToolNotFound(_) | Error::ServerNotFound(_) | Error::CircuitOpen(_) => false,
            Error::NotConnected(_)
            | Error::Timeout(_)
            | Error::Downstream(_)
            | Error::Transport(_)
            | Error::Protocol(_) => true,
        }
    }

    /// Short class label used in telemetry records.
    pub fn class(&self) -> &'static str {
        match self {
            Error::ToolNotFound(_) => "tool_not_found",
            Error::ServerNotFound(_) => "server_not_found",
            Error::NotConnected(_) => "not_connected",
            Error::CircuitOpen(_) => "circuit_open",
            Error::Timeout(_) => "timeout",
            Error::Downstream(_) => "downstream_error",
            Error::Transport(_) => "transport_error",
            Error::Protocol(_) => "protocol_error",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ToolNotFound(name) => write!(f, "Tool not found: {}", name),
            Error::ServerNotFound(id) => write!(f, "Server not found: {}", id),
            Error::NotConnected(id) => write!(f, "Server not connected: {}", id),
            Error::CircuitOpen(id) => write!(
                f,
                "Circuit breaker is open for server {}. Too many consecutive failures. Will retry after timeout.",
                id
            ),
            Error::Timeout(msg) => write!(f, "Tool call timeout: {}", msg),
            Error::Downstream(msg) => write!(f, "Downstream error: {}", msg),
            Error::Transport(msg) => write!(f, "Transport error: {}", msg),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(!Error::ToolNotFound("x".into()).is_retryable());
        assert!(!Error::CircuitOpen("s".into()).is_retryable());
        assert!(Error::Timeout("t".into()).is_retryable());
        assert!(Error::NotConnected("s".into()).is_retryable());
        assert!(Error::Downstream("boom".into()).is_retryable());
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(Error::Timeout("t".into()).class(), "timeout");
        assert_eq!(Error::CircuitOpen("s".into()).class(), "circuit_open");
    }
}
