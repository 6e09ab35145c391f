use std::fmt;

/// Result type for toolgate-gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the gateway layer
#[derive(Debug)]
pub enum Error {
    /// Configuration error; fatal at startup
    Config(String),

    /// Tool index layer error
    Zoo(toolgate_zoo::Error),

    /// Telemetry layer error
    Telemetry(anyhow::Error),

    /// Learning layer error
    Learning(anyhow::Error),

    /// Session layer error
    Session(anyhow::Error),

    /// Downstream dispatch error
    Pool(toolgate_pool::Error),

    /// IO operation failed
    Io(std::io::Error),

    /// Unexpected runtime failure (worker panic, channel loss)
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Zoo(err) => write!(f, "Tool index error: {}", err),
            Error::Telemetry(err) => write!(f, "Telemetry error: {}", err),
            Error::Learning(err) => write!(f, "Learning error: {}", err),
            Error::Session(err) => write!(f, "Session error: {}", err),
            Error::Pool(err) => write!(f, "{}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Zoo(err) => Some(err),
            Error::Telemetry(err) | Error::Learning(err) | Error::Session(err) => {
                Some(err.as_ref())
            }
            Error::Pool(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Config(_) | Error::Internal(_) => None,
        }
    }
}

impl From<toolgate_zoo::Error> for Error {
    fn from(err: toolgate_zoo::Error) -> Self {
        Error::Zoo(err)
    }
}

impl From<toolgate_pool::Error> for Error {
    fn from(err: toolgate_pool::Error) -> Self {
        Error::Pool(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
