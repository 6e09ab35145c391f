use std::fmt;

/// Result type for toolgate-zoo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur at the index surface
#[derive(Debug)]
pub enum Error {
    /// Embedding computation failed
    Embedding(String),

    /// Vector segment or catalog storage failed
    Store(anyhow::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Embedding(msg) => write!(f, "Embedding error: {}", msg),
            Error::Store(err) => write!(f, "Store error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err.as_ref()),
            Error::Embedding(_) => None,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Store(err)
    }
}
