use thiserror::Error;

/// Errors produced by the parley relay layer.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("buffer error: {0}")]
    Buffer(String),

    #[error("report error: {0}")]
    Report(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Report(e.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
