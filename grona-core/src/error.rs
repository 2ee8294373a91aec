use thiserror::Error;

/// Error taxonomy of the planning engine.
///
/// Per-candidate failures are swallowed close to where they occur and only
/// degrade the result set; everything surfacing through this enum is a
/// per-request failure.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no greenness data for month {0}")]
    NoDataForMonth(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
