// spinwatch/src/error.rs
//
// Library error taxonomy. Unknown sessions and thin windows are not errors:
// they surface as `None` / `detected: false`. Only malformed input at the
// ingestion boundary and bad configuration are hard failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpinwatchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SpinwatchResult<T> = Result<T, SpinwatchError>;
