use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrashError {
    #[error("crash info: {0} not found")]
    NotFound(String),

    #[error("malformed crash metadata: {0}")]
    MalformedMetadata(String),

    #[error("invalid crash timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("invalid keep value {0}: must be a number of days between 0 and 36500")]
    InvalidKeep(i64),

    #[error("self test failed: {0}")]
    SelfTest(String),
}
