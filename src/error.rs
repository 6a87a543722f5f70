use thiserror::Error;

/// Failures surfaced by the ingestion, query and liveness core.
///
/// "No data" is never an error here: resolvers return `Option::None` and the
/// HTTP layer decides how to present it.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing caller input. Not retryable.
    #[error("validation error: {0}")]
    Validation(String),

    /// The backing store could not be reached or did not answer in time.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A single stored device record is unusable. Callers iterating over many
    /// devices log this and move on.
    #[error("invalid record for device {device_key}: {reason}")]
    InvalidRecord { device_key: String, reason: String },
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
