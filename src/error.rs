use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the store, the scrapers and the ingestion pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Network or auth failure reaching a platform. Re-running later may succeed.
    #[error("transport error from {platform}: {message}")]
    Transport { platform: String, message: String },

    /// The platform answered, but with something we cannot read.
    #[error("unparseable response from {platform}: {message}")]
    Parse { platform: String, message: String },

    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("{kind} not found: {reference}")]
    NotFound { kind: &'static str, reference: String },

    #[error("ambiguous {kind} prefix '{reference}' matched {count} rows")]
    Ambiguous {
        kind: &'static str,
        reference: String,
        count: usize,
    },

    /// Fatal at startup: the schema state is unknown.
    #[error("migration {file} failed: {message}")]
    Migration { file: String, message: String },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("fetch cancelled")]
    Cancelled,

    #[error("cannot parse {0:?} as a timestamp")]
    InvalidTimestamp(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error(transparent)]
    Database(rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn transport(platform: &str, message: impl ToString) -> Self {
        Error::Transport {
            platform: platform.to_string(),
            message: message.to_string(),
        }
    }

    pub fn parse(platform: &str, message: impl ToString) -> Self {
        Error::Parse {
            platform: platform.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether running the same operation again later could succeed without a code fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Timeout(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::ConstraintViolation(msg.unwrap_or_else(|| code.to_string()))
            }
            other => Error::Database(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
