use thiserror::Error;

use super::types::Group;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Pool exhausted, pool closed or the database is unreachable.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed statement, constraint violation or an unreadable row.
    #[error("Operation error: {0}")]
    Operation(String),

    #[error("Decode error in {group} group: {message}")]
    Decode { group: Group, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn decode(group: Group, message: impl Into<String>) -> Self {
        Self::Decode {
            group,
            message: message.into(),
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::Connection(err.to_string()),
            other => Self::Operation(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
