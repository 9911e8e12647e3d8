//! Error taxonomy for timetable, session and attendance operations.

use crate::models::SessionStatus;
use diesel::result::DatabaseErrorKind;
use thiserror::Error;

/// Result type for attendance operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input, rejected before touching the database.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A schedule overlap or a duplicate session. The message names the colliding entity.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The session's current state does not allow the requested change.
    #[error("Session is {current}: {message}")]
    InvalidState {
        current: SessionStatus,
        message: String,
    },

    /// The caller is not allowed to perform the operation.
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i32 },

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn not_found(entity: &'static str, id: i32) -> Self {
        Error::NotFound { entity, id }
    }

    /// Whether the failure is transient and the caller may try again.
    ///
    /// This covers lost connections and SQLite giving up on a locked database after its busy
    /// timeout. Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        if self.is_connection_lost() {
            return true;
        }
        match self {
            Error::Database(diesel::result::Error::DatabaseError(_, info)) => {
                let message = info.message();
                message.contains("database is locked") || message.contains("database is busy")
            }
            _ => false,
        }
    }

    /// Whether the connection that produced the error can no longer be used.
    pub(crate) fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Database(
                    diesel::result::Error::DatabaseError(DatabaseErrorKind::ClosedConnection, _)
                        | diesel::result::Error::BrokenTransactionManager
                )
        )
    }

    /// Whether the error came from a unique constraint in the database.
    pub(crate) fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Error::Database(diesel::result::Error::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                _
            ))
        )
    }
}
