//! Error types for the WarpGrid state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid stored value: {0}")]
    Invalid(String),

    #[error("name already in use: {0}")]
    NameConflict(String),
}
