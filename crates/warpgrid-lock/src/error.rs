//! Error types for the distributed cluster mutex.

use thiserror::Error;

pub type LockResult<T> = Result<T, LockError>;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("lock unavailable after waiting: {0}")]
    Unavailable(String),
}
