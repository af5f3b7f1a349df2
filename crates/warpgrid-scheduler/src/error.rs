//! Scheduler error types.
//!
//! Only genuine infrastructure failures live here. A cluster that isn't
//! active, a lock that can't be acquired in time, or a deployment that
//! doesn't fit are not errors — they're [`crate::scheduler::Outcome`]
//! variants the caller is expected to handle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    State(#[from] warpgrid_state::StateError),

    #[error(transparent)]
    Lock(#[from] warpgrid_lock::LockError),

    #[error(transparent)]
    Queue(#[from] warpgrid_queue::QueueError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
