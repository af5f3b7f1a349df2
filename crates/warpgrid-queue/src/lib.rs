//! warpgrid-queue — the durable, delayable job queue that carries
//! deployments from "created" to "a worker attempted to schedule it".
//!
//! Jobs are keyed by `deployment:<id>`, so re-enqueuing the same
//! deployment (e.g. after a failed scheduling attempt) is idempotent —
//! it just refreshes that job's position rather than creating a
//! duplicate. Built on Redis primitives (a ready list, a delayed sorted
//! set, and per-state membership sets) standing in for the job
//! registries a Python RQ worker would use; see the module docs on
//! [`queue::JobQueue`] for the mapping.

pub mod error;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, JobState, QueuePort};
