//! warpgrid-scheduler — the scheduling decision and the worker loop
//! that drives it.
//!
//! `SchedulerService::try_schedule` makes one deployment's placement
//! decision under a per-cluster distributed lock and a database
//! transaction; `WorkerLoop` pulls deployment ids off the queue and
//! calls it, re-enqueueing on anything but success.

pub mod error;
pub mod scheduler;
pub mod worker;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{Outcome, SchedulerService};
pub use worker::WorkerLoop;
