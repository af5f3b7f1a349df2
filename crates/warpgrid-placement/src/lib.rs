//! WarpGrid placement engine — decides whether a deployment fits a
//! cluster, directly or via preemption of lower-priority deployments.
//!
//! Pure value-in, value-out; the scheduler crate owns every database
//! read and write the decision here implies.

pub mod placer;

pub use placer::{compute_placement, Candidate, PlacementDecision};
