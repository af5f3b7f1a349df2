//! warpgrid-state — the authoritative Postgres-backed store for clusters
//! and deployments.
//!
//! [`StateStore`] owns the connection pool; [`StoreTx`] wraps a single
//! transaction and exposes the row-locking reads the scheduler needs to
//! make a placement decision without racing another worker on the same
//! cluster.

pub mod error;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StateBackend, StateStore, StoreTx, StoreTxPort};
pub use types::*;
