//! warpgrid-lock — a Redis-backed per-cluster mutex.
//!
//! One scheduling decision per cluster must happen at a time: two
//! workers racing on the same cluster would both see the same "free
//! capacity" snapshot and could double-book it. `ClusterLock` serializes
//! decisions across worker processes using `SET key value NX EX ttl`.
//!
//! The lock value is a random token rather than a constant, which lets a
//! future version verify ownership before release (compare-and-delete).
//! Today, release is an unconditional `DEL` — if the TTL has already
//! expired and another worker has acquired the key, that worker's lock
//! is dropped early. This is a known, accepted gap: see the crate's
//! design notes on fencing.

pub mod error;
pub mod lock;

pub use error::{LockError, LockResult};
pub use lock::{ClusterLock, ClusterLockPort, LockGuard, LockGuardPort};
