use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ExistenceCheck, SetExpiry, SetOptions};
use tracing::{debug, warn};

use crate::error::{LockError, LockResult};

const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Acquires a per-cluster mutex. Implemented by [`ClusterLock`]; fake
/// implementations back scheduler unit tests without a live Redis.
#[async_trait]
pub trait ClusterLockPort: Send + Sync {
    type Guard: LockGuardPort + Send;

    async fn acquire(
        &self,
        cluster_id: i64,
        ttl: Duration,
        wait_budget: Duration,
    ) -> LockResult<Self::Guard>;
}

/// A held mutex, released exactly once.
#[async_trait]
pub trait LockGuardPort {
    async fn release(self) -> LockResult<()>;
}

/// A distributed mutex keyed by cluster id, backed by Redis `SET NX EX`.
#[derive(Clone)]
pub struct ClusterLock {
    conn: ConnectionManager,
}

impl ClusterLock {
    pub async fn connect(redis_url: &str) -> LockResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    /// Acquire the mutex for `cluster_id`, polling every 500ms until
    /// `wait_budget` elapses. The lock auto-expires after `ttl` even if
    /// never explicitly released, bounding the damage from a crashed
    /// holder.
    pub async fn acquire(
        &self,
        cluster_id: i64,
        ttl: Duration,
        wait_budget: Duration,
    ) -> LockResult<LockGuard> {
        let key = format!("lock:cluster:{cluster_id}");
        let token: u64 = rand::thread_rng().gen();
        let token = token.to_string();
        let deadline = tokio::time::Instant::now() + wait_budget;
        let mut conn = self.conn.clone();

        let opts = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::EX(ttl.as_secs() as usize));

        loop {
            // Atomic SET key token NX EX ttl, mirroring a single Redis
            // round trip rather than a separate SETNX + EXPIRE that
            // could leave an un-expiring key if the process died between
            // the two calls.
            let acquired: bool = conn
                .set_options(&key, &token, opts.clone())
                .await
                .map(|reply: Option<String>| reply.is_some())
                .map_err(LockError::Redis)?;
            if acquired {
                debug!(cluster_id, %token, "cluster lock acquired");
                return Ok(LockGuard {
                    conn: self.conn.clone(),
                    key,
                    released: false,
                });
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(LockError::Unavailable(key));
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
}

/// Holds the mutex until explicitly released or dropped. Dropping
/// without calling [`LockGuard::release`] still frees the key — a
/// detached task issues the `DEL` — but callers should prefer the
/// explicit path so release happens before, not after, the next await
/// point picks up whatever work the lock was guarding.
pub struct LockGuard {
    conn: ConnectionManager,
    key: String,
    released: bool,
}

impl LockGuard {
    pub async fn release(mut self) -> LockResult<()> {
        self.do_release().await
    }

    async fn do_release(&mut self) -> LockResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let _: () = self.conn.del(&self.key).await.map_err(LockError::Redis)?;
        debug!(key = %self.key, "cluster lock released");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut conn = self.conn.clone();
        let key = self.key.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.del::<_, ()>(&key).await {
                warn!(error = %e, %key, "failed to release cluster lock on drop");
            }
        });
    }
}

#[async_trait]
impl ClusterLockPort for ClusterLock {
    type Guard = LockGuard;

    async fn acquire(
        &self,
        cluster_id: i64,
        ttl: Duration,
        wait_budget: Duration,
    ) -> LockResult<LockGuard> {
        ClusterLock::acquire(self, cluster_id, ttl, wait_budget).await
    }
}

#[async_trait]
impl LockGuardPort for LockGuard {
    async fn release(self) -> LockResult<()> {
        LockGuard::release(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_namespaced_by_cluster_id() {
        let cluster_id = 42i64;
        let key = format!("lock:cluster:{cluster_id}");
        assert_eq!(key, "lock:cluster:42");
    }
}
