use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ExistenceCheck, SetExpiry, SetOptions};
use tracing::debug;

use warp_core::DeploymentId;

use crate::error::QueueResult;

const READY_KEY: &str = "warpgrid:queue:ready";
const DELAYED_KEY: &str = "warpgrid:queue:delayed";
const STARTED_KEY: &str = "warpgrid:queue:started";
const FINISHED_KEY: &str = "warpgrid:queue:finished";
const FAILED_KEY: &str = "warpgrid:queue:failed";
const ACTIVE_PREFIX: &str = "warpgrid:queue:active:";

/// How long an `active` marker survives without being cleared by
/// `mark_finished`/`mark_failed`. Bounds how long a crashed worker can
/// wedge a job's idempotency guard before it's eligible to be
/// re-enqueued again (e.g. by a reconciliation sweep).
const ACTIVE_TTL_SECS: usize = 300;

/// Where a deployment's job currently sits, mirroring the registries a
/// Python RQ worker exposes (`queued`/`started`/`finished`/`failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Started,
    Finished,
    Failed,
    NotFound,
}

/// The queue operations the scheduler's worker loop needs. Implemented
/// by [`JobQueue`]; fake implementations back scheduler unit tests
/// without a live Redis.
#[async_trait]
pub trait QueuePort: Send + Sync {
    async fn enqueue(&self, deployment_id: DeploymentId, delay: Option<Duration>) -> QueueResult<()>;
    async fn retry_later(&self, deployment_id: DeploymentId, delay: Duration) -> QueueResult<()>;
    async fn dequeue(&self, wait: Duration) -> QueueResult<Option<DeploymentId>>;
    async fn mark_finished(&self, deployment_id: DeploymentId) -> QueueResult<()>;
    async fn mark_failed(&self, deployment_id: DeploymentId) -> QueueResult<()>;
}

/// A durable, at-least-once deployment queue.
#[derive(Clone)]
pub struct JobQueue {
    conn: ConnectionManager,
}

impl JobQueue {
    pub async fn connect(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    fn job_id(deployment_id: DeploymentId) -> String {
        format!("deployment:{deployment_id}")
    }

    fn active_key(job_id: &str) -> String {
        format!("{ACTIVE_PREFIX}{job_id}")
    }

    /// Enqueue a deployment for scheduling. `delay` of `None` or zero
    /// makes it immediately ready; otherwise it becomes ready once
    /// `delay` elapses. Idempotent by `job_id`: while the job already
    /// has a live `active` marker (queued, delayed, or started) a
    /// second enqueue is a no-op, per the original service's
    /// `job_id`-keyed dedup.
    pub async fn enqueue(&self, deployment_id: DeploymentId, delay: Option<Duration>) -> QueueResult<()> {
        let job_id = Self::job_id(deployment_id);
        let mut conn = self.conn.clone();

        let opts = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::EX(ACTIVE_TTL_SECS));
        let acquired: Option<String> = conn.set_options(Self::active_key(&job_id), "1", opts).await?;
        if acquired.is_none() {
            debug!(%job_id, "enqueue skipped, job already queued or running");
            return Ok(());
        }

        let _: () = conn.srem(FINISHED_KEY, &job_id).await?;
        let _: () = conn.srem(FAILED_KEY, &job_id).await?;

        match delay.filter(|d| !d.is_zero()) {
            Some(delay) => {
                let ready_at = now_secs() + delay.as_secs();
                let _: () = conn.zadd(DELAYED_KEY, &job_id, ready_at).await?;
                debug!(%job_id, delay_secs = delay.as_secs(), "deployment enqueued with delay");
            }
            None => {
                let _: () = conn.rpush(READY_KEY, &job_id).await?;
                debug!(%job_id, "deployment enqueued");
            }
        }
        Ok(())
    }

    /// Re-queue a job this worker just dequeued (e.g. on a `Deferred`
    /// outcome). Unlike [`JobQueue::enqueue`], this does not go through
    /// the idempotency guard: the job's `active` marker is already held
    /// from its original enqueue and hasn't been cleared, since the job
    /// hasn't reached a terminal state yet.
    pub async fn retry_later(&self, deployment_id: DeploymentId, delay: Duration) -> QueueResult<()> {
        let job_id = Self::job_id(deployment_id);
        let mut conn = self.conn.clone();

        let _: () = conn.srem(STARTED_KEY, &job_id).await?;
        if delay.is_zero() {
            let _: () = conn.rpush(READY_KEY, &job_id).await?;
        } else {
            let ready_at = now_secs() + delay.as_secs();
            let _: () = conn.zadd(DELAYED_KEY, &job_id, ready_at).await?;
        }
        debug!(%job_id, delay_secs = delay.as_secs(), "deployment requeued for retry");
        Ok(())
    }

    /// Move any delayed jobs whose time has come onto the ready list.
    /// Workers call this before popping so delayed re-enqueues actually
    /// surface.
    pub async fn promote_delayed(&self) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let due: Vec<String> = conn
            .zrangebyscore(DELAYED_KEY, 0, now_secs() as isize)
            .await?;
        for job_id in &due {
            let _: () = conn.zrem(DELAYED_KEY, job_id).await?;
            let _: () = conn.rpush(READY_KEY, job_id).await?;
        }
        Ok(due.len() as u64)
    }

    /// Pop the next ready deployment id, blocking up to `wait` for one
    /// to appear. Returns `None` on timeout.
    pub async fn dequeue(&self, wait: Duration) -> QueueResult<Option<DeploymentId>> {
        self.promote_delayed().await?;
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn.blpop(READY_KEY, wait.as_secs_f64()).await?;
        match popped {
            Some((_, job_id)) => {
                let _: () = conn.sadd(STARTED_KEY, &job_id).await?;
                Ok(parse_deployment_id(&job_id))
            }
            None => Ok(None),
        }
    }

    pub async fn mark_finished(&self, deployment_id: DeploymentId) -> QueueResult<()> {
        let job_id = Self::job_id(deployment_id);
        let mut conn = self.conn.clone();
        let _: () = conn.srem(STARTED_KEY, &job_id).await?;
        let _: () = conn.sadd(FINISHED_KEY, &job_id).await?;
        let _: () = conn.del(Self::active_key(&job_id)).await?;
        Ok(())
    }

    pub async fn mark_failed(&self, deployment_id: DeploymentId) -> QueueResult<()> {
        let job_id = Self::job_id(deployment_id);
        let mut conn = self.conn.clone();
        let _: () = conn.srem(STARTED_KEY, &job_id).await?;
        let _: () = conn.sadd(FAILED_KEY, &job_id).await?;
        let _: () = conn.del(Self::active_key(&job_id)).await?;
        Ok(())
    }

    pub async fn status(&self, deployment_id: DeploymentId) -> QueueResult<JobState> {
        let job_id = Self::job_id(deployment_id);
        let mut conn = self.conn.clone();

        if conn.sismember(STARTED_KEY, &job_id).await? {
            return Ok(JobState::Started);
        }
        if conn.sismember(FINISHED_KEY, &job_id).await? {
            return Ok(JobState::Finished);
        }
        if conn.sismember(FAILED_KEY, &job_id).await? {
            return Ok(JobState::Failed);
        }
        let delayed_score: Option<f64> = conn.zscore(DELAYED_KEY, &job_id).await?;
        if delayed_score.is_some() {
            return Ok(JobState::Queued);
        }
        let ready_list: Vec<String> = conn.lrange(READY_KEY, 0, -1).await?;
        if ready_list.iter().any(|j| j == &job_id) {
            return Ok(JobState::Queued);
        }
        Ok(JobState::NotFound)
    }
}

#[async_trait]
impl QueuePort for JobQueue {
    async fn enqueue(&self, deployment_id: DeploymentId, delay: Option<Duration>) -> QueueResult<()> {
        JobQueue::enqueue(self, deployment_id, delay).await
    }

    async fn retry_later(&self, deployment_id: DeploymentId, delay: Duration) -> QueueResult<()> {
        JobQueue::retry_later(self, deployment_id, delay).await
    }

    async fn dequeue(&self, wait: Duration) -> QueueResult<Option<DeploymentId>> {
        JobQueue::dequeue(self, wait).await
    }

    async fn mark_finished(&self, deployment_id: DeploymentId) -> QueueResult<()> {
        JobQueue::mark_finished(self, deployment_id).await
    }

    async fn mark_failed(&self, deployment_id: DeploymentId) -> QueueResult<()> {
        JobQueue::mark_failed(self, deployment_id).await
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn parse_deployment_id(job_id: &str) -> Option<DeploymentId> {
    job_id.strip_prefix("deployment:")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_format_matches_original_convention() {
        assert_eq!(JobQueue::job_id(42), "deployment:42");
    }

    #[test]
    fn parse_deployment_id_round_trips() {
        assert_eq!(parse_deployment_id("deployment:42"), Some(42));
        assert_eq!(parse_deployment_id("garbage"), None);
    }

    #[test]
    fn active_key_is_namespaced_by_job_id() {
        assert_eq!(
            JobQueue::active_key("deployment:42"),
            "warpgrid:queue:active:deployment:42"
        );
    }
}
