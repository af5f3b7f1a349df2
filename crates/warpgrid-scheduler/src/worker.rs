//! WorkerLoop — pulls deployment ids off the queue and asks the
//! scheduler to place them, re-enqueueing on anything but a final
//! outcome.
//!
//! Shaped after the autoscaler's `run` loop elsewhere in this
//! workspace: a `tokio::select!` between the next unit of work and a
//! `watch::Receiver<bool>` shutdown signal, so the binary can drive
//! graceful shutdown the same way across every background task.

use std::time::Duration;

use tracing::{error, info, warn};

use warpgrid_lock::ClusterLockPort;
use warpgrid_queue::QueuePort;
use warpgrid_state::{DeploymentStatus, StateBackend};

use crate::error::SchedulerError;
use crate::scheduler::{Outcome, SchedulerService};

pub struct WorkerLoop<S, L, Q> {
    scheduler: SchedulerService<S, L, Q>,
    queue: Q,
    store: S,
    poll_timeout: Duration,
    retry_delay: Duration,
}

impl<S, L, Q> WorkerLoop<S, L, Q>
where
    S: StateBackend + Clone,
    L: ClusterLockPort,
    Q: QueuePort + Clone,
{
    pub fn new(
        scheduler: SchedulerService<S, L, Q>,
        queue: Q,
        store: S,
        poll_timeout: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            scheduler,
            queue,
            store,
            poll_timeout,
            retry_delay,
        }
    }

    /// Re-enqueue every `pending` deployment on process startup. Jobs
    /// can be lost from the queue (a worker crashing mid-dequeue, a
    /// Redis restart) without losing the row in Postgres, so a sweep
    /// over `pending` rows recovers them.
    pub async fn reconcile_on_startup(&self) -> Result<u64, SchedulerError> {
        let pending = self.store.list_status(DeploymentStatus::Pending).await?;
        for deployment_id in &pending {
            self.queue.enqueue(*deployment_id, None).await?;
        }
        info!(count = pending.len(), "reconciled pending deployments onto queue");
        Ok(pending.len() as u64)
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!("worker loop started");
        loop {
            tokio::select! {
                popped = self.queue.dequeue(self.poll_timeout) => {
                    match popped {
                        Ok(Some(deployment_id)) => self.process(deployment_id).await,
                        Ok(None) => {}
                        Err(e) => error!(error = %e, "queue dequeue failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("worker loop shutting down");
                    break;
                }
            }
        }
    }

    async fn process(&self, deployment_id: i64) {
        match self.scheduler.try_schedule(deployment_id).await {
            Ok(Outcome::Dropped) => {
                info!(deployment_id, "deployment dropped, acknowledging with no retry");
                if let Err(e) = self.queue.mark_finished(deployment_id).await {
                    warn!(error = %e, deployment_id, "failed to acknowledge dropped job");
                }
            }
            Ok(Outcome::Deferred) => {
                info!(deployment_id, "could not schedule, retrying later");
                if let Err(e) = self
                    .queue
                    .retry_later(deployment_id, self.retry_delay)
                    .await
                {
                    error!(error = %e, deployment_id, "failed to requeue deployment for retry");
                }
            }
            Ok(outcome) => {
                info!(deployment_id, ?outcome, "deployment scheduled");
                if let Err(e) = self.queue.mark_finished(deployment_id).await {
                    warn!(error = %e, deployment_id, "failed to mark job finished");
                }
            }
            Err(e) => {
                error!(error = %e, deployment_id, "scheduling failed");
                if let Err(e) = self.queue.mark_failed(deployment_id).await {
                    warn!(error = %e, deployment_id, "failed to mark job failed");
                }
            }
        }
    }
}
