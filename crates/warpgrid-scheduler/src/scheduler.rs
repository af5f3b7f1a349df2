//! Scheduler — decides whether a deployment can run now, and if so,
//! commits that decision (plus any preemptions it required) atomically.
//!
//! `try_schedule` is the single entry point. Steps, each grounded on the
//! shape of the original service's `try_schedule_deployment`:
//!
//! 1. Short-circuit if the deployment is already `running`.
//! 2. Load the cluster; if it isn't `active`, evict the deployment and
//!    stop — there is nothing to retry, the cluster is gone for good.
//! 3. Acquire the per-cluster distributed mutex (bounded wait); if the
//!    wait budget runs out, defer for a later retry.
//! 4. Inside one database transaction, row-lock the cluster, the
//!    deployment, and every `running` deployment on that cluster, and
//!    re-check the cluster is still active now that we hold the lock.
//! 5. Ask the placement engine for a verdict.
//! 6. On admission, mark any preempted deployments `pending` and
//!    re-enqueue them with a delay, mark this deployment `running`, and
//!    commit. On rejection, the transaction rolls back untouched and the
//!    caller is told to defer.
//!
//! The lock is released once the transaction outcome is known, whether
//! that's commit or rollback.

use std::time::Duration;

use tracing::{info, warn};

use warp_core::{ClusterId, DeploymentId};
use warpgrid_lock::ClusterLockPort;
use warpgrid_placement::{compute_placement, Candidate, PlacementDecision};
use warpgrid_queue::QueuePort;
use warpgrid_state::{ClusterStatus, DeploymentStatus, StateBackend, StoreTxPort};

use crate::error::SchedulerResult;

/// What happened when the scheduler tried to place a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Admitted — already running, or admitted without preempting
    /// anything.
    Scheduled,
    /// Admitted by evicting other deployments, which were set back to
    /// `pending` and re-enqueued.
    ScheduledWithPreemption { evicted: usize },
    /// Could not be placed right now (no capacity, or the cluster lock
    /// could not be acquired in time); the caller should retry later.
    Deferred,
    /// Will never be placed — the cluster is gone. The deployment was
    /// moved to `evicted` and must not be retried.
    Dropped,
}

pub struct SchedulerService<S, L, Q> {
    store: S,
    lock: L,
    queue: Q,
    mutex_ttl: Duration,
    mutex_wait_budget: Duration,
    retry_delay: Duration,
}

impl<S, L, Q> SchedulerService<S, L, Q>
where
    S: StateBackend,
    L: ClusterLockPort,
    Q: QueuePort,
{
    pub fn new(
        store: S,
        lock: L,
        queue: Q,
        mutex_ttl: Duration,
        mutex_wait_budget: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            lock,
            queue,
            mutex_ttl,
            mutex_wait_budget,
            retry_delay,
        }
    }

    pub async fn try_schedule(&self, deployment_id: DeploymentId) -> SchedulerResult<Outcome> {
        let deployment = self.store.get_deployment(deployment_id).await?;
        if deployment.status == DeploymentStatus::Running {
            return Ok(Outcome::Scheduled);
        }

        let cluster = self.store.get_cluster(deployment.cluster_id).await?;
        if cluster.status != ClusterStatus::Active {
            return self.drop_for_inactive_cluster(deployment_id).await;
        }

        let guard = match self
            .lock
            .acquire(cluster.id, self.mutex_ttl, self.mutex_wait_budget)
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                info!(deployment_id, error = %e, "cluster lock unavailable, deferring");
                return Ok(Outcome::Deferred);
            }
        };

        let result = self.schedule_under_lock(deployment_id, cluster.id).await;

        if let Err(e) = guard.release().await {
            warn!(error = %e, cluster_id = cluster.id, "failed to release cluster lock");
        }

        result
    }

    /// The cluster was deleted out from under this deployment. There is
    /// no placement race to serialize here, just a status transition, so
    /// this skips the cluster mutex entirely.
    async fn drop_for_inactive_cluster(&self, deployment_id: DeploymentId) -> SchedulerResult<Outcome> {
        let mut tx = self.store.begin().await?;
        let deployment = tx.load_deployment_for_update(deployment_id).await?;
        if deployment.status == DeploymentStatus::Running {
            tx.rollback().await?;
            return Ok(Outcome::Scheduled);
        }

        tx.set_status(deployment_id, DeploymentStatus::Evicted).await?;
        tx.commit().await?;
        info!(deployment_id, "cluster not active, dropping deployment");
        Ok(Outcome::Dropped)
    }

    async fn schedule_under_lock(
        &self,
        deployment_id: DeploymentId,
        cluster_id: ClusterId,
    ) -> SchedulerResult<Outcome> {
        let mut tx = self.store.begin().await?;

        let cluster = tx.load_cluster_for_update(cluster_id).await?;
        if cluster.status != ClusterStatus::Active {
            tx.rollback().await?;
            return self.drop_for_inactive_cluster(deployment_id).await;
        }

        let deployment = tx.load_deployment_for_update(deployment_id).await?;
        if deployment.status == DeploymentStatus::Running {
            tx.rollback().await?;
            return Ok(Outcome::Scheduled);
        }

        let running = tx.load_running_for_update(cluster_id).await?;
        let candidates: Vec<Candidate> = running
            .iter()
            .map(|d| Candidate {
                id: d.id,
                resources: d.resources,
                priority: d.priority,
            })
            .collect();

        let decision = compute_placement(
            deployment.resources,
            deployment.priority,
            cluster.capacity,
            &candidates,
        );

        let outcome = match decision {
            PlacementDecision::Reject => {
                tx.rollback().await?;
                info!(deployment_id, "no capacity even with preemption, deferring");
                return Ok(Outcome::Deferred);
            }
            PlacementDecision::Admit => {
                tx.set_status(deployment_id, DeploymentStatus::Running).await?;
                tx.commit().await?;
                Outcome::Scheduled
            }
            PlacementDecision::AdmitWithPreemption { preempt } => {
                for victim_id in &preempt {
                    tx.set_status(*victim_id, DeploymentStatus::Pending).await?;
                }
                tx.set_status(deployment_id, DeploymentStatus::Running).await?;
                tx.commit().await?;

                for victim_id in &preempt {
                    self.queue
                        .enqueue(*victim_id, Some(self.retry_delay))
                        .await?;
                }
                info!(deployment_id, evicted = preempt.len(), "scheduled with preemption");
                Outcome::ScheduledWithPreemption {
                    evicted: preempt.len(),
                }
            }
        };

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use warp_core::{Priority, Resources};
    use warpgrid_lock::{LockError, LockGuardPort, LockResult};
    use warpgrid_queue::QueueResult;
    use warpgrid_state::{Cluster, Deployment, StateError, StateResult};

    use super::*;

    #[derive(Default)]
    struct FakeWorld {
        clusters: HashMap<ClusterId, Cluster>,
        deployments: HashMap<DeploymentId, Deployment>,
    }

    #[derive(Clone)]
    struct FakeStore {
        world: std::sync::Arc<Mutex<FakeWorld>>,
    }

    impl FakeStore {
        fn new(cluster: Cluster, deployments: Vec<Deployment>) -> Self {
            let mut world = FakeWorld::default();
            world.clusters.insert(cluster.id, cluster);
            for d in deployments {
                world.deployments.insert(d.id, d);
            }
            Self {
                world: std::sync::Arc::new(Mutex::new(world)),
            }
        }

        fn status_of(&self, id: DeploymentId) -> DeploymentStatus {
            self.world.lock().unwrap().deployments[&id].status
        }
    }

    struct FakeTx {
        world: std::sync::Arc<Mutex<FakeWorld>>,
    }

    #[async_trait]
    impl StateBackend for FakeStore {
        type Tx = FakeTx;

        async fn get_deployment(&self, id: DeploymentId) -> StateResult<Deployment> {
            self.world
                .lock()
                .unwrap()
                .deployments
                .get(&id)
                .cloned()
                .ok_or_else(|| StateError::NotFound(format!("deployment {id}")))
        }

        async fn get_cluster(&self, id: ClusterId) -> StateResult<Cluster> {
            self.world
                .lock()
                .unwrap()
                .clusters
                .get(&id)
                .cloned()
                .ok_or_else(|| StateError::NotFound(format!("cluster {id}")))
        }

        async fn list_status(&self, status: DeploymentStatus) -> StateResult<Vec<DeploymentId>> {
            Ok(self
                .world
                .lock()
                .unwrap()
                .deployments
                .values()
                .filter(|d| d.status == status)
                .map(|d| d.id)
                .collect())
        }

        async fn begin(&self) -> StateResult<FakeTx> {
            Ok(FakeTx {
                world: self.world.clone(),
            })
        }
    }

    #[async_trait]
    impl StoreTxPort for FakeTx {
        async fn load_cluster_for_update(&mut self, id: ClusterId) -> StateResult<Cluster> {
            self.world
                .lock()
                .unwrap()
                .clusters
                .get(&id)
                .cloned()
                .ok_or_else(|| StateError::NotFound(format!("cluster {id}")))
        }

        async fn load_deployment_for_update(&mut self, id: DeploymentId) -> StateResult<Deployment> {
            self.world
                .lock()
                .unwrap()
                .deployments
                .get(&id)
                .cloned()
                .ok_or_else(|| StateError::NotFound(format!("deployment {id}")))
        }

        async fn load_running_for_update(&mut self, cluster_id: ClusterId) -> StateResult<Vec<Deployment>> {
            Ok(self
                .world
                .lock()
                .unwrap()
                .deployments
                .values()
                .filter(|d| d.cluster_id == cluster_id && d.status == DeploymentStatus::Running)
                .cloned()
                .collect())
        }

        async fn set_status(&mut self, id: DeploymentId, status: DeploymentStatus) -> StateResult<()> {
            if let Some(d) = self.world.lock().unwrap().deployments.get_mut(&id) {
                d.status = status;
            }
            Ok(())
        }

        async fn commit(self) -> StateResult<()> {
            Ok(())
        }

        async fn rollback(self) -> StateResult<()> {
            Ok(())
        }
    }

    struct FakeLock;
    struct FakeGuard;

    #[async_trait]
    impl ClusterLockPort for FakeLock {
        type Guard = FakeGuard;

        async fn acquire(&self, _cluster_id: i64, _ttl: Duration, _wait_budget: Duration) -> LockResult<FakeGuard> {
            Ok(FakeGuard)
        }
    }

    #[async_trait]
    impl LockGuardPort for FakeGuard {
        async fn release(self) -> LockResult<()> {
            Ok(())
        }
    }

    struct UnavailableLock;

    #[async_trait]
    impl ClusterLockPort for UnavailableLock {
        type Guard = FakeGuard;

        async fn acquire(&self, cluster_id: i64, _ttl: Duration, _wait_budget: Duration) -> LockResult<FakeGuard> {
            Err(LockError::Unavailable(format!("lock:cluster:{cluster_id}")))
        }
    }

    #[derive(Default)]
    struct FakeQueue {
        enqueued: Mutex<Vec<(DeploymentId, Option<Duration>)>>,
    }

    #[async_trait]
    impl QueuePort for FakeQueue {
        async fn enqueue(&self, deployment_id: DeploymentId, delay: Option<Duration>) -> QueueResult<()> {
            self.enqueued.lock().unwrap().push((deployment_id, delay));
            Ok(())
        }

        async fn retry_later(&self, deployment_id: DeploymentId, delay: Duration) -> QueueResult<()> {
            self.enqueued.lock().unwrap().push((deployment_id, Some(delay)));
            Ok(())
        }

        async fn dequeue(&self, _wait: Duration) -> QueueResult<Option<DeploymentId>> {
            Ok(None)
        }

        async fn mark_finished(&self, _deployment_id: DeploymentId) -> QueueResult<()> {
            Ok(())
        }

        async fn mark_failed(&self, _deployment_id: DeploymentId) -> QueueResult<()> {
            Ok(())
        }
    }

    fn priority(v: u8) -> Priority {
        Priority::new(v).unwrap()
    }

    fn cluster(id: ClusterId, status: ClusterStatus, capacity: Resources) -> Cluster {
        Cluster {
            id,
            organisation_id: 1,
            name: format!("cluster-{id}"),
            capacity,
            status,
        }
    }

    fn deployment(id: DeploymentId, cluster_id: ClusterId, status: DeploymentStatus, resources: Resources, prio: u8) -> Deployment {
        Deployment {
            id,
            name: format!("deployment-{id}"),
            cluster_id,
            resources,
            priority: priority(prio),
            status,
        }
    }

    fn service(
        store: FakeStore,
        lock: impl ClusterLockPort,
        queue: FakeQueue,
    ) -> SchedulerService<FakeStore, impl ClusterLockPort, FakeQueue> {
        SchedulerService::new(
            store,
            lock,
            queue,
            Duration::from_secs(30),
            Duration::from_secs(1),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn already_running_is_idempotent() {
        let d = deployment(1, 10, DeploymentStatus::Running, Resources::raw(1, 1, 0), 3);
        let store = FakeStore::new(cluster(10, ClusterStatus::Active, Resources::raw(10, 10, 0)), vec![d]);
        let svc = service(store.clone(), FakeLock, FakeQueue::default());

        let first = svc.try_schedule(1).await.unwrap();
        let second = svc.try_schedule(1).await.unwrap();

        assert_eq!(first, Outcome::Scheduled);
        assert_eq!(second, Outcome::Scheduled);
        assert_eq!(store.status_of(1), DeploymentStatus::Running);
    }

    #[tokio::test]
    async fn inactive_cluster_evicts_and_drops_with_no_retry() {
        let d = deployment(1, 10, DeploymentStatus::Pending, Resources::raw(1, 1, 0), 3);
        let store = FakeStore::new(cluster(10, ClusterStatus::Deleted, Resources::raw(10, 10, 0)), vec![d]);
        let queue = FakeQueue::default();
        let svc = service(store.clone(), FakeLock, queue);

        let outcome = svc.try_schedule(1).await.unwrap();

        assert_eq!(outcome, Outcome::Dropped);
        assert_eq!(store.status_of(1), DeploymentStatus::Evicted);
    }

    #[tokio::test]
    async fn preempted_victims_go_back_to_pending_and_are_requeued() {
        let victim = deployment(1, 10, DeploymentStatus::Running, Resources::raw(9, 9, 0), 1);
        let incoming = deployment(2, 10, DeploymentStatus::Pending, Resources::raw(8, 8, 0), 5);
        let store = FakeStore::new(
            cluster(10, ClusterStatus::Active, Resources::raw(10, 10, 0)),
            vec![victim, incoming],
        );
        let svc = service(store.clone(), FakeLock, FakeQueue::default());

        let outcome = svc.try_schedule(2).await.unwrap();

        assert_eq!(outcome, Outcome::ScheduledWithPreemption { evicted: 1 });
        assert_eq!(store.status_of(1), DeploymentStatus::Pending);
        assert_eq!(store.status_of(2), DeploymentStatus::Running);
    }

    #[tokio::test]
    async fn lock_unavailable_defers_rather_than_errors() {
        let d = deployment(1, 10, DeploymentStatus::Pending, Resources::raw(1, 1, 0), 3);
        let store = FakeStore::new(cluster(10, ClusterStatus::Active, Resources::raw(10, 10, 0)), vec![d]);
        let svc = service(store, UnavailableLock, FakeQueue::default());

        let outcome = svc.try_schedule(1).await.unwrap();

        assert_eq!(outcome, Outcome::Deferred);
    }

    #[tokio::test]
    async fn no_capacity_even_with_preemption_defers() {
        let running = deployment(1, 10, DeploymentStatus::Running, Resources::raw(9, 9, 0), 5);
        let incoming = deployment(2, 10, DeploymentStatus::Pending, Resources::raw(20, 20, 0), 3);
        let store = FakeStore::new(
            cluster(10, ClusterStatus::Active, Resources::raw(10, 10, 0)),
            vec![running, incoming],
        );
        let svc = service(store.clone(), FakeLock, FakeQueue::default());

        let outcome = svc.try_schedule(2).await.unwrap();

        assert_eq!(outcome, Outcome::Deferred);
        assert_eq!(store.status_of(2), DeploymentStatus::Pending);
    }

    /// A lock double backed by a real `tokio::sync::Mutex`, so two
    /// concurrent `acquire` calls genuinely serialize rather than both
    /// succeeding immediately the way [`FakeLock`] does. Tracks the
    /// high-water mark of simultaneous holders.
    struct SerializingLock {
        mutex: std::sync::Arc<tokio::sync::Mutex<()>>,
        concurrent: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        max_seen: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    struct SerializingGuard {
        _held: tokio::sync::OwnedMutexGuard<()>,
        concurrent: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl ClusterLockPort for SerializingLock {
        type Guard = SerializingGuard;

        async fn acquire(&self, _cluster_id: i64, _ttl: Duration, wait_budget: Duration) -> LockResult<SerializingGuard> {
            use std::sync::atomic::Ordering;

            let held = tokio::time::timeout(wait_budget, self.mutex.clone().lock_owned())
                .await
                .map_err(|_| LockError::Unavailable("cluster".to_string()))?;
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            Ok(SerializingGuard {
                _held: held,
                concurrent: self.concurrent.clone(),
            })
        }
    }

    #[async_trait]
    impl LockGuardPort for SerializingGuard {
        async fn release(self) -> LockResult<()> {
            self.concurrent
                .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_schedule_calls_on_same_cluster_are_mutually_exclusive() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let d1 = deployment(1, 10, DeploymentStatus::Pending, Resources::raw(1, 1, 0), 3);
        let d2 = deployment(2, 10, DeploymentStatus::Pending, Resources::raw(1, 1, 0), 3);
        let store = FakeStore::new(
            cluster(10, ClusterStatus::Active, Resources::raw(10, 10, 0)),
            vec![d1, d2],
        );

        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let lock = SerializingLock {
            mutex: Arc::new(tokio::sync::Mutex::new(())),
            concurrent: concurrent.clone(),
            max_seen: max_seen.clone(),
        };

        let svc = Arc::new(SchedulerService::new(
            store,
            lock,
            FakeQueue::default(),
            Duration::from_secs(30),
            Duration::from_secs(5),
            Duration::from_secs(10),
        ));

        let svc1 = svc.clone();
        let svc2 = svc.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { svc1.try_schedule(1).await }),
            tokio::spawn(async move { svc2.try_schedule(2).await }),
        );
        r1.unwrap().unwrap();
        r2.unwrap().unwrap();

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
