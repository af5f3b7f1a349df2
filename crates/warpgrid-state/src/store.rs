//! StateStore — Postgres-backed state persistence for WarpGrid.
//!
//! Clusters and deployments live in two tables (`migrations/0001_init.sql`).
//! The scheduling decision itself runs inside a single serializable-ish
//! transaction per cluster: [`StoreTx::load_cluster_for_update`] and
//! [`StoreTx::load_running_for_update`] take row locks (`SELECT ... FOR
//! UPDATE`) so two workers racing on the same cluster serialize at the
//! database rather than double-booking capacity.
//!
//! [`StateBackend`]/[`StoreTxPort`] exist so `warpgrid-scheduler` can be
//! generic over the store — real code runs against [`StateStore`], tests
//! run against an in-memory fake that implements the same two traits.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use warp_core::{ClusterId, DeploymentId, Priority, Resources};

use crate::error::{StateError, StateResult};
use crate::types::{Cluster, ClusterStatus, Deployment, DeploymentStatus};

/// Read and transactional operations the scheduler needs from a store.
/// Implemented by [`StateStore`]; fake implementations back scheduler
/// unit tests without a live Postgres instance.
#[async_trait]
pub trait StateBackend: Send + Sync {
    type Tx: StoreTxPort + Send;

    async fn get_deployment(&self, id: DeploymentId) -> StateResult<Deployment>;
    async fn get_cluster(&self, id: ClusterId) -> StateResult<Cluster>;
    async fn list_status(&self, status: DeploymentStatus) -> StateResult<Vec<DeploymentId>>;
    async fn begin(&self) -> StateResult<Self::Tx>;
}

/// The row-locking reads and writes a single scheduling decision makes
/// inside one transaction.
#[async_trait]
pub trait StoreTxPort {
    async fn load_cluster_for_update(&mut self, id: ClusterId) -> StateResult<Cluster>;
    async fn load_deployment_for_update(&mut self, id: DeploymentId) -> StateResult<Deployment>;
    async fn load_running_for_update(&mut self, cluster_id: ClusterId) -> StateResult<Vec<Deployment>>;
    async fn set_status(&mut self, id: DeploymentId, status: DeploymentStatus) -> StateResult<()>;
    async fn commit(self) -> StateResult<()>;
    async fn rollback(self) -> StateResult<()>;
}

/// Thread-safe handle to the Postgres connection pool.
#[derive(Clone)]
pub struct StateStore {
    pool: PgPool,
}

impl StateStore {
    /// Connect to Postgres and run pending migrations.
    pub async fn connect(database_url: &str) -> StateResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        debug!("state store connected");
        Ok(store)
    }

    /// Wrap an already-open pool (used by tests with a shared fixture DB).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StateResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction. Callers use this to get [`StoreTx`]'s
    /// locking reads before making a placement decision.
    pub async fn begin(&self) -> StateResult<StoreTx> {
        let tx = self.pool.begin().await?;
        Ok(StoreTx { tx })
    }

    pub async fn create_cluster(
        &self,
        organisation_id: i64,
        name: &str,
        capacity: Resources,
    ) -> StateResult<Cluster> {
        let result = sqlx::query(
            "INSERT INTO cluster (organisation_id, name, ram, cpu, gpu, status)
             VALUES ($1, $2, $3, $4, $5, 'active')
             RETURNING id, organisation_id, name, ram, cpu, gpu, status",
        )
        .bind(organisation_id)
        .bind(name)
        .bind(capacity.ram as i64)
        .bind(capacity.cpu as i64)
        .bind(capacity.gpu as i64)
        .fetch_one(&self.pool)
        .await;

        let row = match result {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => {
                return Err(StateError::NameConflict(format!(
                    "cluster {name:?} already exists for organisation {organisation_id}"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        row_to_cluster(&row)
    }

    pub async fn create_deployment(
        &self,
        name: &str,
        cluster_id: ClusterId,
        resources: Resources,
        priority: Priority,
    ) -> StateResult<Deployment> {
        let result = sqlx::query(
            "INSERT INTO deployment (name, cluster_id, ram, cpu, gpu, priority, status)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending')
             RETURNING id, name, cluster_id, ram, cpu, gpu, priority, status",
        )
        .bind(name)
        .bind(cluster_id)
        .bind(resources.ram as i64)
        .bind(resources.cpu as i64)
        .bind(resources.gpu as i64)
        .bind(priority.get() as i16)
        .fetch_one(&self.pool)
        .await;

        let row = match result {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => {
                return Err(StateError::NameConflict(format!(
                    "deployment {name:?} already exists on cluster {cluster_id}"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        row_to_deployment(&row)
    }

    pub async fn get_cluster(&self, id: ClusterId) -> StateResult<Cluster> {
        let row = sqlx::query(
            "SELECT id, organisation_id, name, ram, cpu, gpu, status FROM cluster WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StateError::NotFound(format!("cluster {id}")))?;
        row_to_cluster(&row)
    }

    pub async fn get_deployment(&self, id: DeploymentId) -> StateResult<Deployment> {
        let row = sqlx::query(
            "SELECT id, name, cluster_id, ram, cpu, gpu, priority, status
             FROM deployment WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StateError::NotFound(format!("deployment {id}")))?;
        row_to_deployment(&row)
    }

    /// All deployment ids currently in `status`, across every cluster.
    pub async fn list_status(&self, status: DeploymentStatus) -> StateResult<Vec<DeploymentId>> {
        let rows = sqlx::query("SELECT id FROM deployment WHERE status = $1")
            .bind(status.as_db_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| Ok(row.try_get("id")?)).collect()
    }
}

#[async_trait]
impl StateBackend for StateStore {
    type Tx = StoreTx;

    async fn get_deployment(&self, id: DeploymentId) -> StateResult<Deployment> {
        StateStore::get_deployment(self, id).await
    }

    async fn get_cluster(&self, id: ClusterId) -> StateResult<Cluster> {
        StateStore::get_cluster(self, id).await
    }

    async fn list_status(&self, status: DeploymentStatus) -> StateResult<Vec<DeploymentId>> {
        StateStore::list_status(self, status).await
    }

    async fn begin(&self) -> StateResult<StoreTx> {
        StateStore::begin(self).await
    }
}

/// A single scheduling transaction. Holds row locks acquired by its
/// `*_for_update` reads until `commit`/`rollback` (or `Drop`, which rolls
/// back implicitly via `sqlx::Transaction`).
pub struct StoreTx {
    tx: Transaction<'static, Postgres>,
}

impl StoreTx {
    /// Lock the cluster row, failing if it isn't `active`.
    pub async fn load_cluster_for_update(&mut self, id: ClusterId) -> StateResult<Cluster> {
        let row = sqlx::query(
            "SELECT id, organisation_id, name, ram, cpu, gpu, status
             FROM cluster WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StateError::NotFound(format!("cluster {id}")))?;
        row_to_cluster(&row)
    }

    /// Lock the deployment row being scheduled.
    pub async fn load_deployment_for_update(
        &mut self,
        id: DeploymentId,
    ) -> StateResult<Deployment> {
        let row = sqlx::query(
            "SELECT id, name, cluster_id, ram, cpu, gpu, priority, status
             FROM deployment WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StateError::NotFound(format!("deployment {id}")))?;
        row_to_deployment(&row)
    }

    /// Lock every `running` deployment on `cluster_id` — these are the
    /// candidates the placement engine may need to preempt.
    pub async fn load_running_for_update(
        &mut self,
        cluster_id: ClusterId,
    ) -> StateResult<Vec<Deployment>> {
        let rows = sqlx::query(
            "SELECT id, name, cluster_id, ram, cpu, gpu, priority, status
             FROM deployment WHERE cluster_id = $1 AND status = 'running'
             FOR UPDATE",
        )
        .bind(cluster_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(row_to_deployment).collect()
    }

    /// Transition a deployment's status.
    pub async fn set_status(
        &mut self,
        id: DeploymentId,
        status: DeploymentStatus,
    ) -> StateResult<()> {
        sqlx::query("UPDATE deployment SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status.as_db_str())
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn commit(self) -> StateResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> StateResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl StoreTxPort for StoreTx {
    async fn load_cluster_for_update(&mut self, id: ClusterId) -> StateResult<Cluster> {
        StoreTx::load_cluster_for_update(self, id).await
    }

    async fn load_deployment_for_update(&mut self, id: DeploymentId) -> StateResult<Deployment> {
        StoreTx::load_deployment_for_update(self, id).await
    }

    async fn load_running_for_update(&mut self, cluster_id: ClusterId) -> StateResult<Vec<Deployment>> {
        StoreTx::load_running_for_update(self, cluster_id).await
    }

    async fn set_status(&mut self, id: DeploymentId, status: DeploymentStatus) -> StateResult<()> {
        StoreTx::set_status(self, id, status).await
    }

    async fn commit(self) -> StateResult<()> {
        StoreTx::commit(self).await
    }

    async fn rollback(self) -> StateResult<()> {
        StoreTx::rollback(self).await
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err.as_database_error(), Some(db_err) if db_err.is_unique_violation())
}

fn row_to_cluster(row: &sqlx::postgres::PgRow) -> StateResult<Cluster> {
    let status_str: String = row.try_get("status")?;
    let status = ClusterStatus::from_db_str(&status_str)
        .ok_or_else(|| StateError::Invalid(format!("unknown cluster status {status_str:?}")))?;
    Ok(Cluster {
        id: row.try_get("id")?,
        organisation_id: row.try_get("organisation_id")?,
        name: row.try_get("name")?,
        capacity: Resources::raw(
            row.try_get::<i64, _>("ram")? as u64,
            row.try_get::<i64, _>("cpu")? as u64,
            row.try_get::<i64, _>("gpu")? as u64,
        ),
        status,
    })
}

fn row_to_deployment(row: &sqlx::postgres::PgRow) -> StateResult<Deployment> {
    let status_str: String = row.try_get("status")?;
    let status = DeploymentStatus::from_db_str(&status_str)
        .ok_or_else(|| StateError::Invalid(format!("unknown deployment status {status_str:?}")))?;
    let priority_raw: i16 = row.try_get("priority")?;
    let priority = Priority::new(priority_raw as u8)
        .map_err(|e| StateError::Invalid(format!("stored priority invalid: {e}")))?;
    Ok(Deployment {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        cluster_id: row.try_get("cluster_id")?,
        resources: Resources::raw(
            row.try_get::<i64, _>("ram")? as u64,
            row.try_get::<i64, _>("cpu")? as u64,
            row.try_get::<i64, _>("gpu")? as u64,
        ),
        priority,
        status,
    })
}
