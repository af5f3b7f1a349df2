//! Domain row types for clusters and deployments.

use serde::{Deserialize, Serialize};
use warp_core::{ClusterId, DeploymentId, OrganisationId, Priority, Resources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Active,
    Deleted,
}

impl ClusterStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            ClusterStatus::Active => "active",
            ClusterStatus::Deleted => "deleted",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ClusterStatus::Active),
            "deleted" => Some(ClusterStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Evicted,
    Deleted,
}

impl DeploymentStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Evicted => "evicted",
            DeploymentStatus::Deleted => "deleted",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeploymentStatus::Pending),
            "running" => Some(DeploymentStatus::Running),
            "evicted" => Some(DeploymentStatus::Evicted),
            "deleted" => Some(DeploymentStatus::Deleted),
            _ => None,
        }
    }
}

/// A cluster row — a fixed-capacity pool of (ram, cpu, gpu) that
/// deployments are scheduled onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub id: ClusterId,
    pub organisation_id: OrganisationId,
    pub name: String,
    pub capacity: Resources,
    pub status: ClusterStatus,
}

/// A deployment row — a workload requesting `resources` on `cluster_id`
/// at `priority`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub name: String,
    pub cluster_id: ClusterId,
    pub resources: Resources,
    pub priority: Priority,
    pub status: DeploymentStatus,
}
