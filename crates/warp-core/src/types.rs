//! Shared domain identifiers used across WarpGrid scheduler crates.

use serde::{Deserialize, Serialize};

/// Opaque handle to an organisation. The core treats organisations as
/// foreign-key-only — it never reads or writes organisation rows.
pub type OrganisationId = i64;

/// Primary key of a cluster.
pub type ClusterId = i64;

/// Primary key of a deployment.
pub type DeploymentId = i64;

/// Deployment scheduling priority. `5` dominates `1`.
///
/// Validated at construction — the scheduler never observes an
/// out-of-range priority because rejection happens at the creation
/// boundary (see spec §7, "Validation errors").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

/// Error returned when a priority or resource value fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("priority {0} out of range 1..=5")]
    PriorityOutOfRange(u8),
    #[error("ram and cpu must be positive (ram={ram}, cpu={cpu})")]
    NonPositiveCore { ram: u64, cpu: u64 },
}

impl Priority {
    pub const LOWEST: Priority = Priority(1);
    pub const HIGHEST: Priority = Priority(5);

    pub fn new(value: u8) -> Result<Self, ResourceError> {
        if (1..=5).contains(&value) {
            Ok(Priority(value))
        } else {
            Err(ResourceError::PriorityOutOfRange(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Priority {
    type Error = ResourceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p.0
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
