//! Placement engine — decides whether a deployment fits a cluster,
//! directly or by preempting lower-priority running deployments.
//!
//! Pure; no I/O. The caller (`warpgrid-scheduler`) is responsible for
//! loading cluster capacity and running deployments under a row lock
//! and for writing back whatever this module decides.

use warp_core::{DeploymentId, Priority, Resources};

/// A running deployment as seen by the placement engine — only what's
/// needed to decide whether it's a preemption candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: DeploymentId,
    pub resources: Resources,
    pub priority: Priority,
}

/// The placement engine's verdict for one deployment against one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementDecision {
    /// Fits in currently-free capacity, no eviction needed.
    Admit,
    /// Fits only after evicting the listed deployments (in eviction order).
    AdmitWithPreemption { preempt: Vec<DeploymentId> },
    /// Does not fit even after evicting every lower-priority candidate.
    Reject,
}

/// Decide whether `need` at `priority` can be placed on a cluster with
/// `capacity` total resources, given `running` deployments already
/// occupying it.
///
/// Algorithm:
/// 1. Direct fit: does `need` fit in `capacity` minus what `running` uses?
/// 2. Otherwise, gather candidates with strictly lower priority, sort by
///    `(-score(resources), priority)` — biggest first, ties broken by
///    lowest priority first — and evict greedily until freed resources
///    plus already-available resources fit `need`, or candidates run out.
///
/// This is deliberately greedy, not optimal: it does not search for the
/// minimal eviction set, and a smaller combination of victims may exist
/// that also satisfies `need`. See the module docs on this tradeoff.
pub fn compute_placement(
    need: Resources,
    priority: Priority,
    capacity: Resources,
    running: &[Candidate],
) -> PlacementDecision {
    let used = Resources::sum_over(running.iter().map(|c| &c.resources));
    let available = capacity.sub_saturating(used);

    if Resources::fits(need, available) {
        return PlacementDecision::Admit;
    }

    let mut candidates: Vec<&Candidate> = running
        .iter()
        .filter(|c| c.priority < priority)
        .collect();
    if candidates.is_empty() {
        return PlacementDecision::Reject;
    }

    candidates.sort_by(|a, b| {
        b.resources
            .score()
            .cmp(&a.resources.score())
            .then(a.priority.cmp(&b.priority))
    });

    let mut preempt = Vec::new();
    let mut freed = Resources::ZERO;
    for candidate in candidates {
        if Resources::fits(need, available.add(freed)) {
            break;
        }
        preempt.push(candidate.id);
        freed = freed.add(candidate.resources);
    }

    if Resources::fits(need, available.add(freed)) {
        PlacementDecision::AdmitWithPreemption { preempt }
    } else {
        PlacementDecision::Reject
    }
}
