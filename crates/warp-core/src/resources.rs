//! Resource algebra — (ram, cpu, gpu) triples and the arithmetic the
//! placement engine builds on. Pure; no I/O.

use serde::{Deserialize, Serialize};

use crate::types::ResourceError;

/// A (ram, cpu, gpu) resource triple. Non-negative by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resources {
    pub ram: u64,
    pub cpu: u64,
    pub gpu: u64,
}

impl Resources {
    pub const ZERO: Resources = Resources { ram: 0, cpu: 0, gpu: 0 };

    /// Construct a resource request, rejecting a non-positive ram or cpu
    /// (gpu may legitimately be zero). This is the validation boundary —
    /// once a `Resources` value exists, the scheduler trusts it.
    pub fn new(ram: u64, cpu: u64, gpu: u64) -> Result<Self, ResourceError> {
        if ram == 0 || cpu == 0 {
            return Err(ResourceError::NonPositiveCore { ram, cpu });
        }
        Ok(Resources { ram, cpu, gpu })
    }

    /// Construct a capacity triple. Unlike [`Resources::new`], used for
    /// cluster capacities which are validated the same way at the API
    /// boundary, not re-checked here — callers that already hold a
    /// validated `Cluster` row should prefer this constructor.
    pub const fn raw(ram: u64, cpu: u64, gpu: u64) -> Self {
        Resources { ram, cpu, gpu }
    }

    pub fn add(self, other: Resources) -> Resources {
        Resources {
            ram: self.ram + other.ram,
            cpu: self.cpu + other.cpu,
            gpu: self.gpu + other.gpu,
        }
    }

    /// Subtract `other` from `self`, clamping each dimension at zero.
    /// Used for waste accounting and for computing available capacity
    /// when usage has (transiently) exceeded capacity.
    pub fn sub_saturating(self, other: Resources) -> Resources {
        Resources {
            ram: self.ram.saturating_sub(other.ram),
            cpu: self.cpu.saturating_sub(other.cpu),
            gpu: self.gpu.saturating_sub(other.gpu),
        }
    }

    /// Does `need` fit within `avail` on every dimension?
    pub fn fits(need: Resources, avail: Resources) -> bool {
        need.ram <= avail.ram && need.cpu <= avail.cpu && need.gpu <= avail.gpu
    }

    /// Sum a collection of resource triples.
    pub fn sum_over<'a>(items: impl IntoIterator<Item = &'a Resources>) -> Resources {
        items.into_iter().fold(Resources::ZERO, |acc, r| acc.add(*r))
    }

    /// `Σᵢ max(0, actualᵢ − needᵢ)` — overshoot across dimensions, used
    /// as a waste metric when `actual` capacity exceeds what `need` asked for.
    pub fn waste(actual: Resources, need: Resources) -> u64 {
        actual.sub_saturating(need).score()
    }

    /// Utilisation proxy: the sum of all three dimensions. Used by the
    /// placement engine to rank preemption candidates by how much they'd
    /// free up.
    pub fn score(self) -> u64 {
        self.ram + self.cpu + self.gpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_zero_ram_or_cpu() {
        assert!(Resources::new(0, 1, 0).is_err());
        assert!(Resources::new(1, 0, 0).is_err());
        assert!(Resources::new(0, 0, 0).is_err());
    }

    #[test]
    fn new_accepts_zero_gpu() {
        assert!(Resources::new(1, 1, 0).is_ok());
    }

    #[test]
    fn add_is_componentwise() {
        let a = Resources::raw(1, 2, 3);
        let b = Resources::raw(4, 5, 6);
        assert_eq!(a.add(b), Resources::raw(5, 7, 9));
    }

    #[test]
    fn sub_saturating_never_goes_negative() {
        let a = Resources::raw(1, 1, 1);
        let b = Resources::raw(5, 5, 5);
        assert_eq!(a.sub_saturating(b), Resources::ZERO);
    }

    #[test]
    fn fits_checks_all_dimensions() {
        let avail = Resources::raw(10, 5, 2);
        assert!(Resources::fits(Resources::raw(10, 5, 2), avail));
        assert!(Resources::fits(Resources::raw(4, 2, 1), avail));
        assert!(!Resources::fits(Resources::raw(11, 5, 2), avail));
        assert!(!Resources::fits(Resources::raw(10, 6, 2), avail));
        assert!(!Resources::fits(Resources::raw(10, 5, 3), avail));
    }

    #[test]
    fn sum_over_collection() {
        let items = vec![Resources::raw(1, 1, 0), Resources::raw(2, 2, 1)];
        assert_eq!(Resources::sum_over(&items), Resources::raw(3, 3, 1));
    }

    #[test]
    fn waste_is_overshoot_only() {
        let need = Resources::raw(2, 1, 0);
        let actual = Resources::raw(5, 1, 2);
        // ram overshoot 3, cpu overshoot 0, gpu overshoot 2 => 5
        assert_eq!(Resources::waste(actual, need), 5);
    }

    #[test]
    fn waste_is_zero_when_actual_is_smaller() {
        let need = Resources::raw(10, 10, 10);
        let actual = Resources::raw(1, 1, 1);
        assert_eq!(Resources::waste(actual, need), 0);
    }

    #[test]
    fn score_sums_dimensions() {
        assert_eq!(Resources::raw(4, 2, 1).score(), 7);
    }
}
