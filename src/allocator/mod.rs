//! Uncertainty-driven compute allocation.
//!
//! The allocator maps a base budget and a step's uncertainty to the budget
//! for the next step:
//!
//! ```text
//! uncertainty:  0 ── low ──────── high ──────────── 1
//! multiplier:   low_scale │ mid_scale │ high_scale → max_scale
//! ```
//!
//! Above the high threshold the multiplier is interpolated linearly from
//! `high_scale` to `max_scale`. The result is rounded up and clamped to
//! `[floor, ceiling]`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AllocatorConfig;
use crate::error::{AppError, CoreError, CoreResult};
use crate::uncertainty::{UncertaintyEstimator, VoteSet};

/// Which part of the threshold band an uncertainty fell into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationBand {
    /// Below the low threshold; the budget shrinks.
    Low,
    /// Between the thresholds; the budget is unchanged.
    Nominal,
    /// Above the high threshold; the budget grows.
    High,
}

impl std::fmt::Display for AllocationBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationBand::Low => write!(f, "low"),
            AllocationBand::Nominal => write!(f, "nominal"),
            AllocationBand::High => write!(f, "high"),
        }
    }
}

/// Outcome of a single allocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationDecision {
    /// Budget requested by the caller.
    pub base_compute: u64,
    /// Uncertainty the decision was based on.
    pub uncertainty: f64,
    /// Budget granted for the next step.
    pub compute: u64,
    /// Band the uncertainty fell into.
    pub band: AllocationBand,
}

/// Scales compute budgets by uncertainty within configured bounds.
#[derive(Debug, Clone)]
pub struct ComputeAllocator {
    config: AllocatorConfig,
}

impl ComputeAllocator {
    /// Create an allocator, rejecting inconsistent configuration.
    pub fn new(config: AllocatorConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration in effect.
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Whether an uncertainty is high enough to grow the budget.
    pub fn should_scale(&self, uncertainty: f64) -> bool {
        uncertainty > self.config.high_threshold
    }

    /// Scaled budget for the next step.
    pub fn allocate(&self, base_compute: u64, uncertainty: f64) -> CoreResult<u64> {
        self.decide(base_compute, uncertainty).map(|d| d.compute)
    }

    /// Scaled budget together with the inputs and band that produced it.
    pub fn decide(&self, base_compute: u64, uncertainty: f64) -> CoreResult<AllocationDecision> {
        if base_compute == 0 {
            return Err(CoreError::invalid_input("base compute must be positive"));
        }
        if !(0.0..=1.0).contains(&uncertainty) {
            return Err(CoreError::invalid_input(format!(
                "uncertainty must be within [0, 1], got {}",
                uncertainty
            )));
        }

        let c = &self.config;
        let (band, multiplier) = if uncertainty < c.low_threshold {
            (AllocationBand::Low, c.low_scale)
        } else if uncertainty > c.high_threshold {
            let span = 1.0 - c.high_threshold;
            let excess = if span > 0.0 {
                (uncertainty - c.high_threshold) / span
            } else {
                1.0
            };
            (
                AllocationBand::High,
                c.high_scale + (c.max_scale - c.high_scale) * excess,
            )
        } else {
            (AllocationBand::Nominal, c.mid_scale)
        };

        let scaled = (base_compute as f64 * multiplier).ceil();
        let compute = if scaled >= c.ceiling as f64 {
            c.ceiling
        } else {
            (scaled as u64).clamp(c.floor, c.ceiling)
        };

        debug!(
            base_compute = base_compute,
            uncertainty = uncertainty,
            band = %band,
            multiplier = multiplier,
            compute = compute,
            "Compute allocated"
        );

        Ok(AllocationDecision {
            base_compute,
            uncertainty,
            compute,
            band,
        })
    }

    /// Estimate uncertainty from votes, then allocate.
    pub fn allocate_from_votes(&self, base_compute: u64, votes: &VoteSet) -> CoreResult<u64> {
        let uncertainty = UncertaintyEstimator::estimate(votes)?;
        self.allocate(base_compute, uncertainty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> ComputeAllocator {
        ComputeAllocator::new(AllocatorConfig::default()).unwrap()
    }

    #[test]
    fn test_high_uncertainty_doubles_budget() {
        // votes a,a,b,a -> uncertainty ~0.811
        let decision = allocator().decide(3, 0.811).unwrap();
        assert_eq!(decision.compute, 6);
        assert_eq!(decision.band, AllocationBand::High);
    }

    #[test]
    fn test_low_uncertainty_shrinks_budget() {
        let decision = allocator().decide(10, 0.1).unwrap();
        assert_eq!(decision.compute, 5);
        assert_eq!(decision.band, AllocationBand::Low);
    }

    #[test]
    fn test_band_is_unchanged() {
        let a = allocator();
        assert_eq!(a.allocate(10, 0.3).unwrap(), 10);
        assert_eq!(a.allocate(10, 0.5).unwrap(), 10);
        assert_eq!(a.allocate(10, 0.7).unwrap(), 10);
    }

    #[test]
    fn test_linear_ramp_to_cap() {
        let config = AllocatorConfig {
            high_threshold: 0.5,
            high_scale: 1.0,
            max_scale: 2.0,
            ..Default::default()
        };
        let a = ComputeAllocator::new(config).unwrap();
        assert_eq!(a.allocate(10, 0.75).unwrap(), 15);
        assert_eq!(a.allocate(10, 1.0).unwrap(), 20);
    }

    #[test]
    fn test_result_respects_floor_and_ceiling() {
        let config = AllocatorConfig {
            floor: 2,
            ceiling: 8,
            ..Default::default()
        };
        let a = ComputeAllocator::new(config).unwrap();
        assert_eq!(a.allocate(1, 0.0).unwrap(), 2);
        assert_eq!(a.allocate(100, 1.0).unwrap(), 8);
        assert_eq!(a.allocate(u64::MAX, 1.0).unwrap(), 8);
    }

    #[test]
    fn test_invalid_inputs() {
        let a = allocator();
        assert!(matches!(a.allocate(0, 0.5), Err(CoreError::InvalidInput { .. })));
        assert!(matches!(a.allocate(3, -0.1), Err(CoreError::InvalidInput { .. })));
        assert!(matches!(a.allocate(3, 1.01), Err(CoreError::InvalidInput { .. })));
        assert!(matches!(a.allocate(3, f64::NAN), Err(CoreError::InvalidInput { .. })));
    }

    #[test]
    fn test_should_scale() {
        let a = allocator();
        assert!(!a.should_scale(0.5));
        assert!(!a.should_scale(0.7));
        assert!(a.should_scale(0.71));
    }

    #[test]
    fn test_allocate_from_votes() {
        let a = allocator();
        assert_eq!(
            a.allocate_from_votes(4, &VoteSet::from(vec!["x", "x", "x"])).unwrap(),
            2
        );
        assert_eq!(
            a.allocate_from_votes(4, &VoteSet::from(vec!["x", "y", "z"])).unwrap(),
            8
        );
        assert!(a.allocate_from_votes(4, &VoteSet::Votes(vec![])).is_err());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = AllocatorConfig {
            low_threshold: 0.9,
            high_threshold: 0.1,
            ..Default::default()
        };
        assert!(ComputeAllocator::new(config).is_err());
    }
}
