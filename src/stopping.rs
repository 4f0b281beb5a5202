//! Adaptive stopping on confidence-interval half-width.
//!
//! Every sampling estimator keeps drawing until the worst per-partner
//! confidence interval is tighter than the target accuracy, subject to a hard
//! floor of [`MIN_ITERATIONS`] draws and a ceiling after which the run is
//! reported as not converged instead of looping forever.

use statrs::distribution::{ContinuousCDF, Normal};

/// Mandatory minimum number of iterations before the variance criterion is
/// consulted. Fixed, not configurable.
pub const MIN_ITERATIONS: u64 = 100;

// =============================================================================
// StoppingRule
// =============================================================================

/// Scaling of the variance bound in the stopping inequality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarianceScale {
    /// Plain Monte-Carlo variance (permutation estimators).
    Plain,
    /// Importance-sampled / stratified variance estimates, scaled by 4.
    Conservative,
}

impl VarianceScale {
    #[inline]
    fn factor(self) -> f64 {
        match self {
            VarianceScale::Plain => 1.0,
            VarianceScale::Conservative => 4.0,
        }
    }
}

/// Outcome of one stopping check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    /// Keep sampling.
    Continue,
    /// Interval target met (and floor passed).
    Converged,
    /// Ceiling hit with the target still unmet.
    CeilingReached,
}

/// Confidence-interval half-width stopping policy.
///
/// With `q = Φ⁻¹((1-α)/2)` and `v_max` the worst per-partner increment
/// variance, sampling continues while
/// `t < MIN_ITERATIONS || t < scale·q²·v_max/ε²`.
#[derive(Debug, Clone, Copy)]
pub struct StoppingRule {
    accuracy: f64,
    q_squared: f64,
    scale: f64,
    max_iterations: u64,
}

impl StoppingRule {
    pub fn new(accuracy: f64, alpha: f64, scale: VarianceScale, max_iterations: u64) -> Self {
        let normal = Normal::new(0.0, 1.0).expect("standard normal is well-formed");
        let q = normal.inverse_cdf((1.0 - alpha) / 2.0);
        Self {
            accuracy,
            q_squared: q * q,
            scale: scale.factor(),
            max_iterations,
        }
    }

    /// Required sample count for the current worst-partner variance.
    #[inline]
    fn required(&self, v_max: f64) -> f64 {
        self.scale * self.q_squared * v_max / (self.accuracy * self.accuracy)
    }

    /// True while the confidence-interval target is still unmet, ignoring the
    /// iteration floor and ceiling. Used by the stratified estimators, whose
    /// loop condition also depends on open strata.
    #[inline]
    pub fn interval_unmet(&self, completed: u64, v_max: f64) -> bool {
        (completed as f64) < self.required(v_max)
    }

    /// True while the confidence-interval half-width implied by an estimator
    /// variance `v_max` is wider than the accuracy target:
    /// `ε² < scale·q²·v_max`. Used by the stratified estimators, whose
    /// per-stratum variances already fold in their sample counts.
    #[inline]
    pub fn bound_unmet(&self, v_max: f64) -> bool {
        self.accuracy * self.accuracy < self.scale * self.q_squared * v_max
    }

    /// Stopping check after `completed` iterations.
    pub fn check(&self, completed: u64, v_max: f64) -> LoopDecision {
        let needs_more =
            completed < MIN_ITERATIONS || self.interval_unmet(completed, v_max);
        if !needs_more {
            LoopDecision::Converged
        } else if completed >= self.max_iterations {
            LoopDecision::CeilingReached
        } else {
            LoopDecision::Continue
        }
    }

    #[inline]
    pub fn max_iterations(&self) -> u64 {
        self.max_iterations
    }
}

// =============================================================================
// Tests
// =============================================================================
