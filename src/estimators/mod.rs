//! Contributivity estimation methods.
//!
//! ## Shared infrastructure
//!
//! - [`ContributivityMethod`]: trait every method implements
//! - [`AccuracyParams`]: target half-width, confidence level, iteration ceiling
//!
//! ## Methods
//!
//! - [`TruncatedMC`], [`InterpolatedTMC`]: permutation Monte Carlo
//! - [`LinearImportanceSampling`], [`RegressionImportanceSampling`]:
//!   surrogate-biased importance sampling
//! - [`KrigingAdaptiveSampling`]: importance sampling with periodically
//!   refitted Gaussian-process surrogates
//! - [`StratifiedMC`], [`SupportStratifiedMC`]: variance-driven allocation
//!   across coalition-size strata
//! - [`IndependentRaw`], [`IndependentAdditive`]: non-game-theoretic baselines
//! - [`crate::exact::ExactShapley`]: full enumeration (reference)

mod importance;
mod independent;
mod kriging;
mod permutation;
mod stratified;
mod surrogate;

use std::time::Instant;

pub use importance::{LinearImportanceSampling, RegressionImportanceSampling};
pub use independent::{IndependentAdditive, IndependentRaw};
pub use kriging::KrigingAdaptiveSampling;
pub use permutation::{InterpolatedTMC, TruncatedMC};
pub use stratified::{StratifiedMC, SupportStratifiedMC};
pub use surrogate::{IncrementSurrogate, SurrogateError};

use crate::evaluator::{CharacteristicFunction, EvaluationError};
use crate::logger::EstimationLogger;
use crate::result::ContributivityResult;
use crate::session::Session;
use crate::stopping::{StoppingRule, VarianceScale, MIN_ITERATIONS};

// =============================================================================
// Errors
// =============================================================================

/// Parameter validation error for estimator configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParamValidationError {
    /// accuracy must be > 0.
    #[error("accuracy must be > 0, got {0}")]
    InvalidAccuracy(f64),

    /// alpha must be in (0, 1).
    #[error("alpha must be in (0, 1), got {0}")]
    InvalidAlpha(f64),

    /// truncation must be >= 0.
    #[error("truncation must be >= 0, got {0}")]
    InvalidTruncation(f64),

    /// max_iterations must be >= the fixed floor.
    #[error("max_iterations must be >= {MIN_ITERATIONS}, got {0}")]
    InvalidMaxIterations(u64),

    /// update period must be > 0.
    #[error("update period must be > 0")]
    InvalidUpdatePeriod,
}

/// Failure of one estimation run.
#[derive(Debug, thiserror::Error)]
pub enum EstimationError {
    /// External evaluator failure, propagated unmodified.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// Invalid estimator configuration.
    #[error(transparent)]
    InvalidParams(#[from] ParamValidationError),

    /// A surrogate model could not be fit.
    #[error(transparent)]
    Surrogate(#[from] SurrogateError),
}

// =============================================================================
// AccuracyParams
// =============================================================================

/// Convergence target shared by every sampling estimator.
#[derive(Debug, Clone, Copy)]
pub struct AccuracyParams {
    /// Target confidence-interval half-width ε.
    pub accuracy: f64,
    /// Confidence level α.
    pub alpha: f64,
    /// Hard iteration ceiling; hitting it yields `converged = false`.
    pub max_iterations: u64,
}

impl Default for AccuracyParams {
    fn default() -> Self {
        Self {
            accuracy: 0.01,
            alpha: 0.95,
            max_iterations: 100_000,
        }
    }
}

impl AccuracyParams {
    pub fn new(accuracy: f64, alpha: f64) -> Self {
        Self {
            accuracy,
            alpha,
            ..Default::default()
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Validate the target.
    pub fn validate(&self) -> Result<(), ParamValidationError> {
        if !(self.accuracy > 0.0) {
            return Err(ParamValidationError::InvalidAccuracy(self.accuracy));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(ParamValidationError::InvalidAlpha(self.alpha));
        }
        if self.max_iterations < MIN_ITERATIONS {
            return Err(ParamValidationError::InvalidMaxIterations(
                self.max_iterations,
            ));
        }
        Ok(())
    }

    pub(crate) fn stopping_rule(&self, scale: VarianceScale) -> StoppingRule {
        StoppingRule::new(self.accuracy, self.alpha, scale, self.max_iterations)
    }
}

// =============================================================================
// ContributivityMethod
// =============================================================================

/// A contributivity estimation method.
///
/// Methods are stateless strategy objects: all mutable run state lives in the
/// session (cache) and in locals of `estimate`.
pub trait ContributivityMethod {
    /// Human-readable method name, used as the result record name.
    fn name(&self) -> &'static str;

    /// Run the method against a session. `seed` makes sampling reproducible.
    fn estimate<E: CharacteristicFunction>(
        &self,
        session: &mut Session<E>,
        seed: u64,
        logger: &EstimationLogger,
    ) -> Result<ContributivityResult, EstimationError>;
}

/// Single-partner short circuit shared by every estimator: the lone partner
/// gets the full characteristic value with zero spread.
pub(crate) fn singleton_result<E: CharacteristicFunction>(
    name: &str,
    session: &mut Session<E>,
    start: Instant,
) -> Result<ContributivityResult, EstimationError> {
    let value = session.value(session.grand_coalition())?;
    Ok(ContributivityResult::singleton(
        name,
        value,
        session.cache().calls(),
        start.elapsed(),
    ))
}

// =============================================================================
// Tests
// =============================================================================
