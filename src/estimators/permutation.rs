//! Permutation Monte-Carlo estimators (truncated and interpolated).
//!
//! Each iteration draws a uniformly random joining order of the partners and
//! walks it left to right, crediting every partner with its marginal
//! contribution over the running prefix. Once the prefix value is within the
//! truncation threshold of the grand-coalition value, the tail of the
//! permutation is no longer worth an evaluator call: the plain variant
//! assigns zero to the remaining positions, the interpolated variant spreads
//! the remaining gap over them proportionally to training-set size.

use std::time::Instant;

use ndarray::Array1;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::coalition::Coalition;
use crate::evaluator::CharacteristicFunction;
use crate::logger::EstimationLogger;
use crate::result::ContributivityResult;
use crate::session::Session;
use crate::stats::RunningStats;
use crate::stopping::{LoopDecision, VarianceScale};

use super::{
    singleton_result, AccuracyParams, ContributivityMethod, EstimationError,
    ParamValidationError,
};

/// Default truncation threshold τ.
pub const DEFAULT_TRUNCATION: f64 = 0.05;

// =============================================================================
// TruncatedMC
// =============================================================================

/// Truncated permutation Monte Carlo (TMC).
#[derive(Debug, Clone, Copy)]
pub struct TruncatedMC {
    pub accuracy: AccuracyParams,
    /// Truncation threshold τ; 0 disables truncation entirely.
    pub truncation: f64,
}

impl Default for TruncatedMC {
    fn default() -> Self {
        Self {
            accuracy: AccuracyParams::new(0.01, 0.9),
            truncation: DEFAULT_TRUNCATION,
        }
    }
}

impl TruncatedMC {
    pub fn new(accuracy: AccuracyParams, truncation: f64) -> Self {
        Self {
            accuracy,
            truncation,
        }
    }
}

impl ContributivityMethod for TruncatedMC {
    fn name(&self) -> &'static str {
        "Truncated MC Shapley values"
    }

    fn estimate<E: CharacteristicFunction>(
        &self,
        session: &mut Session<E>,
        seed: u64,
        logger: &EstimationLogger,
    ) -> Result<ContributivityResult, EstimationError> {
        run_permutation_sampling(
            self.name(),
            session,
            &self.accuracy,
            self.truncation,
            TruncationFill::Zero,
            seed,
            logger,
        )
    }
}

// =============================================================================
// InterpolatedTMC
// =============================================================================

/// Interpolated truncated permutation Monte Carlo (ITMC).
///
/// Identical to [`TruncatedMC`] except in how truncated tail positions are
/// credited: the remaining gap to the grand-coalition value is distributed
/// over the not-yet-walked partners proportionally to their training-set
/// sizes, which removes most of the truncation bias on data-volume-driven
/// games.
#[derive(Debug, Clone, Copy)]
pub struct InterpolatedTMC {
    pub accuracy: AccuracyParams,
    /// Truncation threshold τ; 0 disables truncation entirely.
    pub truncation: f64,
}

impl Default for InterpolatedTMC {
    fn default() -> Self {
        Self {
            accuracy: AccuracyParams::new(0.01, 0.9),
            truncation: DEFAULT_TRUNCATION,
        }
    }
}

impl InterpolatedTMC {
    pub fn new(accuracy: AccuracyParams, truncation: f64) -> Self {
        Self {
            accuracy,
            truncation,
        }
    }
}

impl ContributivityMethod for InterpolatedTMC {
    fn name(&self) -> &'static str {
        "Interpolated truncated MC Shapley values"
    }

    fn estimate<E: CharacteristicFunction>(
        &self,
        session: &mut Session<E>,
        seed: u64,
        logger: &EstimationLogger,
    ) -> Result<ContributivityResult, EstimationError> {
        run_permutation_sampling(
            self.name(),
            session,
            &self.accuracy,
            self.truncation,
            TruncationFill::DataVolume,
            seed,
            logger,
        )
    }
}

// =============================================================================
// Shared sampling loop
// =============================================================================

/// How truncated tail positions of a permutation are credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TruncationFill {
    Zero,
    DataVolume,
}

fn validate_truncation(truncation: f64) -> Result<(), ParamValidationError> {
    if !(truncation >= 0.0) {
        return Err(ParamValidationError::InvalidTruncation(truncation));
    }
    Ok(())
}

fn run_permutation_sampling<E: CharacteristicFunction>(
    name: &str,
    session: &mut Session<E>,
    accuracy: &AccuracyParams,
    truncation: f64,
    fill: TruncationFill,
    seed: u64,
    logger: &EstimationLogger,
) -> Result<ContributivityResult, EstimationError> {
    let start = Instant::now();
    accuracy.validate()?;
    validate_truncation(truncation)?;

    let n = session.partner_count();
    logger.start_run(name, n);
    if n == 1 {
        let result = singleton_result(name, session, start)?;
        logger.finish_run(&result);
        return Ok(result);
    }

    let grand_value = session.value(session.grand_coalition())?;
    let rule = accuracy.stopping_rule(VarianceScale::Plain);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut stats = vec![RunningStats::new(); n];
    let mut permutation: Vec<usize> = (0..n).collect();
    let mut t: u64 = 0;
    let mut v_max = 0.0;

    let converged = loop {
        match rule.check(t, v_max) {
            LoopDecision::Continue => {}
            LoopDecision::Converged => break true,
            LoopDecision::CeilingReached => {
                logger.log_ceiling(t);
                break false;
            }
        }
        t += 1;
        permutation.shuffle(&mut rng);

        let mut prefix = Coalition::EMPTY;
        let mut prefix_value = 0.0;
        // Frozen at the first truncated position of this permutation.
        let mut tail: Option<TailShare> = None;

        for (pos, &partner) in permutation.iter().enumerate() {
            let increment = if (grand_value - prefix_value).abs() < truncation {
                let tail = tail.get_or_insert_with(|| TailShare {
                    gap: grand_value - prefix_value,
                    train_size: permutation[pos..]
                        .iter()
                        .map(|&p| session.scenario().train_size(p))
                        .sum(),
                    count: n - pos,
                });
                prefix = prefix.with(partner);
                match fill {
                    TruncationFill::Zero => 0.0,
                    TruncationFill::DataVolume => {
                        tail.gap * tail.share(session.scenario().train_size(partner))
                    }
                }
            } else {
                prefix = prefix.with(partner);
                let value = session.value(prefix)?;
                value - prefix_value
            };
            prefix_value += increment;
            stats[partner].push(increment);
        }

        v_max = stats.iter().map(RunningStats::variance).fold(0.0, f64::max);
        logger.log_progress(t, v_max);
    };

    let scores = Array1::from_iter(stats.iter().map(RunningStats::mean));
    let spread = ((t - 1) as f64).sqrt();
    let scores_std = Array1::from_iter(stats.iter().map(|s| s.std() / spread));
    let result = ContributivityResult::from_scores(
        name,
        scores,
        scores_std,
        session.cache().calls(),
        start.elapsed(),
        converged,
    );
    logger.finish_run(&result);
    Ok(result)
}

/// Gap and weights for crediting the truncated tail of one permutation.
#[derive(Debug, Clone, Copy)]
struct TailShare {
    gap: f64,
    train_size: usize,
    count: usize,
}

impl TailShare {
    /// Data-volume share of one tail partner; uniform when the tail holds no
    /// training data at all.
    fn share(&self, partner_train_size: usize) -> f64 {
        if self.train_size > 0 {
            partner_train_size as f64 / self.train_size as f64
        } else {
            1.0 / self.count as f64
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
