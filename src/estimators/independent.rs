//! Non-game-theoretic baselines.
//!
//! Both score every partner from its standalone model only. They are cheap
//! (n evaluator calls), ignore inter-partner synergies entirely, and exist as
//! reference points the Shapley methods are compared against.

use std::time::Instant;

use ndarray::Array1;

use crate::coalition::Coalition;
use crate::evaluator::CharacteristicFunction;
use crate::logger::EstimationLogger;
use crate::result::ContributivityResult;
use crate::session::Session;

use super::{ContributivityMethod, EstimationError};

// =============================================================================
// IndependentRaw
// =============================================================================

/// Each partner's score is the performance of its standalone model.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndependentRaw;

impl ContributivityMethod for IndependentRaw {
    fn name(&self) -> &'static str {
        "Independent scores raw"
    }

    fn estimate<E: CharacteristicFunction>(
        &self,
        session: &mut Session<E>,
        _seed: u64,
        logger: &EstimationLogger,
    ) -> Result<ContributivityResult, EstimationError> {
        let start = Instant::now();
        let n = session.partner_count();
        logger.start_run(self.name(), n);

        let mut scores = Array1::zeros(n);
        for k in 0..n {
            scores[k] = session.value(Coalition::singleton(k))?;
        }
        let result = ContributivityResult::from_scores(
            self.name(),
            scores,
            Array1::zeros(n),
            session.cache().calls(),
            start.elapsed(),
            true,
        );
        logger.finish_run(&result);
        Ok(result)
    }
}

// =============================================================================
// IndependentAdditive
// =============================================================================

/// Standalone scores pushed through a softmax and rescaled so they sum to the
/// grand-coalition performance, making the baseline additive.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndependentAdditive;

impl ContributivityMethod for IndependentAdditive {
    fn name(&self) -> &'static str {
        "Independent scores additive"
    }

    fn estimate<E: CharacteristicFunction>(
        &self,
        session: &mut Session<E>,
        _seed: u64,
        logger: &EstimationLogger,
    ) -> Result<ContributivityResult, EstimationError> {
        let start = Instant::now();
        let n = session.partner_count();
        logger.start_run(self.name(), n);

        let collaborative = session.value(session.grand_coalition())?;
        let mut standalone = Array1::zeros(n);
        for k in 0..n {
            standalone[k] = session.value(Coalition::singleton(k))?;
        }
        let scores = softmax(&standalone) * collaborative;
        let result = ContributivityResult::from_scores(
            self.name(),
            scores,
            Array1::zeros(n),
            session.cache().calls(),
            start.elapsed(),
            true,
        );
        logger.finish_run(&result);
        Ok(result)
    }
}

/// Numerically stable softmax.
fn softmax(values: &Array1<f64>) -> Array1<f64> {
    let max = values.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let exps = values.mapv(|v| (v - max).exp());
    let total = exps.sum();
    exps / total
}

// =============================================================================
// Tests
// =============================================================================
