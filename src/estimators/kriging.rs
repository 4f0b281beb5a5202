//! Adaptive importance sampling with periodically refitted kriging surrogates.
//!
//! Unlike the static surrogates, the kriging model is refit every `update`
//! iterations from the growing increment ledger, so the sampling density
//! sharpens as evidence accumulates. Each refit produces an immutable round
//! (models plus renormalization constants); draws made under a round are
//! de-biased against that same round, which keeps every round's contribution
//! unbiased.

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

use super::importance::{draw_coalition, player_density, weighted_increment, PlayerDensity};
use super::surrogate::KrigingSurrogate;
use super::{
    singleton_result, AccuracyParams, ContributivityMethod, EstimationError,
    ParamValidationError,
};

// =============================================================================
// KrigingAdaptiveSampling
// =============================================================================

/// Kriging-surrogate adaptive importance sampling.
#[derive(Debug, Clone, Copy)]
pub struct KrigingAdaptiveSampling {
    pub accuracy: AccuracyParams,
    /// Surrogate refit period, in iterations.
    pub update: u64,
    /// Polynomial trend degree of the kriging model.
    pub degree: usize,
}

impl Default for KrigingAdaptiveSampling {
    fn default() -> Self {
        Self {
            accuracy: AccuracyParams::new(0.01, 0.95),
            update: 50,
            degree: 2,
        }
    }
}

impl KrigingAdaptiveSampling {
    pub fn new(accuracy: AccuracyParams, update: u64) -> Self {
        Self {
            accuracy,
            update,
            ..Default::default()
        }
    }

    pub fn with_degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    fn validate(&self) -> Result<(), ParamValidationError> {
        self.accuracy.validate()?;
        if self.update == 0 {
            return Err(ParamValidationError::InvalidUpdatePeriod);
        }
        Ok(())
    }

    /// Evaluate the coalitions that fuel the first fit: grand, singletons and
    /// their complements, pairs and their complements.
    fn seed_ledger<E: CharacteristicFunction>(
        session: &mut Session<E>,
    ) -> Result<(), EstimationError> {
        let n = session.partner_count();
        let grand = session.grand_coalition();
        session.value(grand)?;
        for k1 in 0..n {
            session.value(Coalition::singleton(k1))?;
            session.value(grand.without(k1))?;
            for k2 in k1 + 1..n {
                let pair = Coalition::singleton(k1).with(k2);
                session.value(pair)?;
                session.value(grand.without(k1).without(k2))?;
            }
        }
        Ok(())
    }
}

/// One refit checkpoint: surrogate models and their renormalization
/// constants. Immutable once produced.
struct SurrogateRound {
    surrogate: KrigingSurrogate,
    densities: Vec<PlayerDensity>,
}

impl SurrogateRound {
    fn fit<E: CharacteristicFunction>(
        session: &Session<E>,
        degree: usize,
        logger: &EstimationLogger,
    ) -> Result<Self, EstimationError> {
        let n = session.partner_count();
        let surrogate = KrigingSurrogate::fit(session.cache(), session.scenario(), degree)?;
        let densities: Vec<PlayerDensity> = (0..n)
            .map(|k| player_density(n, k, &surrogate))
            .collect();
        for (k, density) in densities.iter().enumerate() {
            if density.degenerate {
                logger.log_fallback(k, "surrogate predicts no contribution, using natural density");
            }
        }
        Ok(Self {
            surrogate,
            densities,
        })
    }
}

impl ContributivityMethod for KrigingAdaptiveSampling {
    fn name(&self) -> &'static str {
        "Kriging adaptive importance sampling Shapley values"
    }

    fn estimate<E: CharacteristicFunction>(
        &self,
        session: &mut Session<E>,
        seed: u64,
        logger: &EstimationLogger,
    ) -> Result<ContributivityResult, EstimationError> {
        let start = Instant::now();
        self.validate()?;
        let n = session.partner_count();
        logger.start_run(self.name(), n);
        if n == 1 {
            let result = singleton_result(self.name(), session, start)?;
            logger.finish_run(&result);
            return Ok(result);
        }

        Self::seed_ledger(session)?;

        // At two partners the seeding pass has already evaluated every
        // coalition, and the ledger is too thin for a quadratic trend; the
        // exact solution is free at this point.
        if n == 2 {
            let scores = crate::exact::ExactShapley::compute(session)?;
            let result = ContributivityResult::from_scores(
                self.name(),
                scores,
                Array1::zeros(n),
                session.cache().calls(),
                start.elapsed(),
                true,
            );
            logger.finish_run(&result);
            return Ok(result);
        }

        let rule = self.accuracy.stopping_rule(VarianceScale::Conservative);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut stats = vec![RunningStats::new(); n];
        let mut rounds: Vec<SurrogateRound> = Vec::new();
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
            // Synchronous refit checkpoint, strictly ordered with sampling.
            if t % self.update == 0 {
                rounds.push(SurrogateRound::fit(session, self.degree, logger)?);
            }
            t += 1;
            let round = rounds.last().expect("a round is fit before the first draw");

            for k in 0..n {
                let u = rng.gen::<f64>();
                let coalition =
                    draw_coalition(n, k, &round.surrogate, &round.densities[k], u);
                let increment = session.increment(coalition, k)?;
                stats[k].push(weighted_increment(
                    increment,
                    coalition,
                    k,
                    &round.surrogate,
                    &round.densities[k],
                ));
            }
            v_max = stats.iter().map(RunningStats::variance).fold(0.0, f64::max);
            logger.log_progress(t, v_max);
        };

        let scores = Array1::from_iter(stats.iter().map(RunningStats::mean));
        let spread = ((t - 1) as f64).sqrt();
        let scores_std = Array1::from_iter(stats.iter().map(|s| s.std() / spread));
        let result = ContributivityResult::from_scores(
            self.name(),
            scores,
            scores_std,
            session.cache().calls(),
            start.elapsed(),
            converged,
        );
        logger.finish_run(&result);
        Ok(result)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;
    use crate::testing::AdditiveGame;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rejects_zero_update_period() {
        let method = KrigingAdaptiveSampling::new(AccuracyParams::default(), 0);
        let scenario = Scenario::from_train_sizes(&[10, 20]).unwrap();
        let mut session = Session::new(&scenario, AdditiveGame::new(vec![1.0, 2.0]));
        let err = method
            .estimate(&mut session, 0, &EstimationLogger::silent())
            .unwrap_err();
        assert!(matches!(
            err,
            EstimationError::InvalidParams(ParamValidationError::InvalidUpdatePeriod)
        ));
    }

    #[test]
    fn singleton_short_circuit() {
        let scenario = Scenario::from_train_sizes(&[10]).unwrap();
        let mut session = Session::new(&scenario, AdditiveGame::new(vec![2.5]));
        let result = KrigingAdaptiveSampling::default()
            .estimate(&mut session, 1, &EstimationLogger::silent())
            .unwrap();
        assert_eq!(result.scores.as_slice().unwrap(), &[2.5]);
    }

    #[test]
    fn converges_on_additive_game() {
        let scenario = Scenario::from_train_sizes(&[10, 20, 30]).unwrap();
        let mut session = Session::new(&scenario, AdditiveGame::new(vec![1.0, 2.0, 3.0]));
        let method = KrigingAdaptiveSampling::new(
            AccuracyParams::new(0.05, 0.9).with_max_iterations(20_000),
            50,
        );
        let result = method
            .estimate(&mut session, 17, &EstimationLogger::silent())
            .unwrap();
        assert!(result.converged);
        for (score, expected) in result.scores.iter().zip([1.0, 2.0, 3.0]) {
            assert_abs_diff_eq!(*score, expected, epsilon = 0.1);
        }
    }

    #[test]
    fn seeding_covers_singletons_and_complements() {
        let scenario = Scenario::from_train_sizes(&[10, 20, 30, 40]).unwrap();
        let mut session =
            Session::new(&scenario, AdditiveGame::new(vec![1.0, 2.0, 3.0, 4.0]));
        KrigingAdaptiveSampling::seed_ledger(&mut session).unwrap();
        let cache = session.cache();
        assert!(cache.contains(Coalition::grand(4)));
        for k in 0..4 {
            assert!(cache.contains(Coalition::singleton(k)));
            assert!(cache.contains(Coalition::grand(4).without(k)));
            // Every partner has ledger evidence to fit on.
            assert!(cache.increments(k).len() >= 3);
        }
    }
}
