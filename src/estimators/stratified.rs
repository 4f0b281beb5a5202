//! Stratified Monte-Carlo estimators.
//!
//! For each partner the marginal-contribution distribution is partitioned
//! into n strata by coalition size. Early iterations spread draws uniformly;
//! as per-stratum variance estimates firm up, a logistic schedule shifts the
//! allocation toward the noisy strata. Under the Shapley measure every size
//! is equally likely, so a partner's score is the plain average of its
//! per-stratum means.
//!
//! The support variant additionally memoizes draws within a stratum: a
//! redrawn coalition bumps a frequency weight instead of producing a fresh
//! sample, which matters in small strata where collisions are common.

use std::collections::HashMap;
use std::time::Instant;

use ndarray::Array1;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::coalition::{binomial, unrank_combination, Coalition};
use crate::evaluator::CharacteristicFunction;
use crate::logger::EstimationLogger;
use crate::result::ContributivityResult;
use crate::session::Session;
use crate::stats::{RunningStats, WeightedStats};
use crate::stopping::VarianceScale;

use super::{singleton_result, AccuracyParams, ContributivityMethod, EstimationError};

/// Logistic schedule midpoint, in units of `n` iterations.
const BLEND_GAMMA: f64 = 0.2;
/// Logistic schedule steepness, in units of `n` iterations.
const BLEND_BETA: f64 = 0.0075;
/// A stratum stops counting toward the loop condition past this many samples.
const STRATUM_SAMPLE_CAP: f64 = 20.0;

// =============================================================================
// Exploration/exploitation schedule
// =============================================================================

/// Blend weight `e(t)`: 0 keeps the stratum choice uniform, 1 makes it fully
/// variance-proportional. Rises logistically with the iteration count.
fn exploration_blend(t: u64, n: usize) -> f64 {
    let n = n as f64;
    1.0 / (1.0 + (-(t as f64 - BLEND_GAMMA * n) / (BLEND_BETA * n)).exp())
}

/// Stratum distribution for one partner: uniform blended toward
/// variance-proportional by `e`, restricted to the strata still below the
/// sample cap while any remain.
///
/// The restriction is what guarantees termination: once the schedule is
/// fully variance-proportional, a quiet stratum would otherwise never
/// collect the draws it needs to close.
fn stratum_distribution(variances: &[f64], open: &[bool], e: f64) -> Vec<f64> {
    let any_open = open.iter().any(|&o| o);
    let in_support = |i: usize| !any_open || open[i];

    let support_len = (0..variances.len()).filter(|&i| in_support(i)).count();
    let total: f64 = variances
        .iter()
        .enumerate()
        .filter(|&(i, _)| in_support(i))
        .map(|(_, &v)| v)
        .sum();

    (0..variances.len())
        .map(|i| {
            if !in_support(i) {
                0.0
            } else if total <= 0.0 {
                1.0 / support_len as f64
            } else {
                (1.0 - e) / support_len as f64 + e * variances[i] / total
            }
        })
        .collect()
}

/// Inverse-CDF pick from a discrete distribution.
fn sample_index(probabilities: &[f64], u: f64) -> usize {
    let mut cumulative = 0.0;
    for (i, &p) in probabilities.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return i;
        }
    }
    probabilities.len() - 1
}

/// Uniform coalition of `size` members from `pool`.
fn draw_stratum_coalition<R: Rng>(pool: Coalition, size: usize, rng: &mut R) -> Coalition {
    let count = binomial(pool.len(), size) as u64;
    let rank = rng.gen_range(0..count);
    unrank_combination(pool, size, rank)
}

// =============================================================================
// Per-stratum statistics
// =============================================================================

/// What both variants must expose per (partner, stratum).
trait StratumStats: Default + Clone {
    fn mean(&self) -> f64;
    fn variance(&self) -> f64;
    /// Total draw count, with multiplicity.
    fn draws(&self) -> f64;
}

impl StratumStats for RunningStats {
    fn mean(&self) -> f64 {
        RunningStats::mean(self)
    }
    fn variance(&self) -> f64 {
        RunningStats::variance(self)
    }
    fn draws(&self) -> f64 {
        self.count() as f64
    }
}

/// Memoizing stratum: unique draws with frequency weights.
#[derive(Debug, Clone, Default)]
struct SupportStratum {
    seen: HashMap<Coalition, f64>,
    stats: WeightedStats,
}

impl SupportStratum {
    /// Record a draw, evaluating only on first sight of the coalition.
    fn record<E: CharacteristicFunction>(
        &mut self,
        session: &mut Session<E>,
        coalition: Coalition,
        partner: usize,
    ) -> Result<(), EstimationError> {
        let increment = match self.seen.get(&coalition) {
            Some(&known) => known,
            None => {
                let increment = session.increment(coalition, partner)?;
                self.seen.insert(coalition, increment);
                increment
            }
        };
        self.stats.push(increment, 1);
        Ok(())
    }
}

impl StratumStats for SupportStratum {
    fn mean(&self) -> f64 {
        self.stats.mean()
    }
    fn variance(&self) -> f64 {
        self.stats.variance()
    }
    fn draws(&self) -> f64 {
        self.stats.total_weight()
    }
}

// =============================================================================
// Shared sampling loop
// =============================================================================

/// Worst-partner estimator variance: `var_k = Σ_s σ²_ks / n_ks / n²`,
/// infinite while any stratum is still unsampled.
fn estimator_variances<S: StratumStats>(strata: &[Vec<S>]) -> Vec<f64> {
    let n = strata.len();
    strata
        .iter()
        .map(|partner_strata| {
            let mut var = 0.0;
            for stratum in partner_strata {
                if stratum.draws() == 0.0 {
                    return f64::INFINITY;
                }
                var += stratum.variance() / stratum.draws();
            }
            var / (n * n) as f64
        })
        .collect()
}

fn run_stratified<E, S, F>(
    name: &str,
    session: &mut Session<E>,
    accuracy: &AccuracyParams,
    seed: u64,
    logger: &EstimationLogger,
    mut record: F,
) -> Result<ContributivityResult, EstimationError>
where
    E: CharacteristicFunction,
    S: StratumStats,
    F: FnMut(&mut Session<E>, &mut S, Coalition, usize) -> Result<(), EstimationError>,
{
    let start = Instant::now();
    accuracy.validate()?;
    let n = session.partner_count();
    logger.start_run(name, n);
    if n == 1 {
        let result = singleton_result(name, session, start)?;
        logger.finish_run(&result);
        return Ok(result);
    }

    session.value(session.grand_coalition())?;
    let rule = accuracy.stopping_rule(VarianceScale::Conservative);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut strata: Vec<Vec<S>> = vec![vec![S::default(); n]; n];
    let mut t: u64 = 0;
    let mut v_max = f64::INFINITY;

    let converged = loop {
        let any_open = strata
            .iter()
            .flatten()
            .any(|s| s.draws() <= STRATUM_SAMPLE_CAP);
        if !any_open && !rule.bound_unmet(v_max) {
            break true;
        }
        if t >= rule.max_iterations() {
            logger.log_ceiling(t);
            break false;
        }
        t += 1;
        let e = exploration_blend(t, n);

        for k in 0..n {
            let variances: Vec<f64> =
                strata[k].iter().map(StratumStats::variance).collect();
            let open: Vec<bool> = strata[k]
                .iter()
                .map(|s| s.draws() <= STRATUM_SAMPLE_CAP)
                .collect();
            let p = stratum_distribution(&variances, &open, e);
            let size = sample_index(&p, rng.gen::<f64>());
            let pool = session.grand_coalition().without(k);
            let coalition = draw_stratum_coalition(pool, size, &mut rng);
            record(session, &mut strata[k][size], coalition, k)?;
        }

        v_max = estimator_variances(&strata)
            .into_iter()
            .fold(0.0, f64::max);
        logger.log_progress(t, v_max);
    };

    let scores = Array1::from_iter(strata.iter().map(|partner_strata| {
        partner_strata.iter().map(StratumStats::mean).sum::<f64>() / n as f64
    }));
    let scores_std = Array1::from_iter(
        estimator_variances(&strata)
            .into_iter()
            .map(|v| if v.is_finite() { v.sqrt() } else { f64::INFINITY }),
    );
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

// =============================================================================
// StratifiedMC
// =============================================================================

/// Stratified Monte-Carlo Shapley estimation.
#[derive(Debug, Clone, Copy)]
pub struct StratifiedMC {
    pub accuracy: AccuracyParams,
}

impl Default for StratifiedMC {
    fn default() -> Self {
        Self {
            accuracy: AccuracyParams::new(0.01, 0.95),
        }
    }
}

impl StratifiedMC {
    pub fn new(accuracy: AccuracyParams) -> Self {
        Self { accuracy }
    }
}

impl ContributivityMethod for StratifiedMC {
    fn name(&self) -> &'static str {
        "Stratified MC Shapley values"
    }

    fn estimate<E: CharacteristicFunction>(
        &self,
        session: &mut Session<E>,
        seed: u64,
        logger: &EstimationLogger,
    ) -> Result<ContributivityResult, EstimationError> {
        run_stratified::<E, RunningStats, _>(
            self.name(),
            session,
            &self.accuracy,
            seed,
            logger,
            |session, stats, coalition, partner| {
                let increment = session.increment(coalition, partner)?;
                stats.push(increment);
                Ok(())
            },
        )
    }
}

// =============================================================================
// SupportStratifiedMC
// =============================================================================

/// Stratified Monte Carlo with within-stratum memoization of repeated draws.
#[derive(Debug, Clone, Copy)]
pub struct SupportStratifiedMC {
    pub accuracy: AccuracyParams,
}

impl Default for SupportStratifiedMC {
    fn default() -> Self {
        Self {
            accuracy: AccuracyParams::new(0.01, 0.95),
        }
    }
}

impl SupportStratifiedMC {
    pub fn new(accuracy: AccuracyParams) -> Self {
        Self { accuracy }
    }
}

impl ContributivityMethod for SupportStratifiedMC {
    fn name(&self) -> &'static str {
        "Support stratified MC Shapley values"
    }

    fn estimate<E: CharacteristicFunction>(
        &self,
        session: &mut Session<E>,
        seed: u64,
        logger: &EstimationLogger,
    ) -> Result<ContributivityResult, EstimationError> {
        run_stratified::<E, SupportStratum, _>(
            self.name(),
            session,
            &self.accuracy,
            seed,
            logger,
            |session, stratum, coalition, partner| {
                stratum.record(session, coalition, partner)
            },
        )
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
    use rstest::rstest;

    #[test]
    fn blend_rises_from_uniform_to_variance_driven() {
        assert!(exploration_blend(0, 5) < 0.01);
        assert!(exploration_blend(100, 5) > 0.99);
        assert!(exploration_blend(0, 5) < exploration_blend(2, 5));
    }

    #[test]
    fn stratum_distribution_is_normalized() {
        let open = [true, true, true];
        let p = stratum_distribution(&[1.0, 3.0, 0.0], &open, 0.5);
        assert_abs_diff_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        // Higher variance gets more mass once e > 0.
        assert!(p[1] > p[0]);
        assert!(p[0] > p[2]);
    }

    #[test]
    fn zero_variance_distribution_is_uniform() {
        let p = stratum_distribution(&[0.0, 0.0], &[true, true], 0.9);
        assert_abs_diff_eq!(p[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn closed_strata_are_starved_until_all_close() {
        // Stratum 1 is past the cap: all mass goes to the open ones even
        // though stratum 1 holds all the variance.
        let p = stratum_distribution(&[0.0, 5.0, 0.0], &[true, false, true], 1.0);
        assert_eq!(p[1], 0.0);
        assert_abs_diff_eq!(p[0], 0.5, epsilon = 1e-12);

        // Once every stratum is closed the blend is unrestricted again.
        let p = stratum_distribution(&[0.0, 5.0, 0.0], &[false, false, false], 1.0);
        assert_abs_diff_eq!(p[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn sample_index_walks_cumulative() {
        let p = [0.25, 0.25, 0.5];
        assert_eq!(sample_index(&p, 0.1), 0);
        assert_eq!(sample_index(&p, 0.3), 1);
        assert_eq!(sample_index(&p, 0.99), 2);
    }

    #[test]
    fn drawn_coalition_matches_requested_stratum() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let pool = Coalition::grand(6).without(2);
        for size in 0..=5 {
            for _ in 0..20 {
                let c = draw_stratum_coalition(pool, size, &mut rng);
                assert_eq!(c.len(), size);
                assert!(!c.contains(2));
            }
        }
    }

    #[rstest]
    #[case::plain(0)]
    #[case::support(1)]
    fn converges_on_additive_game(#[case] variant: usize) {
        let scenario = Scenario::from_train_sizes(&[10, 20, 30]).unwrap();
        let mut session = Session::new(&scenario, AdditiveGame::new(vec![1.0, 2.0, 3.0]));
        let accuracy = AccuracyParams::new(0.05, 0.9).with_max_iterations(20_000);
        let result = match variant {
            0 => StratifiedMC::new(accuracy).estimate(
                &mut session,
                29,
                &EstimationLogger::silent(),
            ),
            _ => SupportStratifiedMC::new(accuracy).estimate(
                &mut session,
                29,
                &EstimationLogger::silent(),
            ),
        }
        .unwrap();
        assert!(result.converged);
        for (score, expected) in result.scores.iter().zip([1.0, 2.0, 3.0]) {
            assert_abs_diff_eq!(*score, expected, epsilon = 0.1);
        }
    }

    #[test]
    fn support_variant_never_outspends_plain() {
        let scenario = Scenario::from_train_sizes(&[10, 20, 30, 40]).unwrap();
        let accuracy = AccuracyParams::new(0.1, 0.9).with_max_iterations(5_000);

        let mut plain_session =
            Session::new(&scenario, AdditiveGame::new(vec![1.0, 2.0, 3.0, 4.0]));
        StratifiedMC::new(accuracy)
            .estimate(&mut plain_session, 5, &EstimationLogger::silent())
            .unwrap();

        let mut support_session =
            Session::new(&scenario, AdditiveGame::new(vec![1.0, 2.0, 3.0, 4.0]));
        SupportStratifiedMC::new(accuracy)
            .estimate(&mut support_session, 5, &EstimationLogger::silent())
            .unwrap();

        // Memoized draws skip the cache path entirely; the shared value cache
        // already dedups evaluator calls, so counts can only shrink further.
        assert!(
            support_session.cache().calls() <= plain_session.cache().calls(),
            "support {} > plain {}",
            support_session.cache().calls(),
            plain_session.cache().calls()
        );
    }

    #[test]
    fn singleton_short_circuit() {
        let scenario = Scenario::from_train_sizes(&[10]).unwrap();
        let mut session = Session::new(&scenario, AdditiveGame::new(vec![7.0]));
        let result = StratifiedMC::default()
            .estimate(&mut session, 0, &EstimationLogger::silent())
            .unwrap();
        assert_eq!(result.scores.as_slice().unwrap(), &[7.0]);
        assert_eq!(result.scores_std[0], 0.0);
    }
}
