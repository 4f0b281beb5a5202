//! Importance-sampling estimators with static surrogates.
//!
//! Uniform coalition sampling wastes evaluator calls on coalitions a partner
//! barely changes. These estimators bias each partner's draw toward
//! coalitions with a large predicted |increment| and undo the bias with
//! inverse-probability weights, so the estimate stays unbiased whatever the
//! surrogate predicts.
//!
//! Computing a partner's renormalization constant enumerates every subset of
//! its complement, and so does every draw. That exponential sweep is the
//! dominant cost of the family and caps it at roughly 15-20 partners.

use std::time::Instant;

use ndarray::Array1;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::coalition::{shapley_size_density, subsets_size_lex, Coalition, PartnerId};
use crate::evaluator::CharacteristicFunction;
use crate::exact::ExactShapley;
use crate::logger::EstimationLogger;
use crate::result::ContributivityResult;
use crate::session::Session;
use crate::stats::RunningStats;
use crate::stopping::{LoopDecision, VarianceScale};

use super::surrogate::{IncrementSurrogate, LinearSurrogate, RegressionSurrogate};
use super::{singleton_result, AccuracyParams, ContributivityMethod, EstimationError};

/// Renormalization constants below this are treated as degenerate.
const RENORM_TINY: f64 = 1e-12;

// =============================================================================
// Per-partner importance density
// =============================================================================

/// Sampling density of one partner under one surrogate.
///
/// When the surrogate predicts (numerically) zero increment everywhere for a
/// partner, the weighted density is undefined; the partner then falls back to
/// the natural Shapley size density with unit importance weight.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlayerDensity {
    pub renorm: f64,
    pub degenerate: bool,
}

/// Renormalization constant `Σ_S prob(|S|)·|approx(S, k)|` over every subset
/// of partner `k`'s complement.
pub(crate) fn player_density<S: IncrementSurrogate>(
    n: usize,
    partner: PartnerId,
    surrogate: &S,
) -> PlayerDensity {
    let pool = Coalition::grand(n).without(partner);
    let renorm: f64 = subsets_size_lex(pool)
        .map(|s| shapley_size_density(n, s.len()) * surrogate.approx_increment(s, partner).abs())
        .sum();
    PlayerDensity {
        renorm,
        degenerate: !(renorm > RENORM_TINY),
    }
}

/// Inverse-CDF draw of a coalition for `partner`, walking the complement's
/// subsets in size-lexicographic order.
pub(crate) fn draw_coalition<S: IncrementSurrogate>(
    n: usize,
    partner: PartnerId,
    surrogate: &S,
    density: &PlayerDensity,
    u: f64,
) -> Coalition {
    let pool = Coalition::grand(n).without(partner);
    let mut cumulative = 0.0;
    // Numeric tail fallback: the last subset with positive mass.
    let mut last_positive = pool;
    for subset in subsets_size_lex(pool) {
        let mass = if density.degenerate {
            shapley_size_density(n, subset.len())
        } else {
            shapley_size_density(n, subset.len())
                * surrogate.approx_increment(subset, partner).abs()
                / density.renorm
        };
        if mass > 0.0 {
            last_positive = subset;
        }
        cumulative += mass;
        if cumulative > u {
            return subset;
        }
    }
    last_positive
}

/// De-biased increment observation for one draw.
pub(crate) fn weighted_increment<S: IncrementSurrogate>(
    increment: f64,
    coalition: Coalition,
    partner: PartnerId,
    surrogate: &S,
    density: &PlayerDensity,
) -> f64 {
    if density.degenerate {
        increment
    } else {
        increment * density.renorm / surrogate.approx_increment(coalition, partner).abs()
    }
}

// =============================================================================
// Shared sampling loop
// =============================================================================

pub(crate) fn run_static_importance<E, S>(
    name: &str,
    session: &mut Session<E>,
    surrogate: &S,
    accuracy: &AccuracyParams,
    seed: u64,
    logger: &EstimationLogger,
    start: Instant,
) -> Result<ContributivityResult, EstimationError>
where
    E: CharacteristicFunction,
    S: IncrementSurrogate,
{
    let n = session.partner_count();
    let densities: Vec<PlayerDensity> = (0..n)
        .map(|k| player_density(n, k, surrogate))
        .collect();
    for (k, density) in densities.iter().enumerate() {
        if density.degenerate {
            logger.log_fallback(k, "surrogate predicts no contribution, using natural density");
        }
    }

    let rule = accuracy.stopping_rule(VarianceScale::Conservative);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut stats = vec![RunningStats::new(); n];
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
        for k in 0..n {
            let u = rng.gen::<f64>();
            let coalition = draw_coalition(n, k, surrogate, &densities[k], u);
            let increment = session.increment(coalition, k)?;
            stats[k].push(weighted_increment(
                increment,
                coalition,
                k,
                surrogate,
                &densities[k],
            ));
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

// =============================================================================
// LinearImportanceSampling
// =============================================================================

/// Importance sampling with the two-point linear surrogate.
#[derive(Debug, Clone, Copy)]
pub struct LinearImportanceSampling {
    pub accuracy: AccuracyParams,
}

impl Default for LinearImportanceSampling {
    fn default() -> Self {
        Self {
            accuracy: AccuracyParams::new(0.01, 0.95),
        }
    }
}

impl LinearImportanceSampling {
    pub fn new(accuracy: AccuracyParams) -> Self {
        Self { accuracy }
    }
}

impl ContributivityMethod for LinearImportanceSampling {
    fn name(&self) -> &'static str {
        "Linear importance sampling Shapley values"
    }

    fn estimate<E: CharacteristicFunction>(
        &self,
        session: &mut Session<E>,
        seed: u64,
        logger: &EstimationLogger,
    ) -> Result<ContributivityResult, EstimationError> {
        let start = Instant::now();
        self.accuracy.validate()?;
        let n = session.partner_count();
        logger.start_run(self.name(), n);
        if n == 1 {
            let result = singleton_result(self.name(), session, start)?;
            logger.finish_run(&result);
            return Ok(result);
        }

        let grand = session.grand_coalition();
        let grand_value = session.value(grand)?;
        let mut first = Vec::with_capacity(n);
        let mut last = Vec::with_capacity(n);
        for k in 0..n {
            last.push(grand_value - session.value(grand.without(k))?);
            first.push(session.value(Coalition::singleton(k))?);
        }
        let surrogate = LinearSurrogate::new(first, last, session.scenario());

        run_static_importance(
            self.name(),
            session,
            &surrogate,
            &self.accuracy,
            seed,
            logger,
            start,
        )
    }
}

// =============================================================================
// RegressionImportanceSampling
// =============================================================================

/// Importance sampling with a per-partner quadratic regression surrogate.
///
/// Below four partners the ledger is too thin for a stable fit and the method
/// simply runs the exact engine.
#[derive(Debug, Clone, Copy)]
pub struct RegressionImportanceSampling {
    pub accuracy: AccuracyParams,
}

impl Default for RegressionImportanceSampling {
    fn default() -> Self {
        Self {
            accuracy: AccuracyParams::new(0.01, 0.95),
        }
    }
}

impl RegressionImportanceSampling {
    pub fn new(accuracy: AccuracyParams) -> Self {
        Self { accuracy }
    }

    /// Seed the ledger with prefix walks of a few related permutations: one
    /// random order, its reverse, and its n right-rotations.
    fn seed_ledger<E: CharacteristicFunction>(
        session: &mut Session<E>,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Result<(), EstimationError> {
        let n = session.partner_count();
        let mut permutation: Vec<usize> = (0..n).collect();
        permutation.shuffle(rng);
        walk_prefixes(session, &permutation)?;
        permutation.reverse();
        walk_prefixes(session, &permutation)?;
        for _ in 0..n {
            permutation.rotate_right(1);
            walk_prefixes(session, &permutation)?;
        }
        Ok(())
    }
}

fn walk_prefixes<E: CharacteristicFunction>(
    session: &mut Session<E>,
    permutation: &[usize],
) -> Result<(), EstimationError> {
    let mut prefix = Coalition::EMPTY;
    for &partner in permutation {
        prefix = prefix.with(partner);
        session.value(prefix)?;
    }
    Ok(())
}

impl ContributivityMethod for RegressionImportanceSampling {
    fn name(&self) -> &'static str {
        "Regression importance sampling Shapley values"
    }

    fn estimate<E: CharacteristicFunction>(
        &self,
        session: &mut Session<E>,
        seed: u64,
        logger: &EstimationLogger,
    ) -> Result<ContributivityResult, EstimationError> {
        let start = Instant::now();
        self.accuracy.validate()?;
        let n = session.partner_count();
        logger.start_run(self.name(), n);

        if n < 4 {
            let scores = ExactShapley::compute(session)?;
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

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        Self::seed_ledger(session, &mut rng)?;
        let surrogate = RegressionSurrogate::fit(session.cache(), session.scenario())?;

        run_static_importance(
            self.name(),
            session,
            &surrogate,
            &self.accuracy,
            rng.gen(),
            logger,
            start,
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
    use crate::testing::{AdditiveGame, FnGame};
    use approx::assert_abs_diff_eq;

    struct ConstantSurrogate(f64);

    impl IncrementSurrogate for ConstantSurrogate {
        fn approx_increment(&self, _coalition: Coalition, _partner: PartnerId) -> f64 {
            self.0
        }
    }

    #[test]
    fn constant_surrogate_density_is_natural() {
        // With a constant |approx| the weighted density collapses to the
        // natural one and the renorm equals that constant.
        let density = player_density(4, 1, &ConstantSurrogate(2.5));
        assert!(!density.degenerate);
        assert_abs_diff_eq!(density.renorm, 2.5, epsilon = 1e-12);
    }

    #[test]
    fn zero_surrogate_degenerates_to_natural_density() {
        let density = player_density(3, 0, &ConstantSurrogate(0.0));
        assert!(density.degenerate);
        // Draws still cover the subset space.
        let s = draw_coalition(3, 0, &ConstantSurrogate(0.0), &density, 0.999);
        assert!(!s.contains(0));
    }

    #[test]
    fn draw_is_inverse_cdf_over_subsets() {
        let surrogate = ConstantSurrogate(1.0);
        let density = player_density(3, 2, &surrogate);
        // Complement of partner 2 in {0,1,2} is {0,1}; masses in size-lex
        // order: {} 1/3, {0} 1/6, {1} 1/6, {0,1} 1/3.
        assert_eq!(
            draw_coalition(3, 2, &surrogate, &density, 0.1),
            Coalition::EMPTY
        );
        assert_eq!(
            draw_coalition(3, 2, &surrogate, &density, 0.4),
            Coalition::singleton(0)
        );
        assert_eq!(
            draw_coalition(3, 2, &surrogate, &density, 0.6),
            Coalition::singleton(1)
        );
        assert_eq!(
            draw_coalition(3, 2, &surrogate, &density, 0.9),
            Coalition::from_members(&[0, 1])
        );
    }

    #[test]
    fn weighted_increment_undoes_the_bias() {
        // E[weighted] over the importance density equals the Shapley score;
        // check the identity pointwise: weight · g(S) == prob(S) · increment.
        let surrogate = ConstantSurrogate(3.0);
        let density = player_density(3, 0, &surrogate);
        let s = Coalition::singleton(1);
        let w = weighted_increment(0.7, s, 0, &surrogate, &density);
        let g = shapley_size_density(3, 1) * 3.0 / density.renorm;
        assert_abs_diff_eq!(
            w * g,
            shapley_size_density(3, 1) * 0.7,
            epsilon = 1e-12
        );
    }

    #[test]
    fn linear_is_converges_on_additive_game() {
        let scenario = Scenario::from_train_sizes(&[10, 20, 30]).unwrap();
        let mut session = Session::new(&scenario, AdditiveGame::new(vec![1.0, 2.0, 3.0]));
        let method = LinearImportanceSampling::new(
            AccuracyParams::new(0.05, 0.9).with_max_iterations(50_000),
        );
        let result = method
            .estimate(&mut session, 11, &EstimationLogger::silent())
            .unwrap();
        assert!(result.converged);
        for (score, expected) in result.scores.iter().zip([1.0, 2.0, 3.0]) {
            assert_abs_diff_eq!(*score, expected, epsilon = 0.05);
        }
    }

    #[test]
    fn regression_is_falls_back_to_exact_below_four() {
        let scenario = Scenario::from_train_sizes(&[10, 20, 30]).unwrap();
        let mut session = Session::new(&scenario, AdditiveGame::new(vec![1.0, 2.0, 3.0]));
        let result = RegressionImportanceSampling::default()
            .estimate(&mut session, 0, &EstimationLogger::silent())
            .unwrap();
        assert!(result.converged);
        for (score, expected) in result.scores.iter().zip([1.0, 2.0, 3.0]) {
            assert_abs_diff_eq!(*score, expected, epsilon = 1e-10);
        }
        assert_eq!(result.scores_std.sum(), 0.0);
    }

    #[test]
    fn regression_is_converges_on_four_partner_game() {
        let scenario = Scenario::from_train_sizes(&[10, 20, 30, 40]).unwrap();
        let mut session =
            Session::new(&scenario, AdditiveGame::new(vec![1.0, 2.0, 3.0, 4.0]));
        let method = RegressionImportanceSampling::new(
            AccuracyParams::new(0.05, 0.9).with_max_iterations(50_000),
        );
        let result = method
            .estimate(&mut session, 23, &EstimationLogger::silent())
            .unwrap();
        assert!(result.converged);
        for (score, expected) in result.scores.iter().zip([1.0, 2.0, 3.0, 4.0]) {
            assert_abs_diff_eq!(*score, expected, epsilon = 0.1);
        }
    }

    #[test]
    fn degenerate_renormalization_still_estimates() {
        // A null partner drives its linear surrogate to zero everywhere:
        // first and last increments both vanish. The run must not divide by
        // zero and must still score the null partner at ~0.
        let scenario = Scenario::from_train_sizes(&[10, 10, 10]).unwrap();
        let mut session = Session::new(
            &scenario,
            FnGame::new(|partners: &[usize]| {
                partners.iter().filter(|&&p| p < 2).count() as f64
            }),
        );
        let method = LinearImportanceSampling::new(
            AccuracyParams::new(0.05, 0.9).with_max_iterations(50_000),
        );
        let result = method
            .estimate(&mut session, 9, &EstimationLogger::silent())
            .unwrap();
        assert!(result.converged);
        assert_abs_diff_eq!(result.scores[2], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(result.scores[0], 1.0, epsilon = 0.05);
    }
}
