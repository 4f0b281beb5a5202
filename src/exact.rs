//! Exact Shapley values from full coalition enumeration.
//!
//! Exact computation costs `2^n - 1` evaluator calls and is only practical
//! for small partner counts; the estimators in [`crate::estimators`] exist
//! because of that wall. It is still the reference everything else is tested
//! against, and the regression importance-sampling estimator falls back to it
//! below four partners.

use std::collections::HashMap;
use std::time::Instant;

use ndarray::Array1;

use crate::coalition::{all_coalitions, shapley_size_density, subsets_size_lex, Coalition};
use crate::estimators::{ContributivityMethod, EstimationError};
use crate::evaluator::CharacteristicFunction;
use crate::logger::EstimationLogger;
use crate::result::ContributivityResult;
use crate::session::Session;

// =============================================================================
// Canonical-order solver
// =============================================================================

/// Exact Shapley scores from the characteristic values of all `2^n - 1`
/// non-empty coalitions, ordered by ascending size then lexicographically
/// within each size (the order produced by
/// [`all_coalitions`](crate::coalition::all_coalitions)).
///
/// The empty coalition is worth 0. For partner `i`,
/// `φ_i = Σ_{S ∌ i} (v(S ∪ {i}) - v(S)) / (n·C(n-1, |S|))`.
///
/// # Panics
/// If `values.len() != 2^n - 1` (caller bug).
pub fn shapley_from_values(n: usize, values: &[f64]) -> Array1<f64> {
    assert_eq!(
        values.len(),
        (1usize << n) - 1,
        "expected one characteristic value per non-empty coalition"
    );
    let mut by_coalition: HashMap<Coalition, f64> = HashMap::with_capacity(values.len() + 1);
    by_coalition.insert(Coalition::EMPTY, 0.0);
    for (coalition, &value) in all_coalitions(n).zip(values) {
        by_coalition.insert(coalition, value);
    }

    let mut scores = Array1::zeros(n);
    for partner in 0..n {
        let pool = Coalition::grand(n).without(partner);
        let mut score = 0.0;
        for base in subsets_size_lex(pool) {
            let increment = by_coalition[&base.with(partner)] - by_coalition[&base];
            score += shapley_size_density(n, base.len()) * increment;
        }
        scores[partner] = score;
    }
    scores
}

// =============================================================================
// ExactShapley
// =============================================================================

/// Full-enumeration Shapley computation through the session cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactShapley;

impl ExactShapley {
    pub const NAME: &'static str = "Shapley values";

    /// Enumerate every coalition, then solve. Shared with the estimators that
    /// fall back to exact computation for small partner counts.
    pub(crate) fn compute<E: CharacteristicFunction>(
        session: &mut Session<E>,
    ) -> Result<Array1<f64>, EstimationError> {
        let n = session.partner_count();
        let mut values = Vec::with_capacity((1 << n) - 1);
        for coalition in all_coalitions(n) {
            values.push(session.value(coalition)?);
        }
        Ok(shapley_from_values(n, &values))
    }
}

impl ContributivityMethod for ExactShapley {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn estimate<E: CharacteristicFunction>(
        &self,
        session: &mut Session<E>,
        _seed: u64,
        logger: &EstimationLogger,
    ) -> Result<ContributivityResult, EstimationError> {
        let start = Instant::now();
        logger.start_run(self.name(), session.partner_count());

        let scores = Self::compute(session)?;
        let n = session.partner_count();
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
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;
    use crate::testing::{AdditiveGame, FnGame};
    use approx::assert_abs_diff_eq;

    #[test]
    fn additive_game_recovers_weights() {
        let scenario = Scenario::from_train_sizes(&[10, 10, 10]).unwrap();
        let mut session = Session::new(&scenario, AdditiveGame::new(vec![1.0, 2.0, 3.0]));
        let result = ExactShapley
            .estimate(&mut session, 0, &EstimationLogger::silent())
            .unwrap();
        for (score, expected) in result.scores.iter().zip([1.0, 2.0, 3.0]) {
            assert_abs_diff_eq!(*score, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn efficiency_axiom() {
        // Superadditive toy game with interaction terms.
        let scenario = Scenario::from_train_sizes(&[10, 20, 30]).unwrap();
        let mut session = Session::new(
            &scenario,
            FnGame::new(|partners: &[usize]| {
                let base: f64 = partners.iter().map(|&p| (p + 1) as f64).sum();
                base + 0.5 * (partners.len() as f64).powi(2)
            }),
        );
        let grand_value = session.value(Coalition::grand(3)).unwrap();
        let result = ExactShapley
            .estimate(&mut session, 0, &EstimationLogger::silent())
            .unwrap();
        assert_abs_diff_eq!(result.scores.sum(), grand_value, epsilon = 1e-10);
    }

    #[test]
    fn symmetry_axiom() {
        // Partners 0 and 1 are interchangeable.
        let scenario = Scenario::from_train_sizes(&[10, 10, 10]).unwrap();
        let mut session = Session::new(
            &scenario,
            FnGame::new(|partners: &[usize]| {
                let has01 =
                    (partners.contains(&0) as u8 + partners.contains(&1) as u8) as f64;
                let has2 = partners.contains(&2) as u8 as f64;
                has01 * 2.0 + has2 * 5.0
            }),
        );
        let result = ExactShapley
            .estimate(&mut session, 0, &EstimationLogger::silent())
            .unwrap();
        assert_abs_diff_eq!(result.scores[0], result.scores[1], epsilon = 1e-12);
    }

    #[test]
    fn null_partner_axiom() {
        let scenario = Scenario::from_train_sizes(&[10, 10, 10]).unwrap();
        let mut session = Session::new(
            &scenario,
            FnGame::new(|partners: &[usize]| {
                // Partner 2 never contributes.
                partners.iter().filter(|&&p| p < 2).count() as f64 * 3.0
            }),
        );
        let result = ExactShapley
            .estimate(&mut session, 0, &EstimationLogger::silent())
            .unwrap();
        assert_abs_diff_eq!(result.scores[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn solver_rejects_wrong_length() {
        let outcome = std::panic::catch_unwind(|| shapley_from_values(3, &[1.0, 2.0]));
        assert!(outcome.is_err());
    }

    #[test]
    fn engine_uses_each_coalition_once() {
        let scenario = Scenario::from_train_sizes(&[10, 10, 10, 10]).unwrap();
        let mut session = Session::new(&scenario, AdditiveGame::new(vec![1.0; 4]));
        ExactShapley
            .estimate(&mut session, 0, &EstimationLogger::silent())
            .unwrap();
        assert_eq!(session.cache().calls(), (1 << 4) - 1);
    }
}
