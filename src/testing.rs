//! Testing utilities: cheap characteristic functions for tests and benches.
//!
//! Real evaluators train models; these games compute a closed-form score so
//! estimator behavior can be checked exactly and in bulk.

use crate::coalition::PartnerId;
use crate::evaluator::{CharacteristicFunction, EvaluationError};
use crate::scenario::TrainingConfig;

// =============================================================================
// Constants
// =============================================================================

/// Default tolerance for floating point comparisons in tests.
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

// =============================================================================
// AdditiveGame
// =============================================================================

/// `char(S) = Σ_{i∈S} w_i`. Every Shapley method must recover the weights
/// exactly (or converge to them).
#[derive(Debug, Clone)]
pub struct AdditiveGame {
    weights: Vec<f64>,
}

impl AdditiveGame {
    pub fn new(weights: Vec<f64>) -> Self {
        Self { weights }
    }
}

impl CharacteristicFunction for AdditiveGame {
    fn evaluate(
        &mut self,
        partners: &[PartnerId],
        _config: &TrainingConfig,
    ) -> Result<f64, EvaluationError> {
        Ok(partners.iter().map(|&p| self.weights[p]).sum())
    }
}

// =============================================================================
// FnGame
// =============================================================================

/// Characteristic function from a closure over the member list.
pub struct FnGame<F> {
    f: F,
}

impl<F: FnMut(&[PartnerId]) -> f64> FnGame<F> {
    /// Infallible game.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F: FnMut(&[PartnerId]) -> f64> CharacteristicFunction for FnGame<F> {
    fn evaluate(
        &mut self,
        partners: &[PartnerId],
        _config: &TrainingConfig,
    ) -> Result<f64, EvaluationError> {
        Ok((self.f)(partners))
    }
}

/// Fallible counterpart of [`FnGame`], for error-propagation tests.
pub struct TryFnGame<F> {
    f: F,
}

impl<F: FnMut(&[PartnerId]) -> Result<f64, EvaluationError>> TryFnGame<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F: FnMut(&[PartnerId]) -> Result<f64, EvaluationError>> CharacteristicFunction
    for TryFnGame<F>
{
    fn evaluate(
        &mut self,
        partners: &[PartnerId],
        _config: &TrainingConfig,
    ) -> Result<f64, EvaluationError> {
        (self.f)(partners)
    }
}

// =============================================================================
// VotingGame
// =============================================================================

/// Weighted majority game: `char(S) = 1` when the members' weights reach the
/// quota, else 0. Non-additive, with strong inter-partner synergies.
#[derive(Debug, Clone)]
pub struct VotingGame {
    weights: Vec<f64>,
    quota: f64,
}

impl VotingGame {
    pub fn new(weights: Vec<f64>, quota: f64) -> Self {
        Self { weights, quota }
    }
}

impl CharacteristicFunction for VotingGame {
    fn evaluate(
        &mut self,
        partners: &[PartnerId],
        _config: &TrainingConfig,
    ) -> Result<f64, EvaluationError> {
        let total: f64 = partners.iter().map(|&p| self.weights[p]).sum();
        Ok(if total >= self.quota { 1.0 } else { 0.0 })
    }
}
