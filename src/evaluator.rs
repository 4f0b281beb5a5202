//! The external characteristic function.
//!
//! Evaluating a coalition usually means training and scoring a model on the
//! pooled data of its members, which is why every estimator in this crate is
//! built around calling it as few times as possible. Implementations live
//! outside the crate; tests use the cheap games in [`crate::testing`].

use crate::coalition::PartnerId;
use crate::scenario::TrainingConfig;

// =============================================================================
// Errors
// =============================================================================

/// Failure raised by an external evaluator.
///
/// Estimators propagate these unmodified and abort the current run; values
/// already cached stay available to later runs in the same session.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// The training/evaluation step itself failed.
    #[error("evaluation failed for coalition {coalition:?}: {reason}")]
    Failed {
        coalition: Vec<PartnerId>,
        reason: String,
    },

    /// Any other evaluator-side error.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl EvaluationError {
    pub fn failed(coalition: &[PartnerId], reason: impl Into<String>) -> Self {
        EvaluationError::Failed {
            coalition: coalition.to_vec(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// CharacteristicFunction
// =============================================================================

/// Maps a coalition of partners to its achieved performance score.
///
/// Expensive by assumption: a call may train a model end to end. The session
/// cache guarantees at most one call per distinct coalition, and treats the
/// returned score as deterministic from then on.
pub trait CharacteristicFunction {
    /// Score the model obtained from the given partners (ascending ids).
    ///
    /// `partners` is never empty; the empty coalition is worth 0 by
    /// convention and is not evaluated.
    fn evaluate(
        &mut self,
        partners: &[PartnerId],
        config: &TrainingConfig,
    ) -> Result<f64, EvaluationError>;
}

impl<E: CharacteristicFunction + ?Sized> CharacteristicFunction for &mut E {
    fn evaluate(
        &mut self,
        partners: &[PartnerId],
        config: &TrainingConfig,
    ) -> Result<f64, EvaluationError> {
        (**self).evaluate(partners, config)
    }
}
