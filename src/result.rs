//! Result record of one estimation run.

use std::fmt;
use std::time::Duration;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

// =============================================================================
// ContributivityResult
// =============================================================================

/// Output of one contributivity estimation run.
///
/// `normalized_scores` is `None` when the raw scores sum to zero (or to a
/// non-finite value); the record is then non-normalizable rather than NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributivityResult {
    /// Human-readable method name, e.g. `"Truncated MC Shapley values"`.
    pub name: String,
    /// Raw per-partner contributivity scores.
    pub scores: Array1<f64>,
    /// Standard error of each score (0 for deterministic methods).
    pub scores_std: Array1<f64>,
    /// Scores rescaled to sum to 1, when the raw sum allows it.
    pub normalized_scores: Option<Array1<f64>>,
    /// Session-cumulative evaluator invocations at the end of the run.
    pub evaluator_calls: u64,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
    /// False when the iteration ceiling was hit before the accuracy target.
    pub converged: bool,
}

impl ContributivityResult {
    /// Assemble a record, deriving the normalized vector from the raw scores.
    pub fn from_scores(
        name: impl Into<String>,
        scores: Array1<f64>,
        scores_std: Array1<f64>,
        evaluator_calls: u64,
        elapsed: Duration,
        converged: bool,
    ) -> Self {
        let sum = scores.sum();
        let normalized_scores = if sum != 0.0 && sum.is_finite() {
            Some(&scores / sum)
        } else {
            None
        };
        Self {
            name: name.into(),
            scores,
            scores_std,
            normalized_scores,
            evaluator_calls,
            elapsed,
            converged,
        }
    }

    /// The single-partner record every estimator degenerates to at N = 1.
    pub fn singleton(
        name: impl Into<String>,
        value: f64,
        evaluator_calls: u64,
        elapsed: Duration,
    ) -> Self {
        Self::from_scores(
            name,
            Array1::from_vec(vec![value]),
            Array1::zeros(1),
            evaluator_calls,
            elapsed,
            true,
        )
    }

    pub fn partner_count(&self) -> usize {
        self.scores.len()
    }
}

impl fmt::Display for ContributivityResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "Computation time: {:.3}s", self.elapsed.as_secs_f64())?;
        writeln!(
            f,
            "Characteristic function evaluations: {}",
            self.evaluator_calls
        )?;
        writeln!(f, "Contributivity scores: {:.3}", self.scores)?;
        writeln!(f, "Std of scores: {:.3}", self.scores_std)?;
        match &self.normalized_scores {
            Some(normalized) => write!(f, "Normalized scores: {normalized:.3}"),
            None => write!(f, "Normalized scores: (not normalizable, zero raw sum)"),
        }?;
        if !self.converged {
            write!(f, "\nWarning: accuracy target not reached")?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
