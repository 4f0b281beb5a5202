//! contributivity: Shapley-value attribution for multi-partner data
//! collaborations.
//!
//! When several partners pool data to train one model, the performance of
//! that model is a collective achievement. This crate attributes it: the
//! partners are players of a cooperative game whose characteristic function
//! is the (expensive, externally supplied) "train on this coalition and
//! score it" evaluation, and each partner's contributivity is its Shapley
//! value under that game.
//!
//! Exact Shapley computation needs `2^n - 1` evaluations, so beyond a
//! handful of partners the crate estimates instead, with a family of
//! samplers that trade evaluator calls against confidence-interval width.
//!
//! # Key Types
//!
//! - [`Scenario`] / [`Partner`] / [`TrainingConfig`] - The collaboration
//!   being scored
//! - [`CharacteristicFunction`] - The external evaluator trait
//! - [`Session`] - One estimation scope; caches every evaluation
//! - [`ContributivityMethod`] - Trait implemented by every estimator
//! - [`ContributivityResult`] - Scores, stds, normalized scores, call count
//!
//! # Methods
//!
//! - [`ExactShapley`] - Full enumeration (small n)
//! - [`TruncatedMC`] / [`InterpolatedTMC`] - Permutation Monte Carlo
//! - [`LinearImportanceSampling`] / [`RegressionImportanceSampling`] /
//!   [`KrigingAdaptiveSampling`] - Surrogate-guided importance sampling
//! - [`StratifiedMC`] / [`SupportStratifiedMC`] - Variance-driven
//!   stratification over coalition sizes
//! - [`IndependentRaw`] / [`IndependentAdditive`] - Standalone baselines
//!
//! # Example
//!
//! ```
//! use contributivity::{
//!     ContributivityMethod, EstimationLogger, Scenario, Session, TruncatedMC,
//! };
//! use contributivity::testing::AdditiveGame;
//!
//! let scenario = Scenario::from_train_sizes(&[100, 200, 300]).unwrap();
//! let mut session = Session::new(&scenario, AdditiveGame::new(vec![1.0, 2.0, 3.0]));
//! let result = TruncatedMC::default()
//!     .estimate(&mut session, 42, &EstimationLogger::silent())
//!     .unwrap();
//! assert_eq!(result.partner_count(), 3);
//! ```

// Re-export approx traits for users comparing score vectors in tests
pub use approx;

pub mod cache;
pub mod coalition;
pub mod estimators;
pub mod evaluator;
pub mod exact;
pub mod logger;
pub mod result;
pub mod scenario;
pub mod session;
pub mod stats;
pub mod stopping;
pub mod testing;

// =============================================================================
// Convenience Re-exports
// =============================================================================

// Core session types
pub use cache::ValueCache;
pub use coalition::{Coalition, PartnerId, MAX_PARTNERS};
pub use evaluator::{CharacteristicFunction, EvaluationError};
pub use scenario::{AggregationWeighting, Partner, Scenario, ScenarioError, TrainingConfig};
pub use session::Session;

// Estimation methods
pub use estimators::{
    AccuracyParams, ContributivityMethod, EstimationError, IndependentAdditive, IndependentRaw,
    InterpolatedTMC, KrigingAdaptiveSampling, LinearImportanceSampling, ParamValidationError,
    RegressionImportanceSampling, StratifiedMC, SupportStratifiedMC, TruncatedMC,
};
pub use exact::{shapley_from_values, ExactShapley};

// Run output and logging
pub use logger::{EstimationLogger, Verbosity};
pub use result::ContributivityResult;
