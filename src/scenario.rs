//! The collaborative-scenario surface the engine consumes.
//!
//! A [`Scenario`] is the engine's read-only view of a multi-partner project:
//! the ordered partner list (only training-set sizes are visible here) and the
//! training configuration forwarded opaquely to the evaluator. Dataset
//! acquisition, splitting and the training itself live outside this crate.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::coalition::{Coalition, PartnerId, MAX_PARTNERS};

// =============================================================================
// TrainingConfig
// =============================================================================

/// How partner updates are weighted when aggregating a federated model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationWeighting {
    /// Every partner weighs the same.
    Uniform,
    /// Partners weigh proportionally to their training-set size.
    DataVolume,
}

/// Training settings passed through to the external evaluator.
///
/// The engine never interprets these; they parameterize the characteristic
/// function the same way for every coalition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of training epochs per evaluation.
    pub epoch_count: u32,
    /// Number of minibatches per epoch.
    pub minibatch_count: u32,
    /// Aggregation weighting mode.
    pub aggregation_weighting: AggregationWeighting,
    /// Whether the evaluator may stop training early on plateau.
    pub is_early_stopping: bool,
    /// Optional folder the evaluator saves artifacts into.
    pub save_folder: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epoch_count: 40,
            minibatch_count: 20,
            aggregation_weighting: AggregationWeighting::Uniform,
            is_early_stopping: true,
            save_folder: None,
        }
    }
}

// =============================================================================
// Partner
// =============================================================================

/// One contributing data party. Content-opaque: the engine only ever reads
/// the training-set size (surrogate models and interpolation weight on it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partner {
    pub id: PartnerId,
    pub train_size: usize,
}

impl Partner {
    pub fn new(id: PartnerId, train_size: usize) -> Self {
        Self { id, train_size }
    }
}

// =============================================================================
// Scenario
// =============================================================================

/// Scenario construction error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScenarioError {
    #[error("a scenario needs at least one partner")]
    NoPartners,

    #[error("at most {MAX_PARTNERS} partners are supported, got {0}")]
    TooManyPartners(usize),

    #[error("epoch_count must be > 0")]
    InvalidEpochCount,

    #[error("minibatch_count must be > 0")]
    InvalidMinibatchCount,
}

/// Read-only description of one multi-partner collaboration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    partners: Vec<Partner>,
    config: TrainingConfig,
}

impl Scenario {
    /// Build a scenario, validating partner count and training settings.
    pub fn new(partners: Vec<Partner>, config: TrainingConfig) -> Result<Self, ScenarioError> {
        if partners.is_empty() {
            return Err(ScenarioError::NoPartners);
        }
        if partners.len() > MAX_PARTNERS {
            return Err(ScenarioError::TooManyPartners(partners.len()));
        }
        if config.epoch_count == 0 {
            return Err(ScenarioError::InvalidEpochCount);
        }
        if config.minibatch_count == 0 {
            return Err(ScenarioError::InvalidMinibatchCount);
        }
        Ok(Self { partners, config })
    }

    /// Convenience constructor: partners identified by position, default
    /// training configuration.
    pub fn from_train_sizes(sizes: &[usize]) -> Result<Self, ScenarioError> {
        let partners = sizes
            .iter()
            .enumerate()
            .map(|(id, &train_size)| Partner::new(id, train_size))
            .collect();
        Self::new(partners, TrainingConfig::default())
    }

    #[inline]
    pub fn partner_count(&self) -> usize {
        self.partners.len()
    }

    #[inline]
    pub fn partners(&self) -> &[Partner] {
        &self.partners
    }

    #[inline]
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Training-set size of one partner.
    #[inline]
    pub fn train_size(&self, partner: PartnerId) -> usize {
        self.partners[partner].train_size
    }

    /// Combined training-set size of a coalition.
    pub fn coalition_train_size(&self, coalition: Coalition) -> usize {
        coalition.members().map(|p| self.train_size(p)).sum()
    }

    /// Combined training-set size of all partners.
    pub fn total_train_size(&self) -> usize {
        self.partners.iter().map(|p| p.train_size).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================
