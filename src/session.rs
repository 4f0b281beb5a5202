//! One estimation session: scenario + evaluator + shared cache.
//!
//! All estimators run against a [`Session`], so evaluator calls made by one
//! method are reused by the next. The session is discarded when the caller is
//! done comparing methods on a scenario.

use crate::cache::ValueCache;
use crate::coalition::{Coalition, PartnerId};
use crate::evaluator::{CharacteristicFunction, EvaluationError};
use crate::scenario::Scenario;

// =============================================================================
// Session
// =============================================================================

/// Estimation scope tying a scenario to an evaluator through the value cache.
pub struct Session<'a, E> {
    scenario: &'a Scenario,
    evaluator: E,
    cache: ValueCache,
}

impl<'a, E: CharacteristicFunction> Session<'a, E> {
    pub fn new(scenario: &'a Scenario, evaluator: E) -> Self {
        let cache = ValueCache::new(scenario.partner_count());
        Self {
            scenario,
            evaluator,
            cache,
        }
    }

    #[inline]
    pub fn scenario(&self) -> &Scenario {
        self.scenario
    }

    #[inline]
    pub fn partner_count(&self) -> usize {
        self.scenario.partner_count()
    }

    /// The grand coalition of this scenario.
    #[inline]
    pub fn grand_coalition(&self) -> Coalition {
        Coalition::grand(self.partner_count())
    }

    #[inline]
    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    /// Characteristic value of a coalition, memoized.
    pub fn value(&mut self, coalition: Coalition) -> Result<f64, EvaluationError> {
        self.cache
            .value(coalition, &mut self.evaluator, self.scenario.config())
    }

    /// Marginal contribution of `partner` on top of `base`:
    /// `v(base ∪ {partner}) - v(base)`.
    ///
    /// # Panics
    /// If `partner` is already a member of `base` (caller bug).
    pub fn increment(
        &mut self,
        base: Coalition,
        partner: PartnerId,
    ) -> Result<f64, EvaluationError> {
        assert!(
            !base.contains(partner),
            "partner {partner} is already in the reference coalition {base:?}"
        );
        let with = self.value(base.with(partner))?;
        let without = self.value(base)?;
        Ok(with - without)
    }
}

// =============================================================================
// Tests
// =============================================================================
