//! Memoized characteristic values and the increment ledger.
//!
//! The cache is the single gate in front of the external evaluator: every
//! estimator reads coalition values through it, and each distinct coalition is
//! evaluated at most once per session. As a side effect of every fill it
//! derives marginal-contribution records ("increments") for the ledger, which
//! the surrogate models are fit on.

use std::collections::HashMap;

use crate::coalition::{Coalition, PartnerId};
use crate::evaluator::{CharacteristicFunction, EvaluationError};
use crate::scenario::TrainingConfig;

// =============================================================================
// ValueCache
// =============================================================================

/// Characteristic-value memo, increment ledger and evaluator-call counter for
/// one estimation session.
#[derive(Debug)]
pub struct ValueCache {
    partner_count: usize,
    values: HashMap<Coalition, f64>,
    ledger: Vec<HashMap<Coalition, f64>>,
    calls: u64,
}

impl ValueCache {
    /// Empty cache for `n` partners. The empty coalition is pre-seeded at 0.
    pub fn new(partner_count: usize) -> Self {
        let mut values = HashMap::new();
        values.insert(Coalition::EMPTY, 0.0);
        Self {
            partner_count,
            values,
            ledger: vec![HashMap::new(); partner_count],
            calls: 0,
        }
    }

    /// Characteristic value of `coalition`, evaluating on a miss.
    ///
    /// The first value observed for a coalition is memoized for the whole
    /// session; a stochastic evaluator is never re-sampled.
    pub fn value<E: CharacteristicFunction>(
        &mut self,
        coalition: Coalition,
        evaluator: &mut E,
        config: &TrainingConfig,
    ) -> Result<f64, EvaluationError> {
        if let Some(&v) = self.values.get(&coalition) {
            return Ok(v);
        }
        let members = coalition.to_vec();
        let value = evaluator.evaluate(&members, config)?;
        self.calls += 1;
        self.values.insert(coalition, value);
        self.record_increments(coalition);
        Ok(value)
    }

    /// Number of evaluator invocations so far.
    #[inline]
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Already-cached value, if any. Never evaluates.
    #[inline]
    pub fn get(&self, coalition: Coalition) -> Option<f64> {
        self.values.get(&coalition).copied()
    }

    #[inline]
    pub fn contains(&self, coalition: Coalition) -> bool {
        self.values.contains_key(&coalition)
    }

    /// Known increments of one partner: `ledger[S] = v(S ∪ {p}) - v(S)`,
    /// with `p ∉ S` and both coalitions cached.
    #[inline]
    pub fn increments(&self, partner: PartnerId) -> &HashMap<Coalition, f64> {
        &self.ledger[partner]
    }

    /// Derive every increment the fresh entry completes a pair for.
    fn record_increments(&mut self, filled: Coalition) {
        let filled_value = self.values[&filled];
        for partner in 0..self.partner_count {
            if filled.contains(partner) {
                let base = filled.without(partner);
                if let Some(&base_value) = self.values.get(&base) {
                    self.ledger[partner].insert(base, filled_value - base_value);
                }
            } else {
                let extended = filled.with(partner);
                if let Some(&extended_value) = self.values.get(&extended) {
                    self.ledger[partner].insert(filled, extended_value - filled_value);
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
