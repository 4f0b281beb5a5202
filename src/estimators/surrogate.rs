//! Cheap surrogate models of the marginal-contribution function.
//!
//! Surrogates only steer the importance-sampling draw; final scores are
//! always computed from true evaluator increments, de-biased by the sampling
//! weights. All models predict from training-set sizes, the only partner
//! content the engine can see.

use nalgebra::{DMatrix, DVector};

use crate::cache::ValueCache;
use crate::coalition::{Coalition, PartnerId};
use crate::scenario::Scenario;

/// Diagonal jitter keeping kernel and normal-equation systems invertible when
/// design points coincide.
const RIDGE: f64 = 1e-10;

// =============================================================================
// Errors
// =============================================================================

/// A surrogate model could not be fit.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SurrogateError {
    #[error("partner {partner}: {got} ledger increments, need at least {needed} to fit")]
    TooFewSamples {
        partner: PartnerId,
        needed: usize,
        got: usize,
    },

    #[error("partner {partner}: singular system while fitting the surrogate")]
    SingularSystem { partner: PartnerId },
}

// =============================================================================
// IncrementSurrogate
// =============================================================================

/// Approximate marginal contribution `char(S ∪ {k}) - char(S)`.
///
/// Implementations are stateless at call time: everything they read was fixed
/// when the model was fit.
pub trait IncrementSurrogate {
    /// Predicted increment of `partner` on top of `coalition`.
    ///
    /// # Panics
    /// If `partner` is a member of `coalition` (caller bug).
    fn approx_increment(&self, coalition: Coalition, partner: PartnerId) -> f64;
}

// =============================================================================
// LinearSurrogate
// =============================================================================

/// Two-point interpolation between a partner's first and last increment.
///
/// `approx(S, k) = (1 - β)·first_k + β·last_k` with `β` the share of the
/// total training data held by `S`. Costs two evaluator calls per partner,
/// no fitting.
#[derive(Debug, Clone)]
pub struct LinearSurrogate {
    first: Vec<f64>,
    last: Vec<f64>,
    sizes: Vec<usize>,
    total_size: usize,
}

impl LinearSurrogate {
    /// Build from already-computed endpoint increments.
    ///
    /// `first[k] = char({k}) - char(∅)`, `last[k] = char(grand) - char(grand \ {k})`.
    pub fn new(first: Vec<f64>, last: Vec<f64>, scenario: &Scenario) -> Self {
        debug_assert_eq!(first.len(), scenario.partner_count());
        debug_assert_eq!(last.len(), scenario.partner_count());
        Self {
            first,
            last,
            sizes: scenario.partners().iter().map(|p| p.train_size).collect(),
            total_size: scenario.total_train_size(),
        }
    }
}

impl IncrementSurrogate for LinearSurrogate {
    fn approx_increment(&self, coalition: Coalition, partner: PartnerId) -> f64 {
        assert!(
            !coalition.contains(partner),
            "partner {partner} is already in the reference coalition {coalition:?}"
        );
        let size_s: usize = coalition.members().map(|p| self.sizes[p]).sum();
        let beta = if self.total_size > 0 {
            size_s as f64 / self.total_size as f64
        } else {
            0.0
        };
        (1.0 - beta) * self.first[partner] + beta * self.last[partner]
    }
}

// =============================================================================
// RegressionSurrogate
// =============================================================================

/// Per-partner quadratic regression of the increment on coalition data volume.
///
/// Features are `(1, size, size²)`; targets are the increments observed in the
/// session ledger so far.
#[derive(Debug, Clone)]
pub struct RegressionSurrogate {
    coeffs: Vec<[f64; 3]>,
    sizes: Vec<usize>,
}

impl RegressionSurrogate {
    /// Fit one model per partner from the cache's increment ledger.
    pub fn fit(cache: &ValueCache, scenario: &Scenario) -> Result<Self, SurrogateError> {
        let n = scenario.partner_count();
        let mut coeffs = Vec::with_capacity(n);
        for partner in 0..n {
            let ledger = cache.increments(partner);
            if ledger.len() < 3 {
                return Err(SurrogateError::TooFewSamples {
                    partner,
                    needed: 3,
                    got: ledger.len(),
                });
            }
            let mut xtx = DMatrix::zeros(3, 3);
            let mut xty = DVector::zeros(3);
            for (&coalition, &increment) in ledger {
                let size = scenario.coalition_train_size(coalition) as f64;
                let row = [1.0, size, size * size];
                for i in 0..3 {
                    for j in 0..3 {
                        xtx[(i, j)] += row[i] * row[j];
                    }
                    xty[i] += row[i] * increment;
                }
            }
            for i in 0..3 {
                xtx[(i, i)] += RIDGE;
            }
            let solution = xtx
                .lu()
                .solve(&xty)
                .ok_or(SurrogateError::SingularSystem { partner })?;
            coeffs.push([solution[0], solution[1], solution[2]]);
        }
        Ok(Self {
            coeffs,
            sizes: scenario.partners().iter().map(|p| p.train_size).collect(),
        })
    }
}

impl IncrementSurrogate for RegressionSurrogate {
    fn approx_increment(&self, coalition: Coalition, partner: PartnerId) -> f64 {
        assert!(
            !coalition.contains(partner),
            "partner {partner} is already in the reference coalition {coalition:?}"
        );
        let size: usize = coalition.members().map(|p| self.sizes[p]).sum();
        let size = size as f64;
        let [c0, c1, c2] = self.coeffs[partner];
        c0 + c1 * size + c2 * size * size
    }
}

// =============================================================================
// KrigingSurrogate
// =============================================================================

/// Per-partner Gaussian-kernel kriging (best linear unbiased prediction with
/// a polynomial trend) over size coordinates.
///
/// A coalition is encoded as the length `n-1` vector of its members'
/// training-set sizes (zero where absent) with the target partner's
/// coordinate removed. The kernel bandwidth is the median pairwise distance
/// between the fitted design points.
#[derive(Debug, Clone)]
pub struct KrigingSurrogate {
    models: Vec<KrigingModel>,
    sizes: Vec<usize>,
}

impl KrigingSurrogate {
    /// Fit one kriging model per partner from the session ledger.
    pub fn fit(
        cache: &ValueCache,
        scenario: &Scenario,
        degree: usize,
    ) -> Result<Self, SurrogateError> {
        let n = scenario.partner_count();
        let sizes: Vec<usize> = scenario.partners().iter().map(|p| p.train_size).collect();
        let mut models = Vec::with_capacity(n);
        for partner in 0..n {
            let ledger = cache.increments(partner);
            // The trend fit needs at least degree + 1 independent rows.
            if ledger.len() < degree + 1 {
                return Err(SurrogateError::TooFewSamples {
                    partner,
                    needed: degree + 1,
                    got: ledger.len(),
                });
            }
            let mut design = Vec::with_capacity(ledger.len());
            let mut targets = Vec::with_capacity(ledger.len());
            for (&coalition, &increment) in ledger {
                design.push(size_coordinate(coalition, partner, &sizes));
                targets.push(increment);
            }
            models.push(KrigingModel::fit(partner, design, targets, degree)?);
        }
        Ok(Self { models, sizes })
    }
}

impl IncrementSurrogate for KrigingSurrogate {
    fn approx_increment(&self, coalition: Coalition, partner: PartnerId) -> f64 {
        assert!(
            !coalition.contains(partner),
            "partner {partner} is already in the reference coalition {coalition:?}"
        );
        let x = size_coordinate(coalition, partner, &self.sizes);
        self.models[partner].predict(&x)
    }
}

/// Coalition as a size coordinate vector with the target partner removed.
fn size_coordinate(coalition: Coalition, partner: PartnerId, sizes: &[usize]) -> DVector<f64> {
    let n = sizes.len();
    let mut coordinate = Vec::with_capacity(n - 1);
    for p in 0..n {
        if p == partner {
            continue;
        }
        coordinate.push(if coalition.contains(p) {
            sizes[p] as f64
        } else {
            0.0
        });
    }
    DVector::from_vec(coordinate)
}

/// One fitted kriging model.
#[derive(Debug, Clone)]
struct KrigingModel {
    design: Vec<DVector<f64>>,
    bandwidth_sq: f64,
    degree: usize,
    trend: DVector<f64>,
    /// `K⁻¹(y - H·trend)`, so prediction is one kernel pass.
    residual_weights: DVector<f64>,
}

impl KrigingModel {
    fn fit(
        partner: PartnerId,
        design: Vec<DVector<f64>>,
        targets: Vec<f64>,
        degree: usize,
    ) -> Result<Self, SurrogateError> {
        let m = design.len();
        let bandwidth_sq = median_pairwise_distance(&design).powi(2).max(f64::MIN_POSITIVE);

        let kernel = |a: &DVector<f64>, b: &DVector<f64>| {
            (-(a - b).norm_squared() / bandwidth_sq).exp()
        };
        let mut k = DMatrix::from_fn(m, m, |i, j| kernel(&design[i], &design[j]));
        for i in 0..m {
            k[(i, i)] += RIDGE;
        }
        let k_inv = k
            .try_inverse()
            .ok_or(SurrogateError::SingularSystem { partner })?;

        let h = DMatrix::from_fn(m, degree + 1, |i, j| design[i].sum().powi(j as i32));
        let y = DVector::from_vec(targets);

        let ht_kinv = h.transpose() * &k_inv;
        let mut gram = &ht_kinv * &h;
        for i in 0..gram.nrows() {
            gram[(i, i)] += RIDGE;
        }
        let trend = gram
            .lu()
            .solve(&(&ht_kinv * &y))
            .ok_or(SurrogateError::SingularSystem { partner })?;
        let residual_weights = &k_inv * (&y - &h * &trend);

        Ok(Self {
            design,
            bandwidth_sq,
            degree,
            trend,
            residual_weights,
        })
    }

    fn predict(&self, x: &DVector<f64>) -> f64 {
        let total = x.sum();
        let mut value = 0.0;
        for j in 0..=self.degree {
            value += self.trend[j] * total.powi(j as i32);
        }
        for (point, &w) in self.design.iter().zip(self.residual_weights.iter()) {
            value += w * (-(x - point).norm_squared() / self.bandwidth_sq).exp();
        }
        value
    }
}

/// Median pairwise Euclidean distance; 1 when fewer than two distinct points.
fn median_pairwise_distance(points: &[DVector<f64>]) -> f64 {
    let mut distances = Vec::new();
    for i in 0..points.len() {
        for j in i + 1..points.len() {
            let d = (&points[i] - &points[j]).norm();
            if d > 0.0 {
                distances.push(d);
            }
        }
    }
    if distances.is_empty() {
        return 1.0;
    }
    distances.sort_by(|a, b| a.partial_cmp(b).expect("distances are finite"));
    distances[distances.len() / 2]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::TrainingConfig;
    use crate::testing::AdditiveGame;
    use approx::assert_abs_diff_eq;

    fn filled_cache(scenario: &Scenario, weights: Vec<f64>) -> ValueCache {
        let mut cache = ValueCache::new(scenario.partner_count());
        let mut game = AdditiveGame::new(weights);
        let config = TrainingConfig::default();
        for coalition in crate::coalition::all_coalitions(scenario.partner_count()) {
            cache.value(coalition, &mut game, &config).unwrap();
        }
        cache
    }

    #[test]
    fn linear_surrogate_interpolates_endpoints() {
        let scenario = Scenario::from_train_sizes(&[25, 25, 50]).unwrap();
        // Additive game: first and last increments are both the weight.
        let surrogate = LinearSurrogate::new(
            vec![1.0, 2.0, 3.0],
            vec![1.0, 2.0, 3.0],
            &scenario,
        );
        let s = Coalition::from_members(&[0, 1]);
        assert_abs_diff_eq!(surrogate.approx_increment(s, 2), 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            surrogate.approx_increment(Coalition::EMPTY, 0),
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn linear_surrogate_blends_with_volume() {
        let scenario = Scenario::from_train_sizes(&[50, 50]).unwrap();
        let surrogate = LinearSurrogate::new(vec![1.0, 0.0], vec![3.0, 0.0], &scenario);
        // |S| = {1} holds half the data: β = 0.5.
        let s = Coalition::singleton(1);
        assert_abs_diff_eq!(surrogate.approx_increment(s, 0), 2.0, epsilon = 1e-12);
    }

    #[test]
    #[should_panic(expected = "already in the reference coalition")]
    fn surrogate_rejects_member_partner() {
        let scenario = Scenario::from_train_sizes(&[10, 10]).unwrap();
        let surrogate = LinearSurrogate::new(vec![1.0, 1.0], vec![1.0, 1.0], &scenario);
        surrogate.approx_increment(Coalition::singleton(0), 0);
    }

    #[test]
    fn regression_recovers_constant_increments() {
        // In an additive game each partner's increment is constant, which a
        // quadratic in coalition size fits exactly.
        let scenario = Scenario::from_train_sizes(&[10, 20, 30, 40]).unwrap();
        let cache = filled_cache(&scenario, vec![1.0, 2.0, 3.0, 4.0]);
        let surrogate = RegressionSurrogate::fit(&cache, &scenario).unwrap();
        for partner in 0..4 {
            let pool = Coalition::grand(4).without(partner);
            for base in crate::coalition::subsets_size_lex(pool) {
                assert_abs_diff_eq!(
                    surrogate.approx_increment(base, partner),
                    (partner + 1) as f64,
                    epsilon = 1e-5
                );
            }
        }
    }

    #[test]
    fn regression_needs_three_ledger_points() {
        let scenario = Scenario::from_train_sizes(&[10, 20]).unwrap();
        let cache = ValueCache::new(2);
        let err = RegressionSurrogate::fit(&cache, &scenario).unwrap_err();
        assert!(matches!(err, SurrogateError::TooFewSamples { .. }));
    }

    #[test]
    fn kriging_interpolates_training_points() {
        let scenario = Scenario::from_train_sizes(&[10, 20, 30, 40]).unwrap();
        let cache = filled_cache(&scenario, vec![2.0, 4.0, 6.0, 8.0]);
        let surrogate = KrigingSurrogate::fit(&cache, &scenario, 2).unwrap();
        // Kriging interpolates: at a fitted design point, prediction matches
        // the observed increment (up to the ridge jitter).
        for partner in 0..4 {
            for (&coalition, &increment) in cache.increments(partner) {
                assert_abs_diff_eq!(
                    surrogate.approx_increment(coalition, partner),
                    increment,
                    epsilon = 1e-3
                );
            }
        }
    }

    #[test]
    fn median_distance_handles_degenerate_designs() {
        assert_eq!(median_pairwise_distance(&[]), 1.0);
        let same = vec![DVector::from_vec(vec![1.0]), DVector::from_vec(vec![1.0])];
        assert_eq!(median_pairwise_distance(&same), 1.0);
    }
}
