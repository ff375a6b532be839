//! Shallow filter-bank network
//!
//! Per trial `x` of shape `(channels, times)`:
//!
//! ```text
//! z = W x                          spatial filter      (filters, times)
//! p = mean_pool(z^2)               power per window    (filters, windows)
//! l = ln(max(p, eps))              log power (NaN passes through)
//! s = V flatten(l) + b             dense classifier    (classes)
//! y = log_softmax(s)
//! ```
//!
//! Gradients are derived by hand; [`ShallowNet::backward`] accumulates them
//! into a [`ShallowNetParams`] of the same shape as the weights.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewD, ArrayViewMutD, Axis, Zip};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::ClassifierSpec;
use crate::error::{TrainError, TrainResult};

// ============================================================================
// Configuration
// ============================================================================

/// Shallow network hyperparameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShallowNetConfig {
    /// Number of spatial filters
    pub n_filters: usize,
    /// Pooling window length in samples
    pub pool_length: usize,
    /// Pooling stride in samples
    pub pool_stride: usize,
    /// Lower clamp before the logarithm
    pub log_eps: f32,
}

impl Default for ShallowNetConfig {
    fn default() -> Self {
        Self {
            n_filters: 40,
            pool_length: 75,
            pool_stride: 15,
            log_eps: 1e-6,
        }
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Trainable weights (or their gradients).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShallowNetParams {
    /// Spatial filters `(filters, channels)`
    pub spatial: Array2<f32>,
    /// Dense weights `(classes, filters * windows)`
    pub dense: Array2<f32>,
    /// Dense bias `(classes)`
    pub bias: Array1<f32>,
}

impl ShallowNetParams {
    /// All-zero parameters with the same shapes as `self`
    #[must_use]
    pub fn zeros_like(&self) -> Self {
        Self {
            spatial: Array2::zeros(self.spatial.raw_dim()),
            dense: Array2::zeros(self.dense.raw_dim()),
            bias: Array1::zeros(self.bias.raw_dim()),
        }
    }

    /// Whether every tensor has the same shape as in `other`
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.spatial.shape() == other.spatial.shape()
            && self.dense.shape() == other.dense.shape()
            && self.bias.shape() == other.bias.shape()
    }

    /// Number of scalar parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.spatial.len() + self.dense.len() + self.bias.len()
    }

    /// Whether there are no parameters
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every entry is finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.views().iter().all(|v| v.iter().all(|x| x.is_finite()))
    }

    /// Read-only views in a fixed order (spatial, dense, bias)
    #[must_use]
    pub fn views(&self) -> [ArrayViewD<'_, f32>; 3] {
        [
            self.spatial.view().into_dyn(),
            self.dense.view().into_dyn(),
            self.bias.view().into_dyn(),
        ]
    }

    /// Mutable views in the same order as [`Self::views`]
    pub fn views_mut(&mut self) -> [ArrayViewMutD<'_, f32>; 3] {
        [
            self.spatial.view_mut().into_dyn(),
            self.dense.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
        ]
    }
}

// ============================================================================
// Network
// ============================================================================

/// Intermediate values of one forward pass, kept for the backward pass.
#[derive(Clone, Debug)]
pub struct ForwardCache {
    /// Spatially filtered signal `(filters, times)`
    pub filtered: Array2<f32>,
    /// Mean power per window `(filters, windows)`
    pub power: Array2<f32>,
    /// Flattened log power
    pub features: Array1<f32>,
    /// Output log-probabilities
    pub log_probs: Array1<f32>,
}

/// Single-trial shallow network.
#[derive(Clone, Debug)]
pub struct ShallowNet {
    config: ShallowNetConfig,
    spec: ClassifierSpec,
    pool_length: usize,
    n_windows: usize,
    params: ShallowNetParams,
}

impl ShallowNet {
    /// Build a network for `spec` with Xavier-uniform weights and zero bias.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::InvalidParameter`] for zero-sized dimensions.
    pub fn new<R: Rng>(spec: ClassifierSpec, config: ShallowNetConfig, rng: &mut R) -> TrainResult<Self> {
        let invalid = |parameter: &'static str| TrainError::InvalidParameter {
            parameter,
            reason: "must be positive".to_string(),
        };
        if spec.in_chans == 0 {
            return Err(invalid("in_chans"));
        }
        if spec.n_classes == 0 {
            return Err(invalid("n_classes"));
        }
        if spec.input_time_length == 0 {
            return Err(invalid("input_time_length"));
        }
        if config.n_filters == 0 {
            return Err(invalid("n_filters"));
        }
        if config.pool_length == 0 {
            return Err(invalid("pool_length"));
        }
        if config.pool_stride == 0 {
            return Err(invalid("pool_stride"));
        }

        let pool_length = config.pool_length.min(spec.input_time_length);
        let n_windows = (spec.input_time_length - pool_length) / config.pool_stride + 1;
        let n_features = config.n_filters * n_windows;

        let params = ShallowNetParams {
            spatial: xavier_uniform(config.n_filters, spec.in_chans, rng),
            dense: xavier_uniform(spec.n_classes, n_features, rng),
            bias: Array1::zeros(spec.n_classes),
        };

        Ok(Self { config, spec, pool_length, n_windows, params })
    }

    /// Re-draw all weights from `rng`
    pub fn reinitialize<R: Rng>(&mut self, rng: &mut R) {
        let n_features = self.n_features();
        self.params.spatial = xavier_uniform(self.config.n_filters, self.spec.in_chans, rng);
        self.params.dense = xavier_uniform(self.spec.n_classes, n_features, rng);
        self.params.bias.fill(0.0);
    }

    /// Shape the network was built for
    #[must_use]
    pub fn spec(&self) -> ClassifierSpec {
        self.spec
    }

    /// Effective pooling length (never longer than the input)
    #[must_use]
    pub fn pool_length(&self) -> usize {
        self.pool_length
    }

    /// Number of pooling windows
    #[must_use]
    pub fn n_windows(&self) -> usize {
        self.n_windows
    }

    /// Width of the dense layer input
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.config.n_filters * self.n_windows
    }

    /// Current weights
    #[must_use]
    pub fn params(&self) -> &ShallowNetParams {
        &self.params
    }

    /// Mutable weights
    pub fn params_mut(&mut self) -> &mut ShallowNetParams {
        &mut self.params
    }

    /// Replace the weights.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::InvalidParameter`] if any shape differs.
    pub fn set_params(&mut self, params: ShallowNetParams) -> TrainResult<()> {
        if !params.same_shape(&self.params) {
            return Err(TrainError::InvalidParameter {
                parameter: "params",
                reason: format!(
                    "shapes {:?}/{:?}/{:?} do not match network {:?}/{:?}/{:?}",
                    params.spatial.shape(),
                    params.dense.shape(),
                    params.bias.shape(),
                    self.params.spatial.shape(),
                    self.params.dense.shape(),
                    self.params.bias.shape()
                ),
            });
        }
        self.params = params;
        Ok(())
    }

    /// Check a trial's `(channels, times, depth)` against the built shape.
    /// The network reads single-plane trials, so depth must be 1.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::ShapeMismatch`] if they differ.
    pub fn check_input(&self, got: [usize; 3]) -> TrainResult<()> {
        let expected = [self.spec.in_chans, self.spec.input_time_length, 1];
        if got != expected {
            return Err(TrainError::ShapeMismatch { expected, got });
        }
        Ok(())
    }

    /// Forward pass over one trial `(channels, times)`.
    ///
    /// The input shape is assumed to have been checked.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn forward(&self, x: ArrayView2<'_, f32>) -> ForwardCache {
        let filtered = self.params.spatial.dot(&x);
        let eps = self.config.log_eps;
        let inv_len = 1.0 / self.pool_length as f32;
        let stride = self.config.pool_stride;

        let mut power = Array2::<f32>::zeros((self.config.n_filters, self.n_windows));
        for (z, mut p) in filtered.outer_iter().zip(power.outer_iter_mut()) {
            for (w, slot) in p.iter_mut().enumerate() {
                let start = w * stride;
                let window = z.slice(ndarray::s![start..start + self.pool_length]);
                *slot = window.iter().map(|v| v * v).sum::<f32>() * inv_len;
            }
        }

        let features: Array1<f32> = power.iter().map(|&p| safe_log(p, eps)).collect();
        let scores = self.params.dense.dot(&features) + &self.params.bias;
        let log_probs = log_softmax(scores.view());

        ForwardCache { filtered, power, features, log_probs }
    }

    /// Log-probabilities for one trial
    #[must_use]
    pub fn log_proba(&self, x: ArrayView2<'_, f32>) -> Array1<f32> {
        self.forward(x).log_probs
    }

    /// Back-propagate `d_log_probs` (gradient of the loss with respect to
    /// the output log-probabilities) and add the parameter gradients into
    /// `grads`.
    #[allow(clippy::cast_precision_loss)]
    pub fn backward(
        &self,
        x: ArrayView2<'_, f32>,
        cache: &ForwardCache,
        d_log_probs: ArrayView1<'_, f32>,
        grads: &mut ShallowNetParams,
    ) {
        // log_softmax: ds = g - softmax * sum(g)
        let g_sum = d_log_probs.sum();
        let d_scores: Array1<f32> = Zip::from(&d_log_probs)
            .and(&cache.log_probs)
            .map_collect(|&g, &lp| g - lp.exp() * g_sum);

        // Dense layer
        let d_scores_col = d_scores.view().insert_axis(Axis(1));
        let features_row = cache.features.view().insert_axis(Axis(0));
        grads.dense += &d_scores_col.dot(&features_row);
        grads.bias += &d_scores;
        let d_features = self.params.dense.t().dot(&d_scores);

        // Safe log and mean pooling, folded into d filtered
        let eps = self.config.log_eps;
        let inv_len = 1.0 / self.pool_length as f32;
        let stride = self.config.pool_stride;
        let n_times = self.spec.input_time_length;

        let mut d_filtered = Array2::<f32>::zeros(cache.filtered.raw_dim());
        let mut coverage = vec![0.0_f32; n_times + 1];
        for (f, mut dz) in d_filtered.outer_iter_mut().enumerate() {
            coverage.iter_mut().for_each(|c| *c = 0.0);
            for w in 0..self.n_windows {
                let p = cache.power[[f, w]];
                // Clamped powers do not propagate
                let dp = if p > eps { d_features[f * self.n_windows + w] / p } else { 0.0 };
                let start = w * stride;
                coverage[start] += dp;
                coverage[start + self.pool_length] -= dp;
            }
            let mut running = 0.0;
            for (t, slot) in dz.iter_mut().enumerate() {
                running += coverage[t];
                *slot = running * 2.0 * cache.filtered[[f, t]] * inv_len;
            }
        }

        // Spatial filter
        grads.spatial += &d_filtered.dot(&x.t());
    }
}

fn xavier_uniform<R: Rng>(fan_out: usize, fan_in: usize, rng: &mut R) -> Array2<f32> {
    #[allow(clippy::cast_precision_loss)]
    let bound = (6.0 / (fan_in + fan_out) as f32).sqrt();
    let dist = Uniform::new_inclusive(-bound, bound);
    Array2::from_shape_simple_fn((fan_out, fan_in), || dist.sample(rng))
}

/// `ln(max(p, eps))`, keeping NaN so divergence stays visible
fn safe_log(p: f32, eps: f32) -> f32 {
    if p < eps {
        eps.ln()
    } else {
        p.ln()
    }
}

/// Numerically stable log-softmax
#[must_use]
pub fn log_softmax(scores: ArrayView1<'_, f32>) -> Array1<f32> {
    let max = scores.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    let shifted = scores.mapv(|v| v - max);
    let lse = shifted.iter().map(|&v| v.exp()).sum::<f32>().ln();
    shifted.mapv(|v| v - lse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn spec(in_chans: usize, n_classes: usize, input_time_length: usize) -> ClassifierSpec {
        ClassifierSpec { in_chans, n_classes, input_time_length }
    }

    fn small_config() -> ShallowNetConfig {
        ShallowNetConfig { n_filters: 3, pool_length: 8, pool_stride: 4, log_eps: 1e-6 }
    }

    fn trial(channels: usize, times: usize, seed: u64) -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Uniform::new(-1.0_f32, 1.0);
        Array2::from_shape_simple_fn((channels, times), || dist.sample(&mut rng))
    }

    #[test]
    fn test_pooling_geometry() {
        let mut rng = StdRng::seed_from_u64(0);
        let net = ShallowNet::new(spec(22, 2, 497), ShallowNetConfig::default(), &mut rng).unwrap();
        assert_eq!(net.n_windows(), (497 - 75) / 15 + 1);
        assert_eq!(net.params().dense.shape(), &[2, 40 * net.n_windows()]);
        assert_eq!(net.params().spatial.shape(), &[40, 22]);
        assert!(net.params().bias.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_pool_shrinks_to_short_input() {
        let mut rng = StdRng::seed_from_u64(0);
        let net = ShallowNet::new(spec(2, 2, 20), ShallowNetConfig::default(), &mut rng).unwrap();
        assert_eq!(net.pool_length(), 20);
        assert_eq!(net.n_windows(), 1);
    }

    #[test]
    fn test_invalid_dimensions() {
        let mut rng = StdRng::seed_from_u64(0);
        let zero_filters = ShallowNetConfig { n_filters: 0, ..ShallowNetConfig::default() };
        assert!(ShallowNet::new(spec(2, 2, 20), zero_filters, &mut rng).is_err());
        assert!(ShallowNet::new(spec(0, 2, 20), ShallowNetConfig::default(), &mut rng).is_err());
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = ShallowNet::new(spec(4, 2, 32), small_config(), &mut StdRng::seed_from_u64(7)).unwrap();
        let b = ShallowNet::new(spec(4, 2, 32), small_config(), &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a.params(), b.params());
    }

    #[test]
    fn test_log_probs_normalised() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = ShallowNet::new(spec(4, 3, 32), small_config(), &mut rng).unwrap();
        let lp = net.log_proba(trial(4, 32, 2).view());
        let total: f32 = lp.iter().map(|v| v.exp()).sum();
        approx::assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_log_softmax_stable() {
        let lp = log_softmax(ndarray::array![1000.0_f32, 1000.0].view());
        approx::assert_abs_diff_eq!(lp[0], -std::f32::consts::LN_2, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(lp[1], -std::f32::consts::LN_2, epsilon = 1e-6);

        // One unit apart at large magnitude: -ln(1 + e^-1) and -1 - ln(1 + e^-1)
        let lp = log_softmax(ndarray::array![1000.0_f32, 999.0].view());
        let expected = -(1.0_f32 + (-1.0_f32).exp()).ln();
        approx::assert_abs_diff_eq!(lp[0], expected, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(lp[1], expected - 1.0, epsilon = 1e-6);
    }

    /// Compare analytic gradients of `-log_probs[target]` with central
    /// finite differences on a handful of weights.
    #[test]
    fn test_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut net = ShallowNet::new(spec(3, 2, 24), small_config(), &mut rng).unwrap();
        let x = trial(3, 24, 4);
        let target = 1;

        let cache = net.forward(x.view());
        let mut d_lp = Array1::<f32>::zeros(2);
        d_lp[target] = -1.0;
        let mut grads = net.params().zeros_like();
        net.backward(x.view(), &cache, d_lp.view(), &mut grads);

        let loss = |net: &ShallowNet| -f64::from(net.log_proba(x.view())[target]);
        let h = 1e-2_f32;
        for (tensor, index) in [(0_usize, 1_usize), (0, 4), (1, 0), (1, 7), (2, 1)] {
            let analytic = grads.views()[tensor].iter().nth(index).copied().unwrap();

            let original = net.params().views()[tensor].iter().nth(index).copied().unwrap();
            *net.params_mut().views_mut()[tensor].iter_mut().nth(index).unwrap() = original + h;
            let up = loss(&net);
            *net.params_mut().views_mut()[tensor].iter_mut().nth(index).unwrap() = original - h;
            let down = loss(&net);
            *net.params_mut().views_mut()[tensor].iter_mut().nth(index).unwrap() = original;

            let numeric = (up - down) / (2.0 * f64::from(h));
            approx::assert_relative_eq!(f64::from(analytic), numeric, epsilon = 2e-3, max_relative = 5e-2);
        }
    }

    #[test]
    fn test_set_params_shape_check() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = ShallowNet::new(spec(4, 2, 32), small_config(), &mut rng).unwrap();
        let other = ShallowNet::new(spec(5, 2, 32), small_config(), &mut rng).unwrap();
        assert!(net.set_params(other.params().clone()).is_err());
        let same = net.params().clone();
        assert!(net.set_params(same).is_ok());
    }
}
