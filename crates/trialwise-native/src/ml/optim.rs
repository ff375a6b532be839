//! First-order optimizers
//!
//! Optimizers step a fixed, ordered list of parameter tensors. Per-tensor
//! state is created lazily on the first step and must keep its shape.

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{TrainError, TrainResult};

/// Optimizer over an ordered list of `f32` tensors.
pub trait Optimizer {
    /// Apply one update to `params` using `grads` (same order and shapes).
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::OptimizerState`] if the tensor list changed
    /// shape since the last step.
    fn step(&mut self, params: &mut [ArrayViewMutD<'_, f32>], grads: &[ArrayViewD<'_, f32>]) -> TrainResult<()>;

    /// Current learning rate
    fn lr(&self) -> f64;

    /// Drop all state
    fn reset(&mut self);
}

/// Check `params`/`grads` against lazily created state, creating it on the
/// first call.
fn ensure_state(
    state: &mut Vec<ArrayD<f32>>,
    params: &[ArrayViewMutD<'_, f32>],
    grads: &[ArrayViewD<'_, f32>],
) -> TrainResult<()> {
    if params.len() != grads.len() {
        return Err(TrainError::OptimizerState {
            reason: format!("{} parameters but {} gradients", params.len(), grads.len()),
        });
    }
    for (i, (p, g)) in params.iter().zip(grads).enumerate() {
        if p.shape() != g.shape() {
            return Err(TrainError::OptimizerState {
                reason: format!("tensor {i}: parameter {:?} vs gradient {:?}", p.shape(), g.shape()),
            });
        }
    }

    if state.is_empty() {
        state.extend(params.iter().map(|p| ArrayD::zeros(p.raw_dim())));
        return Ok(());
    }
    if state.len() != params.len() || state.iter().zip(params).any(|(s, p)| s.shape() != p.shape()) {
        return Err(TrainError::OptimizerState {
            reason: "parameter shapes changed since the last step".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// AdamW
// ============================================================================

/// AdamW configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamWConfig {
    /// Learning rate
    pub lr: f64,
    /// First moment decay
    pub beta1: f64,
    /// Second moment decay
    pub beta2: f64,
    /// Denominator epsilon
    pub eps: f64,
    /// Decoupled weight decay
    pub weight_decay: f64,
}

impl Default for AdamWConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.01,
        }
    }
}

/// Adam with decoupled weight decay (Loshchilov & Hutter, 2019).
#[derive(Clone, Debug)]
pub struct AdamW {
    config: AdamWConfig,
    m: Vec<ArrayD<f32>>,
    v: Vec<ArrayD<f32>>,
    timestep: u64,
}

impl AdamW {
    /// Create an optimizer with empty state
    #[must_use]
    pub fn new(config: AdamWConfig) -> Self {
        Self { config, m: Vec::new(), v: Vec::new(), timestep: 0 }
    }

    /// Steps taken since creation or the last reset
    #[must_use]
    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &AdamWConfig {
        &self.config
    }
}

impl Optimizer for AdamW {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn step(&mut self, params: &mut [ArrayViewMutD<'_, f32>], grads: &[ArrayViewD<'_, f32>]) -> TrainResult<()> {
        ensure_state(&mut self.m, params, grads)?;
        ensure_state(&mut self.v, params, grads)?;

        self.timestep += 1;
        let t = self.timestep.min(i32::MAX as u64) as i32;

        let AdamWConfig { lr, beta1, beta2, eps, weight_decay } = self.config;
        let bc1 = 1.0 - beta1.powi(t);
        let bc2 = 1.0 - beta2.powi(t);
        let step_size = (lr / bc1) as f32;
        let bc2_sqrt = bc2.sqrt() as f32;
        let decay = (1.0 - lr * weight_decay) as f32;
        let (beta1, beta2, eps) = (beta1 as f32, beta2 as f32, eps as f32);

        for ((param, grad), (m, v)) in params
            .iter_mut()
            .zip(grads)
            .zip(self.m.iter_mut().zip(self.v.iter_mut()))
        {
            Zip::from(param)
                .and(grad)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    *p *= decay;
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    *p -= step_size * *m / (v.sqrt() / bc2_sqrt + eps);
                });
        }
        Ok(())
    }

    fn lr(&self) -> f64 {
        self.config.lr
    }

    fn reset(&mut self) {
        self.m.clear();
        self.v.clear();
        self.timestep = 0;
    }
}

// ============================================================================
// SGD
// ============================================================================

/// SGD configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdConfig {
    /// Learning rate
    pub lr: f64,
    /// Momentum factor (0 disables momentum)
    pub momentum: f64,
    /// L2 penalty added to the gradient
    pub weight_decay: f64,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self { lr: 1e-2, momentum: 0.0, weight_decay: 0.0 }
    }
}

/// Stochastic gradient descent with optional momentum.
#[derive(Clone, Debug)]
pub struct Sgd {
    config: SgdConfig,
    velocity: Vec<ArrayD<f32>>,
}

impl Sgd {
    /// Create an optimizer with empty state
    #[must_use]
    pub fn new(config: SgdConfig) -> Self {
        Self { config, velocity: Vec::new() }
    }
}

impl Optimizer for Sgd {
    #[allow(clippy::cast_possible_truncation)]
    fn step(&mut self, params: &mut [ArrayViewMutD<'_, f32>], grads: &[ArrayViewD<'_, f32>]) -> TrainResult<()> {
        ensure_state(&mut self.velocity, params, grads)?;

        let lr = self.config.lr as f32;
        let momentum = self.config.momentum as f32;
        let weight_decay = self.config.weight_decay as f32;

        for ((param, grad), vel) in params.iter_mut().zip(grads).zip(self.velocity.iter_mut()) {
            Zip::from(param).and(grad).and(vel).for_each(|p, &g, b| {
                let g = g + weight_decay * *p;
                *b = momentum * *b + g;
                *p -= lr * *b;
            });
        }
        Ok(())
    }

    fn lr(&self) -> f64 {
        self.config.lr
    }

    fn reset(&mut self) {
        self.velocity.clear();
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Optimizer choice as it appears in configuration files.
///
/// ```toml
/// [training.optimizer]
/// kind = "adamw"
/// lr = 0.000625
/// weight_decay = 0.0
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OptimizerKind {
    /// [`AdamW`]
    AdamW(AdamWConfig),
    /// [`Sgd`]
    Sgd(SgdConfig),
}

impl Default for OptimizerKind {
    fn default() -> Self {
        Self::AdamW(AdamWConfig::default())
    }
}

impl OptimizerKind {
    /// Instantiate the optimizer
    #[must_use]
    pub fn build(&self) -> Box<dyn Optimizer> {
        match self {
            Self::AdamW(config) => Box::new(AdamW::new(config.clone())),
            Self::Sgd(config) => Box::new(Sgd::new(config.clone())),
        }
    }

    /// Configured learning rate
    #[must_use]
    pub fn lr(&self) -> f64 {
        match self {
            Self::AdamW(config) => config.lr,
            Self::Sgd(config) => config.lr,
        }
    }
}
