//! Training criteria over log-probabilities

use ndarray::{Array1, ArrayView1};

/// Per-sample loss on a network's log-probability output.
///
/// [`super::NeuralNet`] averages losses and gradients over each batch.
pub trait Criterion {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Loss for one sample
    fn loss(&self, log_probs: ArrayView1<'_, f32>, target: usize) -> f32;

    /// Gradient of [`Criterion::loss`] with respect to `log_probs`
    fn grad(&self, log_probs: ArrayView1<'_, f32>, target: usize) -> Array1<f32>;
}

/// Negative log-likelihood of the target class.
#[derive(Clone, Copy, Debug, Default)]
pub struct NllLoss;

impl Criterion for NllLoss {
    fn name(&self) -> &'static str {
        "nll"
    }

    fn loss(&self, log_probs: ArrayView1<'_, f32>, target: usize) -> f32 {
        -log_probs[target]
    }

    fn grad(&self, log_probs: ArrayView1<'_, f32>, target: usize) -> Array1<f32> {
        let mut grad = Array1::zeros(log_probs.len());
        grad[target] = -1.0;
        grad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_nll() {
        let lp = array![-0.1_f32, -2.5];
        assert!((NllLoss.loss(lp.view(), 1) - 2.5).abs() < f32::EPSILON);
        assert_eq!(NllLoss.grad(lp.view(), 0), array![-1.0_f32, 0.0]);
    }
}
