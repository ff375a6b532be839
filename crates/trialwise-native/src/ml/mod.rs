//! Trial classification
//!
//! This module provides the classifier used by the decoding pipeline:
//! - [`model`]: Shallow filter-bank network with analytic gradients
//! - [`loss`]: Training criteria
//! - [`optim`]: AdamW and SGD optimizers
//! - [`net`]: [`NeuralNet`], the trainable wrapper with history and
//!   parameter persistence
//!
//! The pipeline only talks to the [`Classifier`] and [`ClassifierFactory`]
//! traits, so another model can be plugged in without touching it.

pub mod loss;
pub mod model;
pub mod net;
pub mod optim;

use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use trialwise_core::{PartitionStrategy, TrialDataset, TrialSet};

use crate::error::TrainResult;

pub use loss::{Criterion, NllLoss};
pub use model::{ShallowNet, ShallowNetConfig, ShallowNetParams};
pub use net::{EpochRecord, History, NeuralNet, NeuralNetConfig};
pub use optim::{AdamW, AdamWConfig, Optimizer, OptimizerKind, Sgd, SgdConfig};

/// Input and output dimensions a classifier is built for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassifierSpec {
    /// Channels per trial
    pub in_chans: usize,
    /// Number of classes
    pub n_classes: usize,
    /// Samples per trial
    pub input_time_length: usize,
}

/// A trainable trial classifier.
pub trait Classifier {
    /// Train from scratch for `epochs` epochs, discarding earlier training.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::TrainError`] if the data does not fit the
    /// classifier or training diverges.
    fn fit(&mut self, dataset: &TrialDataset, epochs: usize) -> TrainResult<&History>;

    /// Continue training for `epochs` more epochs.
    ///
    /// # Errors
    ///
    /// Same as [`Classifier::fit`].
    fn partial_fit(&mut self, dataset: &TrialDataset, epochs: usize) -> TrainResult<&History>;

    /// Class probabilities, shape `(trials, classes)`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::TrainError::ShapeMismatch`] for trials of the
    /// wrong shape.
    fn predict_proba(&self, trials: &dyn TrialSet) -> TrainResult<Array2<f32>>;

    /// Most probable class per trial.
    ///
    /// # Errors
    ///
    /// Same as [`Classifier::predict_proba`].
    fn predict(&self, trials: &dyn TrialSet) -> TrainResult<Array1<i64>>;

    /// Per-epoch training record
    fn history(&self) -> &History;

    /// Write the learned parameters to `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::TrainError`] on IO or serialisation failure.
    fn save_params(&self, path: &Path) -> TrainResult<()>;

    /// Replace the parameters with those stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::TrainError`] on IO or format failure, or if
    /// the stored shapes do not match.
    fn load_params(&mut self, path: &Path) -> TrainResult<()>;
}

/// Builds classifiers for a given input shape.
pub trait ClassifierFactory {
    /// Build a classifier for `spec`.
    ///
    /// When `split` is given, every training epoch holds out the part it
    /// returns as validation data.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::TrainError`] for invalid hyperparameters.
    fn build(
        &self,
        spec: ClassifierSpec,
        split: Option<Box<dyn PartitionStrategy>>,
    ) -> TrainResult<Box<dyn Classifier>>;
}

/// Index of the largest entry of each row
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn argmax_rows(proba: &Array2<f32>) -> Array1<i64> {
    proba
        .outer_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
                .0 as i64
        })
        .collect()
}

/// Fraction of `predicted` equal to `actual` (0 for empty input)
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn accuracy(predicted: &Array1<i64>, actual: ndarray::ArrayView1<'_, i64>) -> f64 {
    if predicted.is_empty() {
        return 0.0;
    }
    let correct = predicted.iter().zip(actual.iter()).filter(|(p, a)| p == a).count();
    correct as f64 / predicted.len() as f64
}
