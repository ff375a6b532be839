//! Trainable network wrapper
//!
//! [`NeuralNet`] owns a [`ShallowNet`], an [`Optimizer`] and a [`Criterion`]
//! and runs the epoch loop: optional train/validation partition, ordered
//! mini-batches (no shuffling), one optimizer step per batch, validation
//! loss and accuracy at the end of every epoch.

use std::fs;
use std::path::Path;
use std::time::Instant;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use trialwise_core::{PartitionStrategy, TrialDataset, TrialSet};

use super::loss::{Criterion, NllLoss};
use super::model::{ShallowNet, ShallowNetConfig, ShallowNetParams};
use super::optim::{Optimizer, OptimizerKind};
use super::{argmax_rows, Classifier, ClassifierFactory, ClassifierSpec};
use crate::error::{TrainError, TrainResult};

// ============================================================================
// History
// ============================================================================

/// Metrics of one training epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Epoch number, counting from 1 across `fit` and `partial_fit` calls
    pub epoch: usize,
    /// Mean training loss
    pub train_loss: f64,
    /// Mean validation loss, if a validation part was held out
    pub valid_loss: Option<f64>,
    /// Validation accuracy, if a validation part was held out
    pub valid_acc: Option<f64>,
    /// Optimizer steps taken
    pub batches: usize,
    /// Wall time (s)
    pub dur: f64,
}

/// Training record, one entry per epoch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// Epoch records in order
    pub epochs: Vec<EpochRecord>,
}

impl History {
    /// Number of recorded epochs
    #[must_use]
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Most recent epoch
    #[must_use]
    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    /// Training loss per epoch
    #[must_use]
    pub fn train_losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.train_loss).collect()
    }

    /// Validation loss per epoch (epochs without validation are skipped)
    #[must_use]
    pub fn valid_losses(&self) -> Vec<f64> {
        self.epochs.iter().filter_map(|e| e.valid_loss).collect()
    }

    fn clear(&mut self) {
        self.epochs.clear();
    }
}

// ============================================================================
// Configuration / factory
// ============================================================================

/// Hyperparameters of a [`NeuralNet`]; also its [`ClassifierFactory`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralNetConfig {
    /// Network shape
    pub module: ShallowNetConfig,
    /// Optimizer and its settings
    pub optimizer: OptimizerKind,
    /// Trials per optimizer step
    pub batch_size: usize,
    /// Seed for weight initialisation
    pub seed: u64,
}

impl Default for NeuralNetConfig {
    fn default() -> Self {
        Self {
            module: ShallowNetConfig::default(),
            optimizer: OptimizerKind::default(),
            batch_size: 64,
            seed: 0,
        }
    }
}

impl ClassifierFactory for NeuralNetConfig {
    fn build(
        &self,
        spec: ClassifierSpec,
        split: Option<Box<dyn PartitionStrategy>>,
    ) -> TrainResult<Box<dyn Classifier>> {
        Ok(Box::new(NeuralNet::new(self.clone(), spec, split)?))
    }
}

// ============================================================================
// NeuralNet
// ============================================================================

/// Network, optimizer, criterion and training history.
pub struct NeuralNet {
    config: NeuralNetConfig,
    module: ShallowNet,
    optimizer: Box<dyn Optimizer>,
    criterion: Box<dyn Criterion>,
    split: Option<Box<dyn PartitionStrategy>>,
    history: History,
}

impl std::fmt::Debug for NeuralNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeuralNet")
            .field("config", &self.config)
            .field("spec", &self.module.spec())
            .field("criterion", &self.criterion.name())
            .field("has_split", &self.split.is_some())
            .field("epochs", &self.history.len())
            .finish()
    }
}

impl NeuralNet {
    /// Build a network with NLL loss.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::InvalidParameter`] for a zero batch size or
    /// invalid network dimensions.
    pub fn new(
        config: NeuralNetConfig,
        spec: ClassifierSpec,
        split: Option<Box<dyn PartitionStrategy>>,
    ) -> TrainResult<Self> {
        if config.batch_size == 0 {
            return Err(TrainError::InvalidParameter {
                parameter: "batch_size",
                reason: "must be positive".to_string(),
            });
        }
        let lr = config.optimizer.lr();
        if !(lr.is_finite() && lr > 0.0) {
            return Err(TrainError::InvalidParameter {
                parameter: "lr",
                reason: format!("{lr} is not a positive learning rate"),
            });
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let module = ShallowNet::new(spec, config.module.clone(), &mut rng)?;
        let optimizer = config.optimizer.build();

        Ok(Self {
            config,
            module,
            optimizer,
            criterion: Box::new(NllLoss),
            split,
            history: History::default(),
        })
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &NeuralNetConfig {
        &self.config
    }

    /// Underlying network
    #[must_use]
    pub fn module(&self) -> &ShallowNet {
        &self.module
    }

    /// Restore initial weights and clear optimizer state and history
    pub fn initialize(&mut self) {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.module.reinitialize(&mut rng);
        self.optimizer.reset();
        self.history.clear();
    }

    fn check_trial_shape(&self, features: &ndarray::ArrayView3<'_, f32>) -> TrainResult<()> {
        let (channels, times, depth) = features.dim();
        self.module.check_input([channels, times, depth])
    }

    fn check_dataset(&self, dataset: &TrialDataset) -> TrainResult<()> {
        let [_, channels, times, depth] = dataset.shape();
        self.module.check_input([channels, times, depth])?;
        let n_classes = self.module.spec().n_classes;
        if let Some(&label) = dataset
            .labels()
            .iter()
            .find(|&&l| usize::try_from(l).map_or(true, |l| l >= n_classes))
        {
            return Err(TrainError::InvalidLabel { label, n_classes });
        }
        Ok(())
    }

    fn target(label: i64) -> usize {
        // Labels are validated by check_dataset
        usize::try_from(label).unwrap_or_default()
    }

    /// One pass over `train`, one optimizer step per batch.
    /// Returns the mean sample loss and the number of batches.
    #[allow(clippy::cast_precision_loss)]
    fn train_epoch(&mut self, train: &TrialDataset) -> TrainResult<(f64, usize)> {
        let count = train.count();
        let mut total = 0.0_f64;
        let mut batches = 0;

        for start in (0..count).step_by(self.config.batch_size) {
            let end = (start + self.config.batch_size).min(count);
            let scale = 1.0 / (end - start) as f32;
            let mut grads = self.module.params().zeros_like();

            for index in start..end {
                let trial = train.at(index)?;
                let x = squeeze(&trial.features);
                let target = Self::target(trial.label);

                let cache = self.module.forward(x);
                total += f64::from(self.criterion.loss(cache.log_probs.view(), target));
                let mut d_log_probs = self.criterion.grad(cache.log_probs.view(), target);
                d_log_probs *= scale;
                self.module.backward(x, &cache, d_log_probs.view(), &mut grads);
            }

            step(self.optimizer.as_mut(), self.module.params_mut(), &grads)?;
            batches += 1;
        }

        Ok((total / count as f64, batches))
    }

    /// Mean loss and accuracy over `valid`
    #[allow(clippy::cast_precision_loss)]
    fn evaluate(&self, valid: &TrialDataset) -> TrainResult<(f64, f64)> {
        let mut total = 0.0_f64;
        let mut correct = 0_usize;
        for trial in valid.iter() {
            let target = Self::target(trial.label);
            let log_probs = self.module.log_proba(squeeze(&trial.features));
            total += f64::from(self.criterion.loss(log_probs.view(), target));
            if argmax(log_probs.view()) == target {
                correct += 1;
            }
        }
        let n = valid.count() as f64;
        Ok((total / n, correct as f64 / n))
    }

    fn run_epochs(&mut self, dataset: &TrialDataset, epochs: usize) -> TrainResult<()> {
        self.check_dataset(dataset)?;

        let (train, valid) = match &self.split {
            Some(split) => {
                let (train, valid) = split.partition(dataset)?;
                (train, Some(valid))
            }
            None => (dataset.clone(), None),
        };
        if train.is_empty() {
            return Err(TrainError::EmptyDataset);
        }
        let valid = valid.filter(|v| !v.is_empty());

        tracing::info!(
            "Training on {} trials ({} validation) for {} epochs, lr {}",
            train.count(),
            valid.as_ref().map_or(0, |v| v.count()),
            epochs,
            self.optimizer.lr()
        );

        for _ in 0..epochs {
            let epoch = self.history.len() + 1;
            let started = Instant::now();

            let (train_loss, batches) = self.train_epoch(&train)?;
            if !train_loss.is_finite() {
                return Err(TrainError::NonFiniteLoss { epoch, loss: train_loss });
            }

            let (valid_loss, valid_acc) = match &valid {
                Some(valid) => {
                    let (loss, acc) = self.evaluate(valid)?;
                    (Some(loss), Some(acc))
                }
                None => (None, None),
            };

            let record = EpochRecord {
                epoch,
                train_loss,
                valid_loss,
                valid_acc,
                batches,
                dur: started.elapsed().as_secs_f64(),
            };
            tracing::info!(
                "epoch {:>3}  train_loss {:.4}  valid_loss {}  valid_acc {}  dur {:.2}s",
                record.epoch,
                record.train_loss,
                record.valid_loss.map_or_else(|| "-".to_string(), |l| format!("{l:.4}")),
                record.valid_acc.map_or_else(|| "-".to_string(), |a| format!("{a:.4}")),
                record.dur
            );
            self.history.epochs.push(record);
        }

        Ok(())
    }
}

impl Classifier for NeuralNet {
    fn fit(&mut self, dataset: &TrialDataset, epochs: usize) -> TrainResult<&History> {
        self.initialize();
        self.run_epochs(dataset, epochs)?;
        Ok(&self.history)
    }

    fn partial_fit(&mut self, dataset: &TrialDataset, epochs: usize) -> TrainResult<&History> {
        self.run_epochs(dataset, epochs)?;
        Ok(&self.history)
    }

    fn predict_proba(&self, trials: &dyn TrialSet) -> TrainResult<Array2<f32>> {
        let n_classes = self.module.spec().n_classes;
        let mut proba = Array2::<f32>::zeros((trials.count(), n_classes));
        for (index, mut row) in proba.outer_iter_mut().enumerate() {
            let trial = trials.at(index)?;
            self.check_trial_shape(&trial.features)?;
            let log_probs = self.module.log_proba(squeeze(&trial.features));
            row.assign(&log_probs.mapv(f32::exp));
        }
        Ok(proba)
    }

    fn predict(&self, trials: &dyn TrialSet) -> TrainResult<Array1<i64>> {
        Ok(argmax_rows(&self.predict_proba(trials)?))
    }

    fn history(&self) -> &History {
        &self.history
    }

    fn save_params(&self, path: &Path) -> TrainResult<()> {
        let json = serde_json::to_string(self.module.params())?;
        fs::write(path, json)?;
        tracing::debug!("Saved {} parameters to {}", self.module.params().len(), path.display());
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> TrainResult<()> {
        let json = fs::read_to_string(path)?;
        let params: ShallowNetParams = serde_json::from_str(&json)?;
        if !params.is_finite() {
            return Err(TrainError::InvalidParameter {
                parameter: "params",
                reason: format!("{} contains non-finite values", path.display()),
            });
        }
        self.module.set_params(params)?;
        tracing::debug!("Loaded parameters from {}", path.display());
        Ok(())
    }
}

/// Drop the trailing unit axis of a `(channels, times, 1)` trial
fn squeeze<'a>(features: &ndarray::ArrayView3<'a, f32>) -> ArrayView2<'a, f32> {
    features.clone().index_axis_move(Axis(2), 0)
}

fn argmax(values: ndarray::ArrayView1<'_, f32>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

fn step(optimizer: &mut dyn Optimizer, params: &mut ShallowNetParams, grads: &ShallowNetParams) -> TrainResult<()> {
    let mut param_views = params.views_mut();
    let grad_views = grads.views();
    optimizer.step(&mut param_views, &grad_views)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::optim::AdamWConfig;
    use ndarray::Array3;
    use rand::distributions::{Distribution, Uniform};
    use trialwise_core::{DatasetRole, SplitSize, TrainTestSplit};

    const CHANNELS: usize = 3;
    const TIMES: usize = 40;

    /// Class 0: channel 0 carries a strong oscillation. Class 1: channel 2.
    fn separable(n: usize, seed: u64) -> TrialDataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Uniform::new(-0.1_f32, 0.1);
        let labels: Array1<i64> = (0..n).map(|i| (i % 2) as i64).collect();
        let mut x = Array3::<f32>::zeros((n, CHANNELS, TIMES));
        for (i, mut trial) in x.outer_iter_mut().enumerate() {
            let active = if labels[i] == 0 { 0 } else { 2 };
            for ((c, t), v) in trial.indexed_iter_mut() {
                let signal = if c == active { (t as f32 * 0.7).sin() * 2.0 } else { 0.0 };
                *v = signal + noise.sample(&mut rng);
            }
        }
        TrialDataset::new(x.into_dyn(), labels).unwrap()
    }

    fn config() -> NeuralNetConfig {
        NeuralNetConfig {
            module: ShallowNetConfig { n_filters: 4, pool_length: 10, pool_stride: 5, log_eps: 1e-6 },
            optimizer: OptimizerKind::AdamW(AdamWConfig { lr: 0.05, weight_decay: 0.0, ..AdamWConfig::default() }),
            batch_size: 8,
            seed: 20_200_114,
        }
    }

    fn spec() -> ClassifierSpec {
        ClassifierSpec { in_chans: CHANNELS, n_classes: 2, input_time_length: TIMES }
    }

    #[test]
    fn test_loss_decreases_on_separable_data() {
        let data = separable(40, 1);
        let mut net = NeuralNet::new(config(), spec(), None).unwrap();
        let history = net.fit(&data, 15).unwrap();

        let losses = history.train_losses();
        assert_eq!(losses.len(), 15);
        assert!(losses[14] < losses[0], "loss did not decrease: {losses:?}");
        assert!(history.last().unwrap().valid_loss.is_none());

        let predicted = net.predict(&data).unwrap();
        let acc = crate::ml::accuracy(&predicted, data.labels());
        assert!(acc > 0.9, "accuracy {acc}");
    }

    #[test]
    fn test_validation_split_recorded() {
        let data = separable(30, 2);
        let split = TrainTestSplit::new(SplitSize::AbsoluteCount(20));
        let mut net = NeuralNet::new(config(), spec(), Some(Box::new(split))).unwrap();
        let history = net.fit(&data, 2).unwrap();

        let last = history.last().unwrap();
        assert!(last.valid_loss.is_some());
        assert!(last.valid_acc.is_some());
        // 20 training trials in batches of 8
        assert_eq!(last.batches, 3);
    }

    #[test]
    fn test_fit_restarts_partial_fit_continues() {
        let data = separable(16, 3);
        let mut net = NeuralNet::new(config(), spec(), None).unwrap();

        let first = net.fit(&data, 2).unwrap().clone();
        assert_eq!(net.partial_fit(&data, 1).unwrap().len(), 3);
        assert_eq!(net.history().last().unwrap().epoch, 3);

        // Same seed, same data: fit reproduces the first run
        let again = net.fit(&data, 2).unwrap();
        assert_eq!(again.len(), 2);
        for (a, b) in first.epochs.iter().zip(&again.epochs) {
            approx::assert_abs_diff_eq!(a.train_loss, b.train_loss, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_predict_proba_rows_sum_to_one() {
        let data = separable(10, 4);
        let mut net = NeuralNet::new(config(), spec(), None).unwrap();
        net.fit(&data, 1).unwrap();

        let test = data.tail(6, DatasetRole::Test).unwrap();
        let proba = net.predict_proba(&test).unwrap();
        assert_eq!(proba.shape(), &[4, 2]);
        for row in proba.outer_iter() {
            approx::assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-5);
        }
        assert_eq!(net.predict(&test).unwrap().len(), 4);
    }

    #[test]
    fn test_shape_mismatch() {
        let x = Array3::<f32>::zeros((4, CHANNELS + 1, TIMES)).into_dyn();
        let data = TrialDataset::new(x, Array1::zeros(4)).unwrap();
        let mut net = NeuralNet::new(config(), spec(), None).unwrap();

        assert!(matches!(net.fit(&data, 1), Err(TrainError::ShapeMismatch { .. })));
        assert!(matches!(net.predict(&data), Err(TrainError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_multi_plane_trials_rejected() {
        let x = ndarray::Array4::<f32>::zeros((4, CHANNELS, TIMES, 2)).into_dyn();
        let data = TrialDataset::new(x, Array1::zeros(4)).unwrap();
        let mut net = NeuralNet::new(config(), spec(), None).unwrap();

        match net.fit(&data, 1) {
            Err(TrainError::ShapeMismatch { expected, got }) => {
                assert_eq!(expected, [CHANNELS, TIMES, 1]);
                assert_eq!(got, [CHANNELS, TIMES, 2]);
            }
            other => panic!("expected shape mismatch, got {other:?}"),
        }
        assert!(matches!(net.predict_proba(&data), Err(TrainError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_empty_training_partition() {
        let data = separable(6, 5);
        let split = TrainTestSplit::new(SplitSize::AbsoluteCount(0));
        let mut net = NeuralNet::new(config(), spec(), Some(Box::new(split))).unwrap();
        assert!(matches!(net.fit(&data, 1), Err(TrainError::EmptyDataset)));
    }

    #[test]
    fn test_invalid_label() {
        let x = Array3::<f32>::zeros((2, CHANNELS, TIMES)).into_dyn();
        let data = TrialDataset::new(x, ndarray::array![0_i64, 2]).unwrap();
        let mut net = NeuralNet::new(config(), spec(), None).unwrap();
        assert!(matches!(net.fit(&data, 1), Err(TrainError::InvalidLabel { label: 2, n_classes: 2 })));
    }

    #[test]
    fn test_non_finite_loss() {
        let mut x = Array3::<f32>::zeros((2, CHANNELS, TIMES));
        x[[0, 0, 0]] = f32::NAN;
        let data = TrialDataset::new(x.into_dyn(), ndarray::array![0_i64, 1]).unwrap();
        let mut net = NeuralNet::new(config(), spec(), None).unwrap();
        assert!(matches!(net.fit(&data, 1), Err(TrainError::NonFiniteLoss { epoch: 1, .. })));
    }

    #[test]
    fn test_invalid_hyperparameters() {
        let zero_batch = NeuralNetConfig { batch_size: 0, ..config() };
        assert!(NeuralNet::new(zero_batch, spec(), None).is_err());
    }

    #[test]
    fn test_params_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        let data = separable(8, 6);

        let mut trained = NeuralNet::new(config(), spec(), None).unwrap();
        trained.fit(&data, 2).unwrap();
        trained.save_params(&path).unwrap();

        let mut fresh = NeuralNet::new(config(), spec(), None).unwrap();
        fresh.load_params(&path).unwrap();
        assert_eq!(fresh.module().params(), trained.module().params());
        assert_eq!(fresh.predict_proba(&data).unwrap(), trained.predict_proba(&data).unwrap());
    }

    #[test]
    fn test_factory_builds_classifier() {
        let classifier = config().build(spec(), None).unwrap();
        assert!(classifier.history().is_empty());
    }
}
