//! Order-preserving train/test partitioning
//!
//! EEG trials keep their recording order: the first `n` trials train, the
//! rest validate. There is no shuffling, so the same dataset and the same
//! [`SplitSize`] always produce identical partitions.

use serde::{Deserialize, Serialize};

use crate::dataset::{DatasetRole, TrialDataset, TrialSet};
use crate::error::SplitError;

/// How many leading samples form the training partition.
///
/// Deserialises untagged: an integer is an absolute count, a float is a
/// proportion of the dataset.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SplitSize {
    /// Absolute number of training samples
    AbsoluteCount(usize),
    /// Fraction of the dataset, conventionally in `(0, 1)`
    Proportion(f64),
}

impl SplitSize {
    /// Resolve to an absolute training count for a dataset of `total`
    /// samples. Proportions are floored.
    ///
    /// # Errors
    ///
    /// - [`SplitError::NonFiniteProportion`] for NaN or infinite proportions
    /// - [`SplitError::InvalidSplit`] if the count falls outside `[0, total]`
    ///
    /// ```
    /// use trialwise_core::SplitSize;
    ///
    /// assert_eq!(SplitSize::AbsoluteCount(40).resolve(100).unwrap(), 40);
    /// assert_eq!(SplitSize::Proportion(0.75).resolve(10).unwrap(), 7);
    /// assert!(SplitSize::Proportion(1.5).resolve(10).is_err());
    /// ```
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    pub fn resolve(self, total: usize) -> Result<usize, SplitError> {
        let resolved: i64 = match self {
            Self::AbsoluteCount(n) => i64::try_from(n).unwrap_or(i64::MAX),
            Self::Proportion(p) => {
                if !p.is_finite() {
                    return Err(SplitError::NonFiniteProportion { proportion: p });
                }
                (p * total as f64).floor() as i64
            }
        };

        match usize::try_from(resolved) {
            Ok(n) if n <= total => Ok(n),
            _ => Err(SplitError::InvalidSplit { resolved, available: total }),
        }
    }
}

/// Strategy that splits a dataset into a training and a validation part.
pub trait PartitionStrategy {
    /// Partition `dataset` into `(train, valid)`.
    ///
    /// # Errors
    ///
    /// Returns a [`SplitError`] if the configured split cannot be applied.
    fn partition(&self, dataset: &TrialDataset) -> Result<(TrialDataset, TrialDataset), SplitError>;
}

/// Deterministic head/tail split.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainTestSplit {
    size: SplitSize,
}

impl TrainTestSplit {
    /// Create a splitter with the given training size
    #[must_use]
    pub const fn new(size: SplitSize) -> Self {
        Self { size }
    }

    /// Configured training size
    #[must_use]
    pub const fn size(&self) -> SplitSize {
        self.size
    }

    /// First `n` trials become the training partition, the remainder the
    /// validation partition. Both share the input's storage.
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::InvalidSplit`] if the size does not resolve to a
    /// count in `[0, dataset.count()]`.
    pub fn partition(&self, dataset: &TrialDataset) -> Result<(TrialDataset, TrialDataset), SplitError> {
        let count = dataset.count();
        let n_train = self.size.resolve(count)?;

        let train = dataset.slice(0..n_train, DatasetRole::Train)?;
        let valid = dataset.slice(n_train..count, DatasetRole::Valid)?;
        Ok((train, valid))
    }
}

impl PartitionStrategy for TrainTestSplit {
    fn partition(&self, dataset: &TrialDataset) -> Result<(TrialDataset, TrialDataset), SplitError> {
        TrainTestSplit::partition(self, dataset)
    }
}

// ============================================================================
// Tests
// ============================================================================
