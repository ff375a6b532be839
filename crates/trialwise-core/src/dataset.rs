//! Trial dataset adapter
//!
//! Wraps a trial tensor and a label vector into an indexable collection of
//! `(features, label)` pairs. The tensor is normalised to rank 4
//! `(trials, channels, times, 1)` on construction, which is the input rank
//! the shallow network consumes.
//!
//! Sub-datasets (train / validation / test partitions) share the parent's
//! storage: a [`TrialDataset`] is a pair of reference-counted arrays plus a
//! contiguous trial window, so slicing never copies signal data.

use std::ops::Range;
use std::sync::Arc;

use ndarray::{s, Array1, Array4, ArrayD, ArrayView1, ArrayView3, ArrayView4, Axis, Ix4};
use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

// ============================================================================
// TrialSet interface
// ============================================================================

/// One trial borrowed from a dataset.
#[derive(Clone, Debug)]
pub struct Trial<'a> {
    /// Trial features, shape `(channels, times, 1)`
    pub features: ArrayView3<'a, f32>,
    /// Class label
    pub label: i64,
}

/// An indexable, read-only collection of trials.
///
/// Anything the classifier iterates over implements this: the full dataset
/// as well as its train, validation and test partitions.
pub trait TrialSet {
    /// Number of trials.
    fn count(&self) -> usize;

    /// Trial at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::IndexOutOfRange`] when `index >= count()`.
    fn at(&self, index: usize) -> Result<Trial<'_>, DatasetError>;

    /// Whether the set holds no trials.
    fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

// ============================================================================
// TrialDataset
// ============================================================================

/// Which logical dataset an adapter represents.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetRole {
    /// All extracted trials
    Full,
    /// Training partition
    Train,
    /// Validation partition used during fitting
    Valid,
    /// Held-out evaluation set
    Test,
}

/// Dataset adapter over a shared rank-4 trial tensor and label vector.
#[derive(Clone, Debug)]
pub struct TrialDataset {
    features: Arc<Array4<f32>>,
    labels: Arc<Array1<i64>>,
    window: Range<usize>,
    role: DatasetRole,
}

impl TrialDataset {
    /// Build a full dataset from a trial tensor and a label vector.
    ///
    /// A rank-3 tensor `(trials, channels, times)` gains a trailing unit
    /// axis; a rank-4 tensor is kept as is.
    ///
    /// # Errors
    ///
    /// - [`DatasetError::UnsupportedRank`] for tensors that are not rank 3 or 4
    /// - [`DatasetError::ShapeMismatch`] when label and trial counts differ
    pub fn new(features: ArrayD<f32>, labels: Array1<i64>) -> Result<Self, DatasetError> {
        let features = match features.ndim() {
            3 => features.insert_axis(Axis(3)),
            4 => features,
            rank => return Err(DatasetError::UnsupportedRank { rank }),
        };

        let features = features
            .into_dimensionality::<Ix4>()
            .map_err(|_| DatasetError::UnsupportedRank { rank: 4 })?;

        let trials = features.shape()[0];
        if labels.len() != trials {
            return Err(DatasetError::ShapeMismatch { trials, labels: labels.len() });
        }

        Ok(Self {
            features: Arc::new(features),
            labels: Arc::new(labels),
            window: 0..trials,
            role: DatasetRole::Full,
        })
    }

    /// Zero-copy sub-dataset over `range` (relative to this dataset).
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::RangeOutOfBounds`] if the range is reversed or
    /// extends past `count()`.
    pub fn slice(&self, range: Range<usize>, role: DatasetRole) -> Result<Self, DatasetError> {
        let count = self.count();
        if range.start > range.end || range.end > count {
            return Err(DatasetError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                count,
            });
        }

        let offset = self.window.start;
        Ok(Self {
            features: Arc::clone(&self.features),
            labels: Arc::clone(&self.labels),
            window: offset + range.start..offset + range.end,
            role,
        })
    }

    /// Sub-dataset holding every trial from `from` to the end.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::RangeOutOfBounds`] if `from > count()`.
    pub fn tail(&self, from: usize, role: DatasetRole) -> Result<Self, DatasetError> {
        self.slice(from..self.count(), role)
    }

    /// Rank-4 view `(trials, channels, times, 1)` of this dataset's trials
    pub fn features(&self) -> ArrayView4<'_, f32> {
        self.features.slice(s![self.window.clone(), .., .., ..])
    }

    /// Labels of this dataset's trials
    pub fn labels(&self) -> ArrayView1<'_, i64> {
        self.labels.slice(s![self.window.clone()])
    }

    /// Shape `[trials, channels, times, 1]`
    pub fn shape(&self) -> [usize; 4] {
        let dims = self.features.shape();
        [self.count(), dims[1], dims[2], dims[3]]
    }

    /// Number of channels per trial
    pub fn n_channels(&self) -> usize {
        self.features.shape()[1]
    }

    /// Number of time samples per trial
    pub fn n_times(&self) -> usize {
        self.features.shape()[2]
    }

    /// Role of this adapter
    pub fn role(&self) -> DatasetRole {
        self.role
    }

    /// Position of this dataset's first trial in the original tensor
    pub fn origin(&self) -> usize {
        self.window.start
    }

    /// Iterate over all trials in order
    pub fn iter(&self) -> impl Iterator<Item = Trial<'_>> + '_ {
        self.window.clone().map(move |i| self.trial_unchecked(i))
    }

    fn trial_unchecked(&self, absolute: usize) -> Trial<'_> {
        Trial {
            features: self.features.index_axis(Axis(0), absolute),
            label: self.labels[absolute],
        }
    }
}

impl TrialSet for TrialDataset {
    fn count(&self) -> usize {
        self.window.len()
    }

    fn at(&self, index: usize) -> Result<Trial<'_>, DatasetError> {
        let count = self.count();
        if index >= count {
            return Err(DatasetError::IndexOutOfRange { index, count });
        }
        Ok(self.trial_unchecked(self.window.start + index))
    }
}

// ============================================================================
// Tests
// ============================================================================
