//! Error types for trialwise core
//!
//! The core crate stays free of error-derive machinery: every error is a
//! plain enum carrying enough context to explain the failure, with a
//! hand-written `Display` implementation.

use core::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Dataset Errors
// ============================================================================

/// Errors raised while building or indexing a trial dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetError {
    /// Label vector length disagrees with the trial tensor's leading axis
    ShapeMismatch {
        /// Number of trials in the feature tensor
        trials: usize,
        /// Number of labels supplied
        labels: usize,
    },
    /// Feature tensor is neither rank 3 nor rank 4
    UnsupportedRank {
        /// Rank of the tensor that was supplied
        rank: usize,
    },
    /// Trial index outside `[0, count)`
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of trials in the dataset
        count: usize,
    },
    /// Sub-range does not fit inside the dataset
    RangeOutOfBounds {
        /// Requested range start
        start: usize,
        /// Requested range end (exclusive)
        end: usize,
        /// Number of trials in the dataset
        count: usize,
    },
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch { trials, labels } => {
                write!(f, "Shape mismatch: {trials} trials but {labels} labels")
            }
            Self::UnsupportedRank { rank } => {
                write!(f, "Unsupported trial tensor rank {rank} (expected 3 or 4)")
            }
            Self::IndexOutOfRange { index, count } => {
                write!(f, "Trial index {index} out of range for dataset of {count} trials")
            }
            Self::RangeOutOfBounds { start, end, count } => {
                write!(f, "Range {start}..{end} out of bounds for dataset of {count} trials")
            }
        }
    }
}

impl std::error::Error for DatasetError {}

// ============================================================================
// Split Errors
// ============================================================================

/// Errors raised while resolving a split size or partitioning a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SplitError {
    /// Resolved training count falls outside `[0, available]`
    InvalidSplit {
        /// Resolved training count (may be negative for proportions)
        resolved: i64,
        /// Number of samples available
        available: usize,
    },
    /// Proportion is NaN or infinite
    NonFiniteProportion {
        /// The offending proportion
        proportion: f64,
    },
    /// Building the partitions failed
    Dataset(DatasetError),
}

impl fmt::Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSplit { resolved, available } => {
                write!(
                    f,
                    "Invalid split: resolved training count {resolved} outside [0, {available}]"
                )
            }
            Self::NonFiniteProportion { proportion } => {
                write!(f, "Invalid split: proportion {proportion} is not finite")
            }
            Self::Dataset(e) => write!(f, "Split failed: {e}"),
        }
    }
}

impl std::error::Error for SplitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dataset(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DatasetError> for SplitError {
    fn from(e: DatasetError) -> Self {
        Self::Dataset(e)
    }
}

// ============================================================================
// Label Errors
// ============================================================================

/// Errors raised while remapping event codes to class indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelError {
    /// A label carries an event code that is not one of the class codes
    UnknownCode {
        /// Position of the offending label
        position: usize,
        /// The unknown event code
        code: i64,
    },
    /// No class codes were supplied
    NoClasses,
}

impl fmt::Display for LabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCode { position, code } => {
                write!(f, "Label {position} has unknown event code {code}")
            }
            Self::NoClasses => write!(f, "No class codes to remap labels onto"),
        }
    }
}

impl std::error::Error for LabelError {}

// ============================================================================
// Tests
// ============================================================================
