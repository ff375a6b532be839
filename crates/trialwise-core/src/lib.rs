//! Trialwise Core - trial datasets, partitioning and shared types
//!
//! This crate provides the data model for trialwise EEG decoding. It holds
//! no I/O and no training code: everything here is deterministic and
//! seed-independent.
//!
//! # Modules
//!
//! - [`dataset`]: The [`TrialSet`] interface and the [`TrialDataset`] adapter
//! - [`split`]: Order-preserving train/test partitioning ([`TrainTestSplit`])
//! - [`labels`]: Event-code to class-index remapping
//! - [`types`]: Channels, events, class maps and epoch windows
//! - [`error`]: Error types for datasets, splits and labels
//!
//! # Example
//!
//! ```rust
//! use ndarray::{Array1, Array3};
//! use trialwise_core::{SplitSize, TrainTestSplit, TrialDataset, TrialSet};
//!
//! // 10 trials, 4 channels, 32 samples each
//! let x = Array3::<f32>::zeros((10, 4, 32)).into_dyn();
//! let y = Array1::from_vec(vec![0_i64, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
//!
//! let full = TrialDataset::new(x, y).unwrap();
//! assert_eq!(full.shape(), [10, 4, 32, 1]);
//!
//! let (train, valid) = TrainTestSplit::new(SplitSize::Proportion(0.8))
//!     .partition(&full)
//!     .unwrap();
//! assert_eq!((train.count(), valid.count()), (8, 2));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod dataset;
pub mod error;
pub mod labels;
pub mod split;
pub mod types;

// Re-export commonly used types at crate root
pub use dataset::{DatasetRole, Trial, TrialDataset, TrialSet};
pub use error::{DatasetError, LabelError, SplitError};
pub use labels::remap_labels;
pub use split::{PartitionStrategy, SplitSize, TrainTestSplit};
pub use types::{ChannelInfo, ChannelKind, ClassCodeMap, EpochWindow, Event};
