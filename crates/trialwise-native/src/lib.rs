//! Trialwise Native - recordings, epoching and classifier training
//!
//! This crate provides the host-side half of trialwise:
//! - EDF/EDF+ recordings and the PhysioNet EEGBCI dataset
//! - Annotation events, channel picks and fixed-window trials
//! - A shallow filter-bank network trained with AdamW or SGD
//! - The end-to-end decoding pipeline
//!
//! # Modules
//!
//! - [`recording`]: Continuous recordings and where they come from
//! - [`processing`]: Events, channels and trial extraction
//! - [`ml`]: Classifier traits and the shallow network
//! - [`pipeline`]: Stage sequencing and configuration
//! - [`error`]: Error types for every stage

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod ml;
pub mod pipeline;
pub mod processing;
pub mod recording;

// Re-export key types
pub use error::{PipelineError, ProcessingError, RecordingError, TrainError};
pub use ml::{Classifier, ClassifierFactory, ClassifierSpec, History, NeuralNet, NeuralNetConfig};
pub use pipeline::{Pipeline, PipelineConfig, PipelineReport};
pub use recording::{Annotation, EegbciProvider, RawRecording, RecordingsProvider};
