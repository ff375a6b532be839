//! Error types for host-side processing
//!
//! Error types for recordings, epoching, training and the pipeline using
//! `thiserror`.

use std::path::PathBuf;

use thiserror::Error;
use trialwise_core::{DatasetError, LabelError, SplitError};

/// Recording acquisition and decoding errors
#[derive(Error, Debug)]
pub enum RecordingError {
    /// Filesystem error
    #[error("IO error on {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// EDF decoding failed
    #[error("Failed to decode EDF file {path}: {reason}")]
    Edf {
        /// File being decoded
        path: PathBuf,
        /// Decoder message
        reason: String,
    },

    /// Signals in one file use different sample rates
    #[error("Mixed sample rates in {path}: {first} Hz vs {other} Hz")]
    MixedSampleRates {
        /// File being decoded
        path: PathBuf,
        /// Rate of the first data signal
        first: f64,
        /// Conflicting rate
        other: f64,
    },

    /// HTTP download failed
    #[error("Download of {url} failed: {reason}")]
    Download {
        /// Requested URL
        url: String,
        /// Failure description
        reason: String,
    },

    /// Support for this operation was not compiled in
    #[error("{operation} requires the `{feature}` feature")]
    Unsupported {
        /// Operation that was attempted
        operation: &'static str,
        /// Cargo feature that enables it
        feature: &'static str,
    },

    /// Subject outside the dataset's range
    #[error("Invalid subject {subject}: expected 1..={max}")]
    InvalidSubject {
        /// Requested subject
        subject: u32,
        /// Highest subject number
        max: u32,
    },

    /// Run outside the dataset's range
    #[error("Invalid run {run}: expected 1..={max}")]
    InvalidRun {
        /// Requested run
        run: u32,
        /// Highest run number
        max: u32,
    },

    /// Recordings cannot be concatenated
    #[error("Incompatible recordings: {reason}")]
    Incompatible {
        /// What differs
        reason: String,
    },

    /// Recording contents are inconsistent
    #[error("Malformed recording: {reason}")]
    Malformed {
        /// What is wrong
        reason: String,
    },

    /// Nothing to concatenate
    #[error("No recordings to concatenate")]
    Empty,
}

/// Event, channel and epoch extraction errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// Channel selection matched nothing
    #[error("No channels match the selection ({criteria})")]
    NoChannels {
        /// Selection description
        criteria: String,
    },

    /// Picked channel index outside the recording
    #[error("Channel index {index} out of range ({available} channels)")]
    ChannelOutOfRange {
        /// Requested index
        index: usize,
        /// Number of channels in the recording
        available: usize,
    },

    /// Malformed trial window
    #[error("Invalid trial window: tmin {tmin} s, tmax {tmax} s")]
    InvalidWindow {
        /// Window start
        tmin: f64,
        /// Window end
        tmax: f64,
    },

    /// Two selected events share the same sample
    #[error("Repeated event at sample {sample} (codes {first} and {second})")]
    RepeatedEvent {
        /// Shared sample
        sample: usize,
        /// Code of the first event
        first: u32,
        /// Code of the second event
        second: u32,
    },

    /// No trial survived extraction
    #[error("No trials extracted: {selected} events selected, {dropped} dropped")]
    NoTrials {
        /// Events matching the class map
        selected: usize,
        /// Windows dropped
        dropped: usize,
    },

    /// Remapping event codes failed
    #[error("Label error: {0}")]
    Labels(#[from] LabelError),
}

/// Classifier construction, training and inference errors
#[derive(Error, Debug)]
pub enum TrainError {
    /// Nothing to train on
    #[error("Training partition is empty")]
    EmptyDataset,

    /// Input does not match the network's configured shape
    #[error("Input shape mismatch: network expects {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// `[channels, times, 1]` the network was built for
        expected: [usize; 3],
        /// `[channels, times, depth]` of the input
        got: [usize; 3],
    },

    /// Label outside `0..n_classes`
    #[error("Label {label} outside 0..{n_classes}")]
    InvalidLabel {
        /// Offending label
        label: i64,
        /// Number of classes
        n_classes: usize,
    },

    /// Invalid hyperparameter
    #[error("Invalid hyperparameter {parameter}: {reason}")]
    InvalidParameter {
        /// Parameter name
        parameter: &'static str,
        /// Reason
        reason: String,
    },

    /// Loss became NaN or infinite
    #[error("Training diverged at epoch {epoch}: loss {loss}")]
    NonFiniteLoss {
        /// Training epoch (1-based)
        epoch: usize,
        /// Offending loss value
        loss: f64,
    },

    /// Optimizer state does not match the parameters it is stepping
    #[error("Optimizer state mismatch: {reason}")]
    OptimizerState {
        /// What differs
        reason: String,
    },

    /// Partitioning the training data failed
    #[error("Split error: {0}")]
    Split(#[from] SplitError),

    /// Dataset access failed
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// Parameter file IO failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parameter file (de)serialisation failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from any pipeline stage
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Recording stage failed
    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    /// Event/channel/epoch stage failed
    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    /// Dataset construction failed
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// Classifier stage failed
    #[error("Training error: {0}")]
    Train(#[from] TrainError),
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

/// Result type for processing operations
pub type ProcessingResult<T> = Result<T, ProcessingError>;

/// Result type for training operations
pub type TrainResult<T> = Result<T, TrainError>;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
