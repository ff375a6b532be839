//! Continuous recordings
//!
//! This module provides the in-memory recording type and its sources:
//! - [`RawRecording`]: multi-channel continuous signal plus annotations
//! - [`RecordingsProvider`]: fetch-and-read abstraction over a dataset
//! - [`edf`]: EDF/EDF+ decoding (requires `edf` feature)
//! - [`eegbci`]: PhysioNet EEG Motor Movement/Imagery provider

#[cfg(feature = "edf")]
pub mod edf;
pub mod eegbci;

use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use trialwise_core::types::ChannelInfo;

use crate::error::{RecordingError, RecordingResult};

pub use eegbci::EegbciProvider;

/// Description inserted where two recordings were joined.
pub const BAD_BOUNDARY: &str = "BAD boundary";

/// Companion marker for the join point; never rejects data.
pub const EDGE_BOUNDARY: &str = "EDGE boundary";

// ============================================================================
// Annotations
// ============================================================================

/// Timed text annotation attached to a recording.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Onset in seconds from the start of the recording
    pub onset: f64,
    /// Duration in seconds (0 for instantaneous markers)
    pub duration: f64,
    /// Free-text description (e.g. `T1`)
    pub description: String,
}

impl Annotation {
    /// Create a new annotation
    #[must_use]
    pub fn new(onset: f64, duration: f64, description: impl Into<String>) -> Self {
        Self { onset, duration, description: description.into() }
    }

    /// Whether this annotation marks bad data (`BAD...`, case-insensitive)
    #[must_use]
    pub fn is_bad(&self) -> bool {
        has_prefix_ignore_case(&self.description, "BAD")
    }

    /// Whether this annotation is an edge marker (`EDGE...`, case-insensitive)
    #[must_use]
    pub fn is_edge(&self) -> bool {
        has_prefix_ignore_case(&self.description, "EDGE")
    }

    /// First and last sample covered by the annotation (inclusive)
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample_span(&self, sfreq: f64) -> (i64, i64) {
        let start = (self.onset * sfreq).round() as i64;
        let end = ((self.onset + self.duration.max(0.0)) * sfreq).round() as i64;
        (start, end)
    }
}

fn has_prefix_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len() && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

// ============================================================================
// Raw Recording
// ============================================================================

/// Continuous multi-channel recording.
///
/// Signal data is stored in volts as `(channels, samples)`.
#[derive(Clone, Debug)]
pub struct RawRecording {
    /// Channel descriptors, one per data row
    pub channels: Vec<ChannelInfo>,
    /// Sample rate (Hz)
    pub sfreq: f64,
    /// Signal data in volts, shape `(channels, samples)`
    pub data: Array2<f64>,
    /// Timed annotations
    pub annotations: Vec<Annotation>,
    /// Names of channels marked bad
    pub bads: Vec<String>,
}

impl RawRecording {
    /// Create a recording without annotations.
    ///
    /// # Errors
    ///
    /// Returns [`RecordingError::Malformed`] if the data rows do not match
    /// the channel list or the sample rate is not positive.
    pub fn new(channels: Vec<ChannelInfo>, sfreq: f64, data: Array2<f64>) -> RecordingResult<Self> {
        if data.nrows() != channels.len() {
            return Err(RecordingError::Malformed {
                reason: format!("{} data rows for {} channels", data.nrows(), channels.len()),
            });
        }
        if !(sfreq.is_finite() && sfreq > 0.0) {
            return Err(RecordingError::Malformed {
                reason: format!("sample rate {sfreq} Hz"),
            });
        }

        Ok(Self {
            channels,
            sfreq,
            data,
            annotations: Vec::new(),
            bads: Vec::new(),
        })
    }

    /// Attach annotations (builder style)
    #[must_use]
    pub fn with_annotations(mut self, annotations: Vec<Annotation>) -> Self {
        self.annotations = annotations;
        self
    }

    /// Mark channels bad (builder style)
    #[must_use]
    pub fn with_bads(mut self, bads: Vec<String>) -> Self {
        self.bads = bads;
        self
    }

    /// Number of channels
    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    /// Number of samples per channel
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        self.n_samples() as f64 / self.sfreq
    }

    /// Channel names in data order
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name.as_str())
    }

    /// Whether the named channel is marked bad
    #[must_use]
    pub fn is_bad_channel(&self, name: &str) -> bool {
        self.bads.iter().any(|b| b == name)
    }

    /// Borrow the signal data
    #[must_use]
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Join recordings end to end.
    ///
    /// Annotation onsets are shifted by the duration of everything before
    /// them, and a zero-length `BAD boundary` / `EDGE boundary` pair is
    /// inserted at every junction so trials spanning a join can be rejected.
    ///
    /// # Errors
    ///
    /// - [`RecordingError::Empty`] for an empty input
    /// - [`RecordingError::Incompatible`] if channel names or sample rates differ
    #[allow(clippy::cast_precision_loss)]
    pub fn concatenate(raws: Vec<RawRecording>) -> RecordingResult<Self> {
        let mut raws = raws.into_iter();
        let Some(first) = raws.next() else {
            return Err(RecordingError::Empty);
        };

        let rest: Vec<RawRecording> = raws.collect();
        if rest.is_empty() {
            return Ok(first);
        }

        for (i, raw) in rest.iter().enumerate() {
            if (raw.sfreq - first.sfreq).abs() > 1e-9 {
                return Err(RecordingError::Incompatible {
                    reason: format!(
                        "recording {} has sample rate {} Hz, expected {} Hz",
                        i + 1,
                        raw.sfreq,
                        first.sfreq
                    ),
                });
            }
            if !raw.channel_names().eq(first.channel_names()) {
                return Err(RecordingError::Incompatible {
                    reason: format!("recording {} has a different channel list", i + 1),
                });
            }
        }

        let sfreq = first.sfreq;
        let mut annotations = first.annotations.clone();
        let mut bads = first.bads.clone();
        let mut offset_samples = first.n_samples();

        for raw in &rest {
            let offset = offset_samples as f64 / sfreq;
            annotations.push(Annotation::new(offset, 0.0, BAD_BOUNDARY));
            annotations.push(Annotation::new(offset, 0.0, EDGE_BOUNDARY));
            annotations.extend(raw.annotations.iter().map(|a| Annotation {
                onset: a.onset + offset,
                ..a.clone()
            }));
            for bad in &raw.bads {
                if !bads.contains(bad) {
                    bads.push(bad.clone());
                }
            }
            offset_samples += raw.n_samples();
        }

        let views: Vec<ArrayView2<'_, f64>> = std::iter::once(first.data.view())
            .chain(rest.iter().map(|r| r.data.view()))
            .collect();
        let data = ndarray::concatenate(Axis(1), &views).map_err(|e| RecordingError::Incompatible {
            reason: e.to_string(),
        })?;

        tracing::debug!(
            "Concatenated {} recordings: {} samples at {} Hz",
            rest.len() + 1,
            data.ncols(),
            sfreq
        );

        Ok(Self {
            channels: first.channels,
            sfreq,
            data,
            annotations,
            bads,
        })
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Source of recordings for a subject.
pub trait RecordingsProvider {
    /// Make the requested runs available locally and return their paths,
    /// in run order.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordingError`] if a run is invalid or cannot be fetched.
    fn fetch(&self, subject: u32, runs: &[u32]) -> RecordingResult<Vec<PathBuf>>;

    /// Decode one fetched file.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordingError`] if the file cannot be read or decoded.
    fn read(&self, path: &Path) -> RecordingResult<RawRecording>;
}

// ============================================================================
// Tests
// ============================================================================
