//! EDF/EDF+ decoding via `edfplus`

use std::path::Path;

use edfplus::EdfReader;
use ndarray::Array2;
use trialwise_core::types::ChannelInfo;

use super::{Annotation, RawRecording};
use crate::error::{RecordingError, RecordingResult};

/// EDF time unit (100 ns) per second
const EDF_TIME_UNITS: f64 = 10_000_000.0;

/// Label of the EDF+ annotation pseudo-signal
const ANNOTATION_LABEL: &str = "EDF Annotations";

/// Scale factor from a physical dimension string to volts.
///
/// Unknown or empty dimensions are treated as volts.
#[must_use]
pub fn unit_scale(dimension: &str) -> f64 {
    match dimension.trim() {
        "uV" | "µV" | "μV" | "uv" => 1e-6,
        "mV" | "mv" => 1e-3,
        "nV" => 1e-9,
        _ => 1.0,
    }
}

/// Normalise an EDF channel label: strip whitespace and trailing dots
/// (EEGBCI pads labels like `C3..` and `Fc5.`).
#[must_use]
pub fn clean_label(label: &str) -> String {
    label.trim().trim_end_matches('.').to_string()
}

/// Read an EDF/EDF+ file into a [`RawRecording`] with data in volts.
///
/// # Errors
///
/// - [`RecordingError::Edf`] if the file cannot be decoded
/// - [`RecordingError::MixedSampleRates`] if data signals differ in rate
#[allow(clippy::cast_precision_loss)]
pub fn read_edf(path: &Path) -> RecordingResult<RawRecording> {
    let edf_err = |e: &dyn std::fmt::Display| RecordingError::Edf {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut reader = EdfReader::open(path).map_err(|e| edf_err(&e))?;

    let header = reader.header();
    let record_seconds = header.datarecord_duration as f64 / EDF_TIME_UNITS;
    if record_seconds <= 0.0 {
        return Err(RecordingError::Edf {
            path: path.to_path_buf(),
            reason: format!("data record duration {record_seconds} s"),
        });
    }

    // (index, label, samples, unit scale)
    let mut signals = Vec::new();
    let mut sfreq: Option<f64> = None;
    for (index, signal) in header.signals.iter().enumerate() {
        if signal.label.trim() == ANNOTATION_LABEL {
            continue;
        }
        let rate = signal.samples_per_record as f64 / record_seconds;
        match sfreq {
            None => sfreq = Some(rate),
            Some(first) if (first - rate).abs() > 1e-9 => {
                return Err(RecordingError::MixedSampleRates {
                    path: path.to_path_buf(),
                    first,
                    other: rate,
                });
            }
            Some(_) => {}
        }
        let n_samples = usize::try_from(signal.samples_in_file).unwrap_or(0);
        signals.push((index, clean_label(&signal.label), n_samples, unit_scale(&signal.physical_dimension)));
    }

    let Some(sfreq) = sfreq else {
        return Err(RecordingError::Edf {
            path: path.to_path_buf(),
            reason: "no data signals".to_string(),
        });
    };

    let annotations: Vec<Annotation> = reader
        .annotations()
        .iter()
        .map(|a| {
            let duration = if a.duration >= 0 { a.duration as f64 / EDF_TIME_UNITS } else { 0.0 };
            Annotation::new(a.onset as f64 / EDF_TIME_UNITS, duration, a.description.trim())
        })
        .collect();

    let n_samples = signals.iter().map(|s| s.2).min().unwrap_or(0);
    let mut data = Array2::<f64>::zeros((signals.len(), n_samples));
    let mut channels = Vec::with_capacity(signals.len());

    for (row, (index, label, _, scale)) in signals.into_iter().enumerate() {
        let samples = reader
            .read_physical_samples(index, n_samples)
            .map_err(|e| edf_err(&e))?;
        for (dst, value) in data.row_mut(row).iter_mut().zip(samples) {
            *dst = value * scale;
        }
        channels.push(ChannelInfo::from_label(&label));
    }

    tracing::debug!(
        "Read {}: {} channels, {} samples at {} Hz, {} annotations",
        path.display(),
        channels.len(),
        n_samples,
        sfreq,
        annotations.len()
    );

    Ok(RawRecording::new(channels, sfreq, data)?.with_annotations(annotations))
}
