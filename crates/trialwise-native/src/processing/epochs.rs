//! Fixed-window trial extraction around events
//!
//! A trial is the slice `[event + round(tmin * sfreq), event + round(tmax * sfreq)]`
//! (both ends inclusive) of the picked channels. Trials running off either
//! end of the recording, or touching a `BAD...` annotation, are dropped.

use ndarray::{Array1, Array3, Axis};
use trialwise_core::types::{ClassCodeMap, EpochWindow, Event};

use crate::error::{ProcessingError, ProcessingResult};
use crate::recording::RawRecording;

/// Extracted trials before label remapping.
#[derive(Clone, Debug)]
pub struct Trials {
    /// Trial tensor `(trials, channels, times)`
    pub data: Array3<f32>,
    /// Raw event code per trial
    pub codes: Array1<i64>,
    /// Windows rejected by bounds or bad annotations
    pub dropped: usize,
}

impl Trials {
    /// Number of kept trials
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether no trial was kept
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Cuts trials out of a continuous recording.
pub trait TrialExtractor {
    /// Extract one trial per event whose code is in `classes`.
    ///
    /// `picks` are channel indices; samples are multiplied by `scale`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessingError`] for invalid windows or picks, repeated
    /// events, or when no trial survives.
    fn extract_trials(
        &self,
        raw: &RawRecording,
        events: &[Event],
        classes: &ClassCodeMap,
        window: EpochWindow,
        picks: &[usize],
        scale: f64,
    ) -> ProcessingResult<Trials>;
}

/// Default epoching: no baseline correction, rejection by `BAD` annotations.
#[derive(Clone, Copy, Debug)]
pub struct Epocher {
    /// Drop windows overlapping `BAD...` annotations
    pub reject_by_annotation: bool,
}

impl Default for Epocher {
    fn default() -> Self {
        Self { reject_by_annotation: true }
    }
}

impl TrialExtractor for Epocher {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn extract_trials(
        &self,
        raw: &RawRecording,
        events: &[Event],
        classes: &ClassCodeMap,
        window: EpochWindow,
        picks: &[usize],
        scale: f64,
    ) -> ProcessingResult<Trials> {
        if !window.is_valid() {
            return Err(ProcessingError::InvalidWindow { tmin: window.tmin, tmax: window.tmax });
        }
        if let Some(&index) = picks.iter().find(|&&i| i >= raw.n_channels()) {
            return Err(ProcessingError::ChannelOutOfRange { index, available: raw.n_channels() });
        }

        let mut selected: Vec<Event> = events.iter().copied().filter(|e| classes.contains_code(e.code)).collect();
        selected.sort_by_key(|e| e.sample);
        if let Some(pair) = selected.windows(2).find(|w| w[0].sample == w[1].sample) {
            return Err(ProcessingError::RepeatedEvent {
                sample: pair[0].sample,
                first: pair[0].code,
                second: pair[1].code,
            });
        }

        let bad_spans: Vec<(i64, i64)> = if self.reject_by_annotation {
            raw.annotations
                .iter()
                .filter(|a| a.is_bad())
                .map(|a| a.sample_span(raw.sfreq))
                .collect()
        } else {
            Vec::new()
        };

        let (start_offset, end_offset) = window.sample_offsets(raw.sfreq);
        let n_times = window.n_times(raw.sfreq);
        let n_samples = raw.n_samples() as i64;

        let mut kept: Vec<(usize, u32)> = Vec::with_capacity(selected.len());
        let mut dropped = 0;
        for event in &selected {
            let start = event.sample as i64 + start_offset;
            let end = event.sample as i64 + end_offset;
            let in_bounds = start >= 0 && end < n_samples;
            let is_bad = bad_spans.iter().any(|&(bs, be)| start <= be && bs <= end);
            if in_bounds && !is_bad {
                kept.push((start as usize, event.code));
            } else {
                dropped += 1;
            }
        }

        if kept.is_empty() {
            return Err(ProcessingError::NoTrials { selected: selected.len(), dropped });
        }

        let picked = raw.data.select(Axis(0), picks);
        let mut data = Array3::<f32>::zeros((kept.len(), picks.len(), n_times));
        for (mut trial, &(start, _)) in data.outer_iter_mut().zip(&kept) {
            let source = picked.slice(ndarray::s![.., start..start + n_times]);
            trial.zip_mut_with(&source, |dst, &src| *dst = (src * scale) as f32);
        }
        let codes = kept.iter().map(|&(_, code)| i64::from(code)).collect();

        if dropped > 0 {
            tracing::warn!("Dropped {} of {} trials (out of bounds or bad segments)", dropped, selected.len());
        }
        tracing::info!(
            "Extracted {} trials: {} channels x {} samples",
            kept.len(),
            picks.len(),
            n_times
        );

        Ok(Trials { data, codes, dropped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Annotation, BAD_BOUNDARY};
    use ndarray::Array2;
    use trialwise_core::types::ChannelInfo;

    const SFREQ: f64 = 160.0;

    /// Two channels; channel `c` sample `t` holds `(c + 1) * t` microvolts.
    fn raw(n_samples: usize) -> RawRecording {
        let data = Array2::from_shape_fn((2, n_samples), |(c, t)| ((c + 1) * t) as f64 * 1e-6);
        RawRecording::new(vec![ChannelInfo::eeg("C3"), ChannelInfo::eeg("C4")], SFREQ, data).unwrap()
    }

    fn classes() -> ClassCodeMap {
        ClassCodeMap::motor_imagery()
    }

    #[test]
    fn test_window_length_at_160hz() {
        assert_eq!(EpochWindow::new(1.0, 4.1).n_times(SFREQ), 497);
    }

    #[test]
    fn test_extract_values_and_scaling() {
        let raw = raw(2000);
        let events = [Event::new(100, 2), Event::new(800, 3), Event::new(900, 1)];
        let trials = Epocher::default()
            .extract_trials(&raw, &events, &classes(), EpochWindow::new(1.0, 4.1), &[0, 1], 1e6)
            .unwrap();

        assert_eq!(trials.data.shape(), &[2, 2, 497]);
        assert_eq!(trials.codes.to_vec(), vec![2, 3]);
        assert_eq!(trials.dropped, 0);
        // First sample of trial 0 is event 100 + 160
        approx::assert_abs_diff_eq!(trials.data[[0, 0, 0]], 260.0, epsilon = 1e-3);
        approx::assert_abs_diff_eq!(trials.data[[0, 1, 496]], 2.0 * 756.0, epsilon = 1e-3);
    }

    #[test]
    fn test_picks_subset() {
        let raw = raw(1000);
        let trials = Epocher::default()
            .extract_trials(&raw, &[Event::new(0, 2)], &classes(), EpochWindow::new(0.0, 0.1), &[1], 1.0)
            .unwrap();
        assert_eq!(trials.data.shape(), &[1, 1, 17]);
    }

    #[test]
    fn test_out_of_bounds_dropped() {
        let raw = raw(1000);
        let events = [Event::new(100, 2), Event::new(600, 3)];
        let trials = Epocher::default()
            .extract_trials(&raw, &events, &classes(), EpochWindow::new(1.0, 4.1), &[0, 1], 1e6)
            .unwrap();
        assert_eq!(trials.len(), 1);
        assert_eq!(trials.dropped, 1);
    }

    #[test]
    fn test_bad_annotation_rejects_overlapping_window() {
        let raw = raw(3000).with_annotations(vec![Annotation::new(5.0, 0.0, BAD_BOUNDARY)]);
        // Window of event at 500 covers samples 660..=1156, boundary is at 800
        let events = [Event::new(500, 2), Event::new(1200, 3)];
        let trials = Epocher::default()
            .extract_trials(&raw, &events, &classes(), EpochWindow::new(1.0, 4.1), &[0], 1e6)
            .unwrap();
        assert_eq!(trials.codes.to_vec(), vec![3]);
        assert_eq!(trials.dropped, 1);

        let keep_all = Epocher { reject_by_annotation: false }
            .extract_trials(&raw, &events, &classes(), EpochWindow::new(1.0, 4.1), &[0], 1e6)
            .unwrap();
        assert_eq!(keep_all.len(), 2);
    }

    #[test]
    fn test_repeated_event() {
        let raw = raw(2000);
        let events = [Event::new(100, 2), Event::new(100, 3)];
        let err = Epocher::default()
            .extract_trials(&raw, &events, &classes(), EpochWindow::default(), &[0], 1e6)
            .unwrap_err();
        assert!(matches!(err, ProcessingError::RepeatedEvent { sample: 100, .. }));
    }

    #[test]
    fn test_invalid_window_and_picks() {
        let raw = raw(2000);
        let events = [Event::new(100, 2)];
        assert!(matches!(
            Epocher::default().extract_trials(&raw, &events, &classes(), EpochWindow::new(2.0, 1.0), &[0], 1.0),
            Err(ProcessingError::InvalidWindow { .. })
        ));
        assert!(matches!(
            Epocher::default().extract_trials(&raw, &events, &classes(), EpochWindow::default(), &[5], 1.0),
            Err(ProcessingError::ChannelOutOfRange { index: 5, available: 2 })
        ));
    }

    #[test]
    fn test_no_trials() {
        let raw = raw(2000);
        let err = Epocher::default()
            .extract_trials(&raw, &[Event::new(10, 1)], &classes(), EpochWindow::default(), &[0], 1.0)
            .unwrap_err();
        assert!(matches!(err, ProcessingError::NoTrials { selected: 0, dropped: 0 }));
    }
}
