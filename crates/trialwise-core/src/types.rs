//! Core types shared across trialwise crates
//!
//! This module provides the small vocabulary types that flow between the
//! recording, epoching and training stages:
//! - Channel kinds and channel descriptors
//! - Discrete events (sample offset + event code)
//! - Class-name to event-code maps
//! - Epoch windows relative to an event

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Channels
// ============================================================================

/// Kind of signal carried by a recording channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Scalp electroencephalography
    Eeg,
    /// Electrooculography
    Eog,
    /// Electromyography
    Emg,
    /// Electrocardiography
    Ecg,
    /// Stimulus / trigger channel
    Stim,
    /// Anything else
    Misc,
}

impl ChannelKind {
    /// Infer the channel kind from an EDF signal label.
    ///
    /// Labels without a recognised prefix are treated as EEG, which is how
    /// EDF readers conventionally type unlabelled scalp channels.
    ///
    /// ```
    /// use trialwise_core::types::ChannelKind;
    ///
    /// assert_eq!(ChannelKind::from_label("C3.."), ChannelKind::Eeg);
    /// assert_eq!(ChannelKind::from_label("EOG left"), ChannelKind::Eog);
    /// assert_eq!(ChannelKind::from_label("Status"), ChannelKind::Stim);
    /// ```
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let upper = label.trim().to_ascii_uppercase();
        if upper.starts_with("EOG") {
            Self::Eog
        } else if upper.starts_with("EMG") {
            Self::Emg
        } else if upper.starts_with("ECG") || upper.starts_with("EKG") {
            Self::Ecg
        } else if upper.starts_with("STI") || upper == "STATUS" || upper == "TRIGGER" {
            Self::Stim
        } else {
            Self::Eeg
        }
    }

    /// Short lowercase name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Eeg => "eeg",
            Self::Eog => "eog",
            Self::Emg => "emg",
            Self::Ecg => "ecg",
            Self::Stim => "stim",
            Self::Misc => "misc",
        }
    }
}

/// Name and kind of one recording channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel label as stored in the recording
    pub name: String,
    /// Signal kind
    pub kind: ChannelKind,
}

impl ChannelInfo {
    /// Create a channel descriptor, inferring the kind from the label.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        Self {
            name: label.trim().to_string(),
            kind: ChannelKind::from_label(label),
        }
    }

    /// Create an EEG channel descriptor.
    #[must_use]
    pub fn eeg(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: ChannelKind::Eeg }
    }
}

// ============================================================================
// Events
// ============================================================================

/// A discrete event: sample offset into the continuous recording plus the
/// integer event code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Event {
    /// Sample index of the event onset
    pub sample: usize,
    /// Event code
    pub code: u32,
}

impl Event {
    /// Create a new event
    #[inline]
    #[must_use]
    pub const fn new(sample: usize, code: u32) -> Self {
        Self { sample, code }
    }
}

// ============================================================================
// Class Code Map
// ============================================================================

/// Mapping from class name to the event code that marks it.
///
/// Iteration order is by class name; [`ClassCodeMap::codes`] returns the
/// codes in ascending order, which is also the order class indices are
/// assigned in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassCodeMap(BTreeMap<String, u32>);

impl ClassCodeMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Two-class motor imagery map used with the EEGBCI runs:
    /// `hands_or_left = 2`, `feet_or_right = 3`.
    #[must_use]
    pub fn motor_imagery() -> Self {
        let mut map = Self::new();
        map.insert("hands_or_left", 2);
        map.insert("feet_or_right", 3);
        map
    }

    /// Add or replace a class
    pub fn insert(&mut self, name: impl Into<String>, code: u32) {
        self.0.insert(name.into(), code);
    }

    /// Number of classes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `code` marks one of the classes
    #[must_use]
    pub fn contains_code(&self, code: u32) -> bool {
        self.0.values().any(|&c| c == code)
    }

    /// Distinct event codes in ascending order
    #[must_use]
    pub fn codes(&self) -> Vec<u32> {
        let mut codes: Vec<u32> = self.0.values().copied().collect();
        codes.sort_unstable();
        codes.dedup();
        codes
    }

    /// Class name for an event code
    #[must_use]
    pub fn name_of(&self, code: u32) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, c)| **c == code)
            .map(|(name, _)| name.as_str())
    }
}

impl<S: Into<String>> FromIterator<(S, u32)> for ClassCodeMap {
    fn from_iter<I: IntoIterator<Item = (S, u32)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(name, code)| (name.into(), code)).collect())
    }
}

// ============================================================================
// Epoch Window
// ============================================================================

/// Trial window relative to an event onset, in seconds.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochWindow {
    /// Window start relative to the event (s)
    pub tmin: f64,
    /// Window end relative to the event (s), inclusive
    pub tmax: f64,
}

impl EpochWindow {
    /// Create a new window
    #[must_use]
    pub const fn new(tmin: f64, tmax: f64) -> Self {
        Self { tmin, tmax }
    }

    /// Whether the window is well formed (`tmin <= tmax`, both finite)
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.tmin.is_finite() && self.tmax.is_finite() && self.tmin <= self.tmax
    }

    /// First and last sample offsets (inclusive) relative to the event
    /// sample at the given sample rate.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample_offsets(&self, sfreq: f64) -> (i64, i64) {
        (
            (self.tmin * sfreq).round() as i64,
            (self.tmax * sfreq).round() as i64,
        )
    }

    /// Number of samples in one trial window at the given sample rate.
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn n_times(&self, sfreq: f64) -> usize {
        let (start, end) = self.sample_offsets(sfreq);
        (end - start + 1).max(0) as usize
    }
}

impl Default for EpochWindow {
    fn default() -> Self {
        Self::new(1.0, 4.1)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_inference() {
        assert_eq!(ChannelKind::from_label("Fc5."), ChannelKind::Eeg);
        assert_eq!(ChannelKind::from_label("EMG chin"), ChannelKind::Emg);
        assert_eq!(ChannelKind::from_label("ekg"), ChannelKind::Ecg);
        assert_eq!(ChannelKind::from_label("STI 014"), ChannelKind::Stim);
        assert_eq!(ChannelKind::from_label(" trigger "), ChannelKind::Stim);
    }

    #[test]
    fn test_class_code_map_codes_sorted() {
        let map: ClassCodeMap = [("b", 3), ("a", 2), ("c", 2)].into_iter().collect();
        assert_eq!(map.codes(), vec![2, 3]);
        assert!(map.contains_code(3));
        assert!(!map.contains_code(1));
        assert_eq!(map.name_of(3), Some("b"));
    }

    #[test]
    fn test_motor_imagery_map() {
        let map = ClassCodeMap::motor_imagery();
        assert_eq!(map.len(), 2);
        assert_eq!(map.codes(), vec![2, 3]);
        assert_eq!(map.name_of(2), Some("hands_or_left"));
    }

    #[test]
    fn test_class_code_map_serde_transparent() {
        let map = ClassCodeMap::motor_imagery();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"feet_or_right":3,"hands_or_left":2}"#);
        let back: ClassCodeMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_epoch_window_samples() {
        // 1.0 s .. 4.1 s at 160 Hz -> samples 160..=656
        let window = EpochWindow::default();
        assert_eq!(window.sample_offsets(160.0), (160, 656));
        assert_eq!(window.n_times(160.0), 497);
    }

    #[test]
    fn test_epoch_window_validity() {
        assert!(EpochWindow::new(-0.5, 0.5).is_valid());
        assert!(!EpochWindow::new(2.0, 1.0).is_valid());
        assert!(!EpochWindow::new(f64::NAN, 1.0).is_valid());
    }
}
