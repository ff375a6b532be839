//! Channel selection by signal kind

use serde::{Deserialize, Serialize};
use trialwise_core::types::ChannelKind;

use crate::error::{ProcessingError, ProcessingResult};
use crate::recording::RawRecording;

/// Which channels to keep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelPicks {
    /// Signal kinds to keep
    pub kinds: Vec<ChannelKind>,
    /// Skip channels listed in the recording's bads
    pub exclude_bads: bool,
}

impl Default for ChannelPicks {
    fn default() -> Self {
        Self { kinds: vec![ChannelKind::Eeg], exclude_bads: true }
    }
}

impl ChannelPicks {
    /// Whether a channel of `kind` would be kept (ignoring bads)
    #[must_use]
    pub fn accepts(&self, kind: ChannelKind) -> bool {
        self.kinds.contains(&kind)
    }

    fn describe(&self) -> String {
        let kinds: Vec<&str> = self.kinds.iter().map(|k| k.name()).collect();
        format!("kinds [{}], exclude bads: {}", kinds.join(", "), self.exclude_bads)
    }
}

/// Chooses which recording channels feed the trials.
pub trait ChannelSelector {
    /// Indices of the selected channels in recording order.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::NoChannels`] if nothing is selected.
    fn select_channels(&self, raw: &RawRecording, picks: &ChannelPicks) -> ProcessingResult<Vec<usize>>;
}

/// Picks channels by [`ChannelKind`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TypePicker;

impl ChannelSelector for TypePicker {
    fn select_channels(&self, raw: &RawRecording, picks: &ChannelPicks) -> ProcessingResult<Vec<usize>> {
        let selected: Vec<usize> = raw
            .channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| picks.accepts(ch.kind))
            .filter(|(_, ch)| !(picks.exclude_bads && raw.is_bad_channel(&ch.name)))
            .map(|(i, _)| i)
            .collect();

        if selected.is_empty() {
            return Err(ProcessingError::NoChannels { criteria: picks.describe() });
        }

        tracing::debug!("Selected {} of {} channels", selected.len(), raw.n_channels());
        Ok(selected)
    }
}
