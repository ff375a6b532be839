//! Annotation to event conversion

use std::collections::BTreeMap;

use trialwise_core::types::Event;

use crate::error::ProcessingResult;
use crate::recording::RawRecording;

/// Turns a recording's markers into discrete events.
pub trait EventExtractor {
    /// Extract events sorted by sample.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::ProcessingError`] if the markers cannot be
    /// interpreted.
    fn extract_events(&self, raw: &RawRecording) -> ProcessingResult<Vec<Event>>;
}

/// Events from text annotations.
///
/// Every distinct description, except those starting with `BAD` or `EDGE`,
/// gets a code starting at 1 in sorted description order.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnnotationEvents;

impl AnnotationEvents {
    /// Create the extractor
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Description to event code map for `raw`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn event_id(&self, raw: &RawRecording) -> BTreeMap<String, u32> {
        let mut descriptions: Vec<&str> = raw
            .annotations
            .iter()
            .filter(|a| !a.is_bad() && !a.is_edge())
            .map(|a| a.description.as_str())
            .collect();
        descriptions.sort_unstable();
        descriptions.dedup();

        descriptions
            .into_iter()
            .enumerate()
            .map(|(i, d)| (d.to_string(), i as u32 + 1))
            .collect()
    }
}

impl EventExtractor for AnnotationEvents {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn extract_events(&self, raw: &RawRecording) -> ProcessingResult<Vec<Event>> {
        let event_id = self.event_id(raw);

        let mut events: Vec<Event> = raw
            .annotations
            .iter()
            .filter_map(|a| {
                let code = *event_id.get(&a.description)?;
                let sample = (a.onset * raw.sfreq).round();
                (sample >= 0.0).then(|| Event::new(sample as usize, code))
            })
            .collect();
        events.sort_by_key(|e| e.sample);

        tracing::debug!(
            "Extracted {} events from {} annotations ({:?})",
            events.len(),
            raw.annotations.len(),
            event_id
        );

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Annotation, BAD_BOUNDARY, EDGE_BOUNDARY};
    use ndarray::Array2;
    use trialwise_core::types::ChannelInfo;

    fn raw(annotations: Vec<Annotation>) -> RawRecording {
        RawRecording::new(vec![ChannelInfo::eeg("Cz")], 160.0, Array2::zeros((1, 4000)))
            .unwrap()
            .with_annotations(annotations)
    }

    #[test]
    fn test_event_id_sorted_codes() {
        let raw = raw(vec![
            Annotation::new(4.2, 4.1, "T2"),
            Annotation::new(0.0, 4.2, "T0"),
            Annotation::new(8.3, 4.1, "T1"),
            Annotation::new(9.0, 0.0, BAD_BOUNDARY),
            Annotation::new(9.0, 0.0, EDGE_BOUNDARY),
        ]);
        let ids = AnnotationEvents::new().event_id(&raw);
        let expected: BTreeMap<String, u32> =
            [("T0".to_string(), 1), ("T1".to_string(), 2), ("T2".to_string(), 3)].into();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_extract_events_sorted_by_sample() {
        let raw = raw(vec![
            Annotation::new(4.2, 4.1, "T2"),
            Annotation::new(0.0, 4.2, "T0"),
            Annotation::new(8.3, 4.1, "T1"),
            Annotation::new(12.4, 4.1, "T0"),
        ]);
        let events = AnnotationEvents::new().extract_events(&raw).unwrap();
        assert_eq!(
            events,
            vec![
                Event::new(0, 1),
                Event::new(672, 3),
                Event::new(1328, 2),
                Event::new(1984, 1),
            ]
        );
    }

    #[test]
    fn test_extract_events_skips_bad_markers() {
        let raw = raw(vec![Annotation::new(1.0, 0.0, "bad_segment")]);
        assert!(AnnotationEvents::new().extract_events(&raw).unwrap().is_empty());
    }
}
