//! Recording to trial processing
//!
//! This module turns a continuous recording into labelled trials:
//! - [`events`]: Annotation to event conversion
//! - [`channels`]: Channel selection by signal kind
//! - [`epochs`]: Fixed-window trial extraction

pub mod channels;
pub mod epochs;
pub mod events;

pub use channels::{ChannelPicks, ChannelSelector, TypePicker};
pub use epochs::{Epocher, TrialExtractor, Trials};
pub use events::{AnnotationEvents, EventExtractor};
