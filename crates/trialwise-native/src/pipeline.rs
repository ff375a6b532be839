//! End-to-end decoding pipeline
//!
//! Fetch runs, read and concatenate them, extract events, pick channels,
//! cut trials, wrap them in a [`TrialDataset`], train a classifier on the
//! leading trials and predict the trailing ones.
//!
//! Every stage is a trait object; [`Pipeline::new`] uses the native
//! implementations and the `with_*` builders swap them out.

use std::path::PathBuf;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use trialwise_core::labels::class_counts;
use trialwise_core::{
    remap_labels, ClassCodeMap, DatasetRole, EpochWindow, PartitionStrategy, SplitSize, TrainTestSplit, TrialDataset, TrialSet,
};

use crate::error::PipelineResult;
use crate::ml::{
    accuracy, argmax_rows, AdamWConfig, Classifier, ClassifierFactory, ClassifierSpec, History, NeuralNetConfig, OptimizerKind,
    ShallowNetConfig,
};
use crate::processing::{
    AnnotationEvents, ChannelPicks, ChannelSelector, Epocher, EventExtractor, TrialExtractor, TypePicker,
};
use crate::recording::eegbci::{DEFAULT_BASE_URL, HANDS_FEET_RUNS};
use crate::recording::{EegbciProvider, RawRecording, RecordingsProvider};

// ============================================================================
// Configuration
// ============================================================================

/// Which recordings to load and where to cache them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Subject number (1..=109)
    pub subject: u32,
    /// Run numbers, concatenated in this order
    pub runs: Vec<u32>,
    /// Local cache directory
    pub data_dir: PathBuf,
    /// Remote dataset root
    pub base_url: String,
    /// Re-download cached runs
    pub force_update: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            subject: 22,
            runs: HANDS_FEET_RUNS.to_vec(),
            data_dir: PathBuf::from("data/eegbci"),
            base_url: DEFAULT_BASE_URL.to_string(),
            force_update: false,
        }
    }
}

impl RecordingConfig {
    /// EEGBCI provider for this configuration
    #[must_use]
    pub fn provider(&self) -> EegbciProvider {
        EegbciProvider::new(&self.data_dir)
            .with_base_url(self.base_url.clone())
            .with_force_update(self.force_update)
    }
}

/// How trials are cut from the continuous recording.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpochingConfig {
    /// Class name to event code
    pub classes: ClassCodeMap,
    /// Trial window relative to each event
    pub window: EpochWindow,
    /// Channel selection
    pub picks: ChannelPicks,
    /// Factor applied to the signal (1e6 converts volts to microvolts)
    pub scale: f64,
}

impl Default for EpochingConfig {
    fn default() -> Self {
        Self {
            classes: ClassCodeMap::motor_imagery(),
            window: EpochWindow::default(),
            picks: ChannelPicks::default(),
            scale: 1e6,
        }
    }
}

/// Training and evaluation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Leading trials used for training; the rest validates each epoch
    pub train_split: SplitSize,
    /// Training epochs
    pub epochs: usize,
    /// Trials per optimizer step
    pub batch_size: usize,
    /// Seed for weight initialisation
    pub seed: u64,
    /// First trial of the evaluation set
    pub test_cutoff: usize,
    /// Optimizer and its settings
    pub optimizer: OptimizerKind,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            train_split: SplitSize::AbsoluteCount(40),
            epochs: 4,
            batch_size: 64,
            seed: 20_200_114,
            test_cutoff: 70,
            optimizer: OptimizerKind::AdamW(AdamWConfig {
                lr: 0.0625 * 0.01,
                weight_decay: 0.0,
                ..AdamWConfig::default()
            }),
        }
    }
}

/// Complete pipeline configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Recording source
    pub recording: RecordingConfig,
    /// Trial extraction
    pub epoching: EpochingConfig,
    /// Training and evaluation
    pub training: TrainingConfig,
    /// Network shape
    pub model: ShallowNetConfig,
}

impl PipelineConfig {
    /// Classifier settings derived from the training and model sections
    #[must_use]
    pub fn net_config(&self) -> NeuralNetConfig {
        NeuralNetConfig {
            module: self.model.clone(),
            optimizer: self.training.optimizer.clone(),
            batch_size: self.training.batch_size,
            seed: self.training.seed,
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// Outcome of one pipeline run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Trial tensor shape `[trials, channels, times, 1]`
    pub trial_shape: [usize; 4],
    /// Windows rejected during epoching
    pub dropped_trials: usize,
    /// Trials per class index
    pub class_counts: Vec<usize>,
    /// Per-epoch training record
    pub history: History,
    /// First trial of the evaluation set
    pub test_start: usize,
    /// Predicted class per evaluation trial
    pub predictions: Array1<i64>,
    /// Class probabilities per evaluation trial
    pub probabilities: Array2<f32>,
    /// True class per evaluation trial
    pub test_labels: Array1<i64>,
    /// Fraction of evaluation trials predicted correctly
    pub accuracy: f64,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Decoding pipeline with pluggable stages.
#[derive(Default)]
pub struct Pipeline {
    provider: Option<Box<dyn RecordingsProvider>>,
    events: Option<Box<dyn EventExtractor>>,
    channels: Option<Box<dyn ChannelSelector>>,
    trials: Option<Box<dyn TrialExtractor>>,
    factory: Option<Box<dyn ClassifierFactory>>,
}

impl Pipeline {
    /// Pipeline using the native stages: EEGBCI recordings, annotation
    /// events, kind-based channel picks, fixed-window epochs and the shallow
    /// network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the recording source
    #[must_use]
    pub fn with_provider(mut self, provider: Box<dyn RecordingsProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Replace the event extractor
    #[must_use]
    pub fn with_event_extractor(mut self, events: Box<dyn EventExtractor>) -> Self {
        self.events = Some(events);
        self
    }

    /// Replace the channel selector
    #[must_use]
    pub fn with_channel_selector(mut self, channels: Box<dyn ChannelSelector>) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Replace the trial extractor
    #[must_use]
    pub fn with_trial_extractor(mut self, trials: Box<dyn TrialExtractor>) -> Self {
        self.trials = Some(trials);
        self
    }

    /// Replace the classifier factory
    #[must_use]
    pub fn with_classifier_factory(mut self, factory: Box<dyn ClassifierFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Fetch, read and concatenate the configured runs.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::PipelineError`] if any run cannot be
    /// fetched, decoded or joined.
    pub fn load_recording(&self, config: &RecordingConfig) -> PipelineResult<RawRecording> {
        let default_provider;
        let provider: &dyn RecordingsProvider = match &self.provider {
            Some(provider) => provider.as_ref(),
            None => {
                default_provider = config.provider();
                &default_provider
            }
        };

        let paths = provider.fetch(config.subject, &config.runs)?;
        let raws = paths
            .iter()
            .map(|path| provider.read(path))
            .collect::<Result<Vec<_>, _>>()?;
        let raw = RawRecording::concatenate(raws)?;

        tracing::info!(
            "Loaded subject {} runs {:?}: {} channels, {:.1} s at {} Hz",
            config.subject,
            config.runs,
            raw.n_channels(),
            raw.duration(),
            raw.sfreq
        );
        Ok(raw)
    }

    /// Turn a recording into a labelled dataset.
    ///
    /// Returns the dataset (role `Full`) and the number of dropped windows.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::PipelineError`] if events, channels or
    /// trials cannot be extracted or a trial code has no class.
    pub fn build_dataset(&self, raw: &RawRecording, config: &EpochingConfig) -> PipelineResult<(TrialDataset, usize)> {
        let events = match &self.events {
            Some(extractor) => extractor.extract_events(raw)?,
            None => AnnotationEvents.extract_events(raw)?,
        };
        let picks = match &self.channels {
            Some(selector) => selector.select_channels(raw, &config.picks)?,
            None => TypePicker.select_channels(raw, &config.picks)?,
        };
        let default_extractor;
        let extractor: &dyn TrialExtractor = match &self.trials {
            Some(extractor) => extractor.as_ref(),
            None => {
                default_extractor = Epocher::default();
                &default_extractor
            }
        };
        let trials = extractor.extract_trials(raw, &events, &config.classes, config.window, &picks, config.scale)?;

        let labels = remap_labels(trials.codes.view(), &config.classes.codes())
            .map_err(crate::error::ProcessingError::from)?;
        let dataset = TrialDataset::new(trials.data.into_dyn(), labels)?;

        tracing::info!("Trial tensor shape {:?}", dataset.shape());
        Ok((dataset, trials.dropped))
    }

    /// Run the pipeline and keep the trained classifier.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::PipelineError`] from the first failing stage.
    pub fn run_with_classifier(
        &self,
        config: &PipelineConfig,
    ) -> PipelineResult<(PipelineReport, Box<dyn Classifier>)> {
        let raw = self.load_recording(&config.recording)?;
        let (full, dropped_trials) = self.build_dataset(&raw, &config.epoching)?;

        let n_classes = config.epoching.classes.codes().len();
        let spec = ClassifierSpec {
            in_chans: full.n_channels(),
            n_classes,
            input_time_length: full.n_times(),
        };
        let split: Box<dyn PartitionStrategy> = Box::new(TrainTestSplit::new(config.training.train_split));
        let default_factory;
        let factory: &dyn ClassifierFactory = match &self.factory {
            Some(factory) => factory.as_ref(),
            None => {
                default_factory = config.net_config();
                &default_factory
            }
        };
        let mut classifier = factory.build(spec, Some(split))?;

        let history = classifier.fit(&full, config.training.epochs)?.clone();

        let test = full.tail(config.training.test_cutoff, DatasetRole::Test)?;
        let probabilities = classifier.predict_proba(&test)?;
        let predictions = argmax_rows(&probabilities);
        let test_labels = test.labels().to_owned();
        let accuracy = accuracy(&predictions, test.labels());

        tracing::info!(
            "Evaluated {} trials from index {}: accuracy {:.3}",
            test.count(),
            config.training.test_cutoff,
            accuracy
        );

        let report = PipelineReport {
            trial_shape: full.shape(),
            dropped_trials,
            class_counts: class_counts(full.labels(), n_classes),
            history,
            test_start: config.training.test_cutoff,
            predictions,
            probabilities,
            test_labels,
            accuracy,
        };
        Ok((report, classifier))
    }

    /// Run the pipeline.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::PipelineError`] from the first failing stage.
    pub fn run(&self, config: &PipelineConfig) -> PipelineResult<PipelineReport> {
        self.run_with_classifier(config).map(|(report, _)| report)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use ndarray::Array2;
    use rand::distributions::{Distribution, Uniform};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use trialwise_core::types::ChannelInfo;

    use crate::error::{PipelineError, ProcessingError, RecordingError, RecordingResult, TrainError, TrainResult};
    use crate::recording::Annotation;

    const SFREQ: f64 = 160.0;
    const RUN_SECONDS: f64 = 30.0;

    /// In-memory runs: 30 s, 4 EEG channels. Cues every 4.2 s cycle
    /// `T0 T1 T0 T2`; after a `T1` cue channel 0 oscillates, after `T2`
    /// channel 3 does.
    struct SyntheticRuns;

    impl RecordingsProvider for SyntheticRuns {
        fn fetch(&self, _subject: u32, runs: &[u32]) -> RecordingResult<Vec<PathBuf>> {
            Ok(runs.iter().map(|r| PathBuf::from(format!("run{r}"))).collect())
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        fn read(&self, path: &Path) -> RecordingResult<RawRecording> {
            let seed = path.to_string_lossy().len() as u64;
            let mut rng = StdRng::seed_from_u64(seed);
            let noise = Uniform::new(-1e-6, 1e-6);
            let n_samples = (RUN_SECONDS * SFREQ) as usize;

            let mut annotations = Vec::new();
            let mut data = Array2::from_shape_simple_fn((4, n_samples), || noise.sample(&mut rng));
            for k in 0..8 {
                let onset = f64::from(k) * 4.2;
                let description = match k % 4 {
                    1 => "T1",
                    3 => "T2",
                    _ => "T0",
                };
                annotations.push(Annotation::new(onset, 4.1, description));

                let channel = match description {
                    "T1" => 0,
                    "T2" => 3,
                    _ => continue,
                };
                let start = (onset * SFREQ).round() as usize;
                let end = ((onset + 4.1) * SFREQ).round() as usize;
                for t in start..end.min(n_samples) {
                    data[[channel, t]] += 20e-6 * (t as f64 * 0.6).sin();
                }
            }

            let channels = ["C3", "Cz", "Pz", "C4"].iter().map(|n| ChannelInfo::eeg(*n)).collect();
            Ok(RawRecording::new(channels, SFREQ, data)?.with_annotations(annotations))
        }
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.recording.runs = vec![5, 6, 9];
        config.epoching.window = EpochWindow::new(0.5, 1.0);
        config.training.train_split = SplitSize::AbsoluteCount(6);
        config.training.test_cutoff = 5;
        config.training.epochs = 3;
        config.training.batch_size = 4;
        config.training.optimizer = OptimizerKind::AdamW(AdamWConfig { lr: 0.01, ..AdamWConfig::default() });
        config.model = ShallowNetConfig { n_filters: 4, pool_length: 20, pool_stride: 10, log_eps: 1e-6 };
        config
    }

    #[test]
    fn test_defaults_match_reference_setup() {
        let config = PipelineConfig::default();
        assert_eq!(config.recording.subject, 22);
        assert_eq!(config.recording.runs, vec![5, 6, 9, 10, 13, 14]);
        assert_eq!(config.epoching.classes.codes(), vec![2, 3]);
        assert_eq!(config.training.train_split, SplitSize::AbsoluteCount(40));
        assert_eq!(config.training.test_cutoff, 70);
        assert_eq!(config.training.seed, 20_200_114);
        assert!((config.training.optimizer.lr() - 0.000_625).abs() < 1e-12);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = PipelineConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PipelineConfig = toml::from_str(
            "[recording]\nsubject = 7\n\n[training]\ntrain_split = 0.5\n\n[training.optimizer]\nkind = \"sgd\"\nlr = 0.1\n",
        )
        .unwrap();
        assert_eq!(config.recording.subject, 7);
        assert_eq!(config.recording.runs, HANDS_FEET_RUNS.to_vec());
        assert_eq!(config.training.train_split, SplitSize::Proportion(0.5));
        assert_eq!(config.training.epochs, 4);
        assert!(matches!(config.training.optimizer, OptimizerKind::Sgd(_)));
    }

    #[test]
    fn test_build_dataset_from_synthetic_runs() {
        let pipeline = Pipeline::new().with_provider(Box::new(SyntheticRuns));
        let config = config();
        let raw = pipeline.load_recording(&config.recording).unwrap();
        assert_eq!(raw.n_samples(), 3 * 4800);

        let (dataset, dropped) = pipeline.build_dataset(&raw, &config.epoching).unwrap();
        // 4 cues per run; the last one of each run runs into a boundary or the end
        assert_eq!(dataset.shape(), [9, 4, 81, 1]);
        assert_eq!(dropped, 3);
        assert_eq!(dataset.labels().to_vec(), vec![0, 1, 0, 0, 1, 0, 0, 1, 0]);
    }

    #[test]
    fn test_run_end_to_end() {
        let pipeline = Pipeline::new().with_provider(Box::new(SyntheticRuns));
        let report = pipeline.run(&config()).unwrap();

        assert_eq!(report.trial_shape, [9, 4, 81, 1]);
        assert_eq!(report.class_counts, vec![6, 3]);
        assert_eq!(report.history.len(), 3);
        assert!(report.history.last().unwrap().valid_loss.is_some());
        assert_eq!(report.test_start, 5);
        assert_eq!(report.predictions.len(), 4);
        assert_eq!(report.probabilities.shape(), &[4, 2]);
        assert_eq!(report.test_labels.to_vec(), vec![0, 0, 1, 0]);
        assert!((0.0..=1.0).contains(&report.accuracy));
    }

    /// Scores every trial by its first sample; `predict` is unavailable.
    struct FirstSampleScorer {
        history: History,
    }

    impl Classifier for FirstSampleScorer {
        fn fit(&mut self, _dataset: &TrialDataset, _epochs: usize) -> TrainResult<&History> {
            Ok(&self.history)
        }

        fn partial_fit(&mut self, _dataset: &TrialDataset, _epochs: usize) -> TrainResult<&History> {
            Ok(&self.history)
        }

        fn predict_proba(&self, trials: &dyn TrialSet) -> TrainResult<Array2<f32>> {
            let mut proba = Array2::zeros((trials.count(), 2));
            for (index, mut row) in proba.outer_iter_mut().enumerate() {
                let first = trials.at(index)?.features[[0, 0, 0]];
                let p = if first > 0.0 { 0.8 } else { 0.3 };
                row[0] = 1.0 - p;
                row[1] = p;
            }
            Ok(proba)
        }

        fn predict(&self, _trials: &dyn TrialSet) -> TrainResult<Array1<i64>> {
            Err(TrainError::EmptyDataset)
        }

        fn history(&self) -> &History {
            &self.history
        }

        fn save_params(&self, _path: &Path) -> TrainResult<()> {
            Ok(())
        }

        fn load_params(&mut self, _path: &Path) -> TrainResult<()> {
            Ok(())
        }
    }

    struct FirstSampleFactory;

    impl ClassifierFactory for FirstSampleFactory {
        fn build(
            &self,
            _spec: ClassifierSpec,
            _split: Option<Box<dyn PartitionStrategy>>,
        ) -> TrainResult<Box<dyn Classifier>> {
            Ok(Box::new(FirstSampleScorer { history: History::default() }))
        }
    }

    #[test]
    fn test_predictions_follow_probabilities() {
        let pipeline = Pipeline::new()
            .with_provider(Box::new(SyntheticRuns))
            .with_classifier_factory(Box::new(FirstSampleFactory));
        let report = pipeline.run(&config()).unwrap();

        assert_eq!(report.probabilities.shape(), &[4, 2]);
        assert_eq!(report.predictions, argmax_rows(&report.probabilities));
    }

    #[test]
    fn test_test_cutoff_past_end() {
        let mut config = config();
        config.training.test_cutoff = 50;
        let pipeline = Pipeline::new().with_provider(Box::new(SyntheticRuns));
        assert!(matches!(pipeline.run(&config), Err(PipelineError::Dataset(_))));
    }

    #[test]
    fn test_invalid_subject_surfaces_recording_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.recording.subject = 0;
        config.recording.data_dir = dir.path().to_path_buf();
        let err = Pipeline::new().run(&config).unwrap_err();
        assert!(matches!(err, PipelineError::Recording(RecordingError::InvalidSubject { .. })));
    }

    #[test]
    fn test_missing_class_events() {
        let mut config = config();
        config.epoching.classes = [("other", 9_u32)].into_iter().collect();
        let pipeline = Pipeline::new().with_provider(Box::new(SyntheticRuns));
        assert!(matches!(
            pipeline.run(&config),
            Err(PipelineError::Processing(ProcessingError::NoTrials { .. }))
        ));
    }
}
