//! Trialwise Application
//!
//! Command-line entry point for motor-imagery trial decoding on the
//! PhysioNet EEG Motor Movement/Imagery dataset.
//!
//! # Usage
//!
//! ```bash
//! # Train and evaluate with the built-in defaults (subject 22)
//! trialwise run
//!
//! # Different subject, settings from a file, export the training history
//! trialwise run --config trialwise.toml --subject 7 --history-out history.json
//!
//! # Download runs without training
//! trialwise fetch --subject 1 --runs 5,6,9
//!
//! # Summarise EDF files
//! trialwise inspect data/eegbci/S001/S001R05.edf
//!
//! # Print the default configuration
//! trialwise config > trialwise.toml
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use trialwise_core::ClassCodeMap;
use trialwise_native::{Pipeline, PipelineConfig, PipelineReport, RecordingsProvider};

/// Trialwise Application
#[derive(Parser, Debug)]
#[command(name = "trialwise")]
#[command(author, version, about = "Motor-imagery EEG trial decoding", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by commands that read the pipeline configuration
#[derive(Args, Debug)]
struct ConfigArgs {
    /// TOML configuration file (defaults apply to anything it omits)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subject number (1-109)
    #[arg(short, long)]
    subject: Option<u32>,

    /// Local dataset cache directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Download runs even if they are cached
    #[arg(long)]
    force_update: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch, epoch, train and evaluate
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Write the training history as JSON
        #[arg(long)]
        history_out: Option<PathBuf>,

        /// Write the trained parameters as JSON
        #[arg(long)]
        params_out: Option<PathBuf>,

        /// Write the full report as JSON
        #[arg(long)]
        report_out: Option<PathBuf>,
    },

    /// Download runs into the local cache
    Fetch {
        #[command(flatten)]
        config: ConfigArgs,

        /// Run numbers, comma separated (e.g. 5,6,9)
        #[arg(short, long, value_delimiter = ',')]
        runs: Option<Vec<u32>>,
    },

    /// Print channels, sample rate and annotations of EDF files
    Inspect {
        /// EDF files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the default configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Trialwise v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run {
            config,
            epochs,
            history_out,
            params_out,
            report_out,
        } => {
            let mut pipeline_config = load_config(&config)?;
            if let Some(epochs) = epochs {
                pipeline_config.training.epochs = epochs;
            }
            run(&pipeline_config, history_out.as_deref(), params_out.as_deref(), report_out.as_deref())?;
        }
        Commands::Fetch { config, runs } => {
            let mut pipeline_config = load_config(&config)?;
            if let Some(runs) = runs {
                pipeline_config.recording.runs = runs;
            }
            fetch(&pipeline_config)?;
        }
        Commands::Inspect { files } => {
            for file in &files {
                inspect(file)?;
            }
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&PipelineConfig::default())?);
        }
    }

    Ok(())
}

/// Defaults, then the config file, then command-line overrides
fn load_config(args: &ConfigArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    if let Some(subject) = args.subject {
        config.recording.subject = subject;
    }
    if let Some(data_dir) = &args.data_dir {
        config.recording.data_dir.clone_from(data_dir);
    }
    if args.force_update {
        config.recording.force_update = true;
    }

    Ok(config)
}

/// Train, evaluate and write the requested outputs
fn run(
    config: &PipelineConfig,
    history_out: Option<&Path>,
    params_out: Option<&Path>,
    report_out: Option<&Path>,
) -> anyhow::Result<()> {
    let (report, classifier) = Pipeline::new().run_with_classifier(config)?;

    print_report(&report, &config.epoching.classes);

    if let Some(path) = history_out {
        fs::write(path, serde_json::to_string_pretty(&report.history)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote training history to {}", path.display());
    }
    if let Some(path) = params_out {
        classifier.save_params(path)?;
        info!("Wrote parameters to {}", path.display());
    }
    if let Some(path) = report_out {
        fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote report to {}", path.display());
    }

    Ok(())
}

fn print_report(report: &PipelineReport, classes: &ClassCodeMap) {
    let [trials, channels, times, _] = report.trial_shape;
    println!("Trials: {trials} x {channels} channels x {times} samples ({} dropped)", report.dropped_trials);

    // Class indices follow ascending event codes
    for (index, (code, count)) in classes.codes().iter().zip(&report.class_counts).enumerate() {
        let name = classes.name_of(*code).unwrap_or("?");
        println!("  class {index} ({name}, code {code}): {count} trials");
    }

    println!();
    println!("{:>5}  {:>10}  {:>10}  {:>9}  {:>6}", "epoch", "train_loss", "valid_loss", "valid_acc", "dur");
    for epoch in &report.history.epochs {
        let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
        println!(
            "{:>5}  {:>10.4}  {:>10}  {:>9}  {:>6.2}",
            epoch.epoch,
            epoch.train_loss,
            fmt(epoch.valid_loss),
            fmt(epoch.valid_acc),
            epoch.dur
        );
    }

    println!();
    println!("Test trials from index {}:", report.test_start);
    println!("  predicted: {}", report.predictions);
    println!("  actual:    {}", report.test_labels);
    println!("  accuracy:  {:.3}", report.accuracy);
}

fn fetch(config: &PipelineConfig) -> anyhow::Result<()> {
    let provider = config.recording.provider();
    let paths = provider.fetch(config.recording.subject, &config.recording.runs)?;
    for path in paths {
        println!("{}", path.display());
    }
    Ok(())
}

fn inspect(path: &Path) -> anyhow::Result<()> {
    let raw = trialwise_native::recording::edf::read_edf(path)?;

    println!("{}", path.display());
    println!(
        "  {} channels, {} Hz, {} samples ({:.1} s)",
        raw.n_channels(),
        raw.sfreq,
        raw.n_samples(),
        raw.duration()
    );
    let names: Vec<&str> = raw.channel_names().collect();
    println!("  channels: {}", names.join(", "));

    let mut descriptions: BTreeMap<&str, usize> = BTreeMap::new();
    for annotation in &raw.annotations {
        *descriptions.entry(annotation.description.as_str()).or_default() += 1;
    }
    if descriptions.is_empty() {
        warn!("{} has no annotations", path.display());
    }
    for (description, count) in descriptions {
        println!("  annotation {description:?}: {count}");
    }

    Ok(())
}
