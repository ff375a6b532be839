//! PhysioNet EEG Motor Movement/Imagery dataset (EEGBCI)
//!
//! 109 subjects, 14 runs each, 64-channel EEG at 160 Hz. Runs 5/9/13 are
//! imagined and 6/10/14 executed hands-vs-feet tasks; annotations `T0`
//! (rest), `T1` and `T2` mark the cues.
//!
//! Files are mirrored under `<data_dir>/S{subject:03}/S{subject:03}R{run:02}.edf`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{RawRecording, RecordingsProvider};
use crate::error::{RecordingError, RecordingResult};

/// Public PhysioNet mirror of the dataset
pub const DEFAULT_BASE_URL: &str = "https://physionet.org/files/eegmmidb/1.0.0";

/// Number of subjects in the dataset
pub const MAX_SUBJECT: u32 = 109;

/// Number of runs per subject
pub const MAX_RUN: u32 = 14;

/// Hands-vs-feet motor imagery and execution runs
pub const HANDS_FEET_RUNS: [u32; 6] = [5, 6, 9, 10, 13, 14];

/// Relative path of one run file
#[must_use]
pub fn run_path(subject: u32, run: u32) -> PathBuf {
    let dir = format!("S{subject:03}");
    PathBuf::from(&dir).join(format!("{dir}R{run:02}.edf"))
}

/// Local-cache provider for the EEGBCI dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EegbciProvider {
    /// Local cache root
    pub data_dir: PathBuf,
    /// Remote root the run files are fetched from
    pub base_url: String,
    /// Re-download files that are already cached
    pub force_update: bool,
}

impl EegbciProvider {
    /// Create a provider caching into `data_dir`
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            force_update: false,
        }
    }

    /// Override the remote root (builder style)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the re-download flag (builder style)
    #[must_use]
    pub fn with_force_update(mut self, force_update: bool) -> Self {
        self.force_update = force_update;
        self
    }

    /// Local path a run is cached at
    #[must_use]
    pub fn local_path(&self, subject: u32, run: u32) -> PathBuf {
        self.data_dir.join(run_path(subject, run))
    }

    /// Remote URL of a run
    #[must_use]
    pub fn url(&self, subject: u32, run: u32) -> String {
        format!(
            "{}/S{subject:03}/S{subject:03}R{run:02}.edf",
            self.base_url.trim_end_matches('/')
        )
    }

    /// Check subject and run numbers against the dataset's layout.
    ///
    /// # Errors
    ///
    /// Returns [`RecordingError::InvalidSubject`] or
    /// [`RecordingError::InvalidRun`] for numbers outside the dataset.
    pub fn validate(subject: u32, runs: &[u32]) -> RecordingResult<()> {
        if !(1..=MAX_SUBJECT).contains(&subject) {
            return Err(RecordingError::InvalidSubject { subject, max: MAX_SUBJECT });
        }
        if let Some(&run) = runs.iter().find(|r| !(1..=MAX_RUN).contains(*r)) {
            return Err(RecordingError::InvalidRun { run, max: MAX_RUN });
        }
        Ok(())
    }

    fn ensure_run(&self, subject: u32, run: u32) -> RecordingResult<PathBuf> {
        let path = self.local_path(subject, run);
        if path.is_file() && !self.force_update {
            tracing::debug!("Using cached {}", path.display());
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| RecordingError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let url = self.url(subject, run);
        tracing::info!("Downloading {} -> {}", url, path.display());
        download(&url, &path)?;
        Ok(path)
    }
}

impl RecordingsProvider for EegbciProvider {
    fn fetch(&self, subject: u32, runs: &[u32]) -> RecordingResult<Vec<PathBuf>> {
        Self::validate(subject, runs)?;
        runs.iter().map(|&run| self.ensure_run(subject, run)).collect()
    }

    fn read(&self, path: &Path) -> RecordingResult<RawRecording> {
        #[cfg(feature = "edf")]
        {
            super::edf::read_edf(path)
        }
        #[cfg(not(feature = "edf"))]
        {
            let _ = path;
            Err(RecordingError::Unsupported { operation: "reading EDF files", feature: "edf" })
        }
    }
}

/// Stream `url` into `dest`, writing to a `.part` sibling first so an
/// interrupted transfer never leaves a truncated file at `dest`.
#[cfg(feature = "download")]
fn download(url: &str, dest: &Path) -> RecordingResult<()> {
    let response = match ureq::get(url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(code, _)) => {
            return Err(RecordingError::Download {
                url: url.to_string(),
                reason: format!("HTTP {code}"),
            });
        }
        Err(e) => {
            return Err(RecordingError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            });
        }
    };

    let partial = dest.with_extension("edf.part");
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| RecordingError::Io { path, source }
    };

    let mut file = fs::File::create(&partial).map_err(io_err(&partial))?;
    let bytes = std::io::copy(&mut response.into_reader(), &mut file).map_err(io_err(&partial))?;
    file.sync_all().map_err(io_err(&partial))?;
    drop(file);
    fs::rename(&partial, dest).map_err(io_err(dest))?;

    tracing::debug!("Downloaded {} bytes from {}", bytes, url);
    Ok(())
}

#[cfg(not(feature = "download"))]
fn download(_url: &str, _dest: &Path) -> RecordingResult<()> {
    Err(RecordingError::Unsupported { operation: "downloading recordings", feature: "download" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_path_layout() {
        assert_eq!(run_path(22, 5), PathBuf::from("S022/S022R05.edf"));
        assert_eq!(run_path(109, 14), PathBuf::from("S109/S109R14.edf"));
    }

    #[test]
    fn test_url() {
        let provider = EegbciProvider::new("/tmp/eeg").with_base_url("http://mirror.local/eeg/");
        assert_eq!(provider.url(1, 3), "http://mirror.local/eeg/S001/S001R03.edf");
        assert_eq!(
            EegbciProvider::new("/tmp").url(22, 13),
            "https://physionet.org/files/eegmmidb/1.0.0/S022/S022R13.edf"
        );
    }

    #[test]
    fn test_validate() {
        assert!(EegbciProvider::validate(22, &HANDS_FEET_RUNS).is_ok());
        assert!(matches!(
            EegbciProvider::validate(0, &[5]),
            Err(RecordingError::InvalidSubject { subject: 0, .. })
        ));
        assert!(matches!(
            EegbciProvider::validate(110, &[5]),
            Err(RecordingError::InvalidSubject { subject: 110, .. })
        ));
        assert!(matches!(
            EegbciProvider::validate(1, &[5, 15]),
            Err(RecordingError::InvalidRun { run: 15, .. })
        ));
    }

    #[test]
    fn test_fetch_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let provider = EegbciProvider::new(dir.path()).with_base_url("http://127.0.0.1:9");
        for run in [5, 6] {
            let path = provider.local_path(3, run);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"cached").unwrap();
        }

        let paths = provider.fetch(3, &[5, 6]).unwrap();
        assert_eq!(paths, vec![provider.local_path(3, 5), provider.local_path(3, 6)]);
    }

    #[test]
    fn test_fetch_rejects_invalid_run_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let provider = EegbciProvider::new(dir.path());
        assert!(provider.fetch(1, &[0]).is_err());
        assert!(!dir.path().join("S001").exists());
    }
}
