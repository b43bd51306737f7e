//! Experiments: acquisition folders, their lifecycle and recording
//!
//! An experiment named `X` lives in a folder `X` holding the acquisition
//! file `X/X.fim`. A fresh experiment is *untitled*: its folder sits in a
//! scratch location and is deleted on exit unless it was recorded into or
//! saved under a new name.
//!
//! # Components
//!
//! - [`Experiment`] - Folder, file and running state; owns the recorder
//! - [`ExperimentController`] - Parses acquisition files and feeds channels
//! - [`ExperimentHeader`] - The `title=` line at the top of every file
//! - [`Recorder`] - Recording thread driven by a [`SampleSource`]
//! - [`ChannelSink`] - Consumer of one module's decoded series
//!
//! # Running state
//!
//! `runtime.experiment.running` and `last.experiment.path` are kept in the
//! shared preferences so an abnormal exit can be detected on the next start.
//! Dropping a running [`Experiment`] stops its recorder and clears the flag.

pub mod channel;
pub mod controller;
pub mod header;
pub mod recorder;

pub use channel::{ChannelBuffer, ChannelSink, DEFAULT_COEFFICIENT};
pub use controller::{
    decode_row, resolve_save_target, ChannelLayout, DecodeError, DecodeReport, ExperimentController,
    LoadSummary, DEFAULT_TIME_START, FILE_EXTENSION,
};
pub use header::{ExperimentHeader, DESCRIPTION};
pub use recorder::{BusSampleSource, Recorder, RecorderEvent, SampleSource};

use crate::config::{keys, AcquisitionSettings, SharedPreferences};
use crate::error::{DaqError, Result, ResultExt};
use crossbeam_channel::Receiver;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Check that `path` designates an experiment's acquisition file
///
/// Returns `path` itself when it is `<folder>/<folder>.fim`, or that file
/// when it exists next to `path`.
pub fn check_experiment_file(path: &Path) -> Option<PathBuf> {
    let parent = path.parent()?;
    let folder_name = parent.file_name()?.to_str()?;
    let fim_name = format!("{}.{}", folder_name, FILE_EXTENSION);

    if path.file_name().and_then(|n| n.to_str()) == Some(fim_name.as_str()) {
        return Some(path.to_path_buf());
    }
    let alternative = parent.join(&fim_name);
    alternative.exists().then_some(alternative)
}

/// One acquisition folder and its recording state
#[derive(Debug)]
pub struct Experiment {
    name: String,
    folder: PathBuf,
    file: PathBuf,
    untitled: bool,
    running: bool,
    runtime_running: bool,
    prefs: SharedPreferences,
    /// Where preferences are persisted after lifecycle changes
    preferences_file: Option<PathBuf>,
    recorder: Option<Recorder>,
}

impl Experiment {
    /// Open the experiment owning `path`
    pub fn open(path: &Path, prefs: SharedPreferences) -> Result<Self> {
        let file =
            check_experiment_file(path).ok_or_else(|| DaqError::NotAnExperiment(path.to_path_buf()))?;
        let folder = file
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| DaqError::NotAnExperiment(path.to_path_buf()))?;
        let name = folder_name(&folder)?;
        tracing::info!("Opened experiment {} at {:?}", name, folder);
        Ok(Self::with_paths(name, folder, file, false, prefs))
    }

    /// Create a fresh untitled experiment under `base_dir`
    ///
    /// The folder is named after today's date with a letter suffix that
    /// makes it unique, e.g. `experiment_240301a`.
    pub fn create_untitled(base_dir: &Path, prefs: SharedPreferences) -> Result<Self> {
        std::fs::create_dir_all(base_dir)
            .with_context(|| format!("Failed to create {:?}", base_dir))?;

        let stem = format!("experiment_{}", chrono::Local::now().format("%y%m%d"));
        let name = ('a'..='z')
            .map(|suffix| format!("{}{}", stem, suffix))
            .chain((1..).map(|n| format!("{}_{}", stem, n)))
            .find(|candidate| !base_dir.join(candidate).exists())
            .ok_or_else(|| DaqError::Config("no free experiment name".to_string()))?;

        let folder = base_dir.join(&name);
        let file = folder.join(format!("{}.{}", name, FILE_EXTENSION));
        std::fs::create_dir(&folder).with_context(|| format!("Failed to create {:?}", folder))?;
        std::fs::File::create(&file).with_context(|| format!("Failed to create {:?}", file))?;

        tracing::info!("Created untitled experiment {:?}", folder);
        Ok(Self::with_paths(name, folder, file, true, prefs))
    }

    fn with_paths(
        name: String,
        folder: PathBuf,
        file: PathBuf,
        untitled: bool,
        prefs: SharedPreferences,
    ) -> Self {
        Self {
            name,
            folder,
            file,
            untitled,
            running: false,
            runtime_running: false,
            prefs,
            preferences_file: None,
            recorder: None,
        }
    }

    /// Persist preferences to `path` after every lifecycle change
    pub fn with_preferences_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.preferences_file = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Whether this experiment was never recorded into nor saved
    pub fn is_untitled(&self) -> bool {
        self.untitled
    }

    pub fn set_untitled(&mut self, untitled: bool) {
        self.untitled = untitled;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the recording thread has been started and not yet stopped
    pub fn is_runtime_running(&self) -> bool {
        self.runtime_running
    }

    /// Live rows of the recording in progress
    pub fn live_events(&self) -> Option<Receiver<RecorderEvent>> {
        self.recorder.as_ref().map(|r| r.events().clone())
    }

    /// Reference waveform for the current preferences
    pub fn generate_signal(&self) -> Result<Vec<f32>> {
        Ok(self.settings()?.generate_signal())
    }

    fn settings(&self) -> Result<AcquisitionSettings> {
        let prefs = self
            .prefs
            .read()
            .map_err(|_| DaqError::Config("preferences lock poisoned".to_string()))?;
        AcquisitionSettings::from_preferences(&prefs)
    }

    fn update_preferences(&self, update: impl FnOnce(&mut crate::config::Preferences)) -> Result<()> {
        let mut prefs = self
            .prefs
            .write()
            .map_err(|_| DaqError::Config("preferences lock poisoned".to_string()))?;
        update(&mut *prefs);
        if let Some(path) = &self.preferences_file {
            prefs.save_to(path)?;
        }
        Ok(())
    }

    fn set_running(&mut self, running: bool) -> Result<()> {
        self.running = running;
        self.update_preferences(|p| p.set_bool(keys::EXPERIMENT_RUNNING, running))
    }

    /// Start recording with `source`
    ///
    /// The first run of an untitled experiment writes the header. Any
    /// failure before the recorder is up leaves the experiment stopped.
    pub fn run(&mut self, source: Box<dyn SampleSource>) -> Result<()> {
        if self.running {
            return Err(DaqError::AlreadyRunning);
        }
        let settings = self.settings()?;

        self.set_running(true)?;
        if let Err(e) = self.start_recording(source, &settings) {
            tracing::error!("Failed to start experiment {}: {}", self.name, e);
            self.recorder = None;
            self.runtime_running = false;
            let _ = self.set_running(false);
            return Err(e);
        }
        tracing::info!("Experiment {} running", self.name);
        Ok(())
    }

    fn start_recording(&mut self, source: Box<dyn SampleSource>, settings: &AcquisitionSettings) -> Result<()> {
        if self.untitled {
            self.write_header()?;
        }
        self.untitled = false;

        let name = self.name.clone();
        let path = std::path::absolute(&self.file).unwrap_or_else(|_| self.file.clone());
        self.update_preferences(|p| {
            p.set(keys::LAST_EXPERIMENT_RUNNING, &name);
            p.set(keys::LAST_EXPERIMENT_PATH, path.display());
        })?;

        let recorder = Recorder::spawn(
            source,
            &self.file,
            settings.generate_signal(),
            settings.sample_interval(),
            Some(settings.module_count as usize),
        )?;
        self.recorder = Some(recorder);
        self.runtime_running = true;
        Ok(())
    }

    fn write_header(&self) -> Result<()> {
        let header = {
            let prefs = self
                .prefs
                .read()
                .map_err(|_| DaqError::Config("preferences lock poisoned".to_string()))?;
            ExperimentHeader::from_preferences(&prefs)?
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file)
            .with_context(|| format!("Failed to write header to {:?}", self.file))?;
        writeln!(file, "{}", DESCRIPTION)?;
        writeln!(file, "{}", header.to_line())?;
        file.flush()?;
        Ok(())
    }

    /// Stop recording; returns the number of rows written by this run
    pub fn stop(&mut self) -> Result<u64> {
        if !self.running {
            return Err(DaqError::NotRunning);
        }
        let rows = match self.recorder.take() {
            Some(recorder) => recorder.stop(),
            None => Ok(0),
        };
        self.runtime_running = false;
        self.set_running(false)?;
        self.update_preferences(|p| p.set(keys::LAST_EXPERIMENT_PATH, ""))?;
        tracing::info!("Experiment {} stopped", self.name);
        rows
    }

    /// Move the experiment to `new_folder`
    ///
    /// Saving onto the current folder does nothing. Saving into the
    /// current folder's subtree, or onto a folder that contains it, is
    /// refused before anything is touched. An existing destination is
    /// replaced.
    pub fn save_as(&mut self, new_folder: &Path) -> Result<()> {
        if new_folder == self.folder {
            return Ok(());
        }
        let source = self.folder.canonicalize()?;
        let destination = canonicalize_lenient(new_folder)?;
        if destination == source {
            return Ok(());
        }
        if destination.starts_with(&source) {
            return Err(DaqError::SaveIntoSelf(new_folder.to_path_buf()));
        }
        if source.starts_with(&destination) {
            return Err(DaqError::SaveOverParent(new_folder.to_path_buf()));
        }
        if self.running {
            return Err(DaqError::AlreadyRunning);
        }

        let new_name = folder_name(new_folder)?;
        if new_folder.exists() {
            tracing::info!("Replacing existing {:?}", new_folder);
            if new_folder.is_dir() {
                std::fs::remove_dir_all(new_folder)?;
            } else {
                std::fs::remove_file(new_folder)?;
            }
        }
        if let Some(parent) = new_folder.parent() {
            std::fs::create_dir_all(parent)?;
        }
        move_dir(&self.folder, new_folder)
            .with_context(|| format!("Failed to move {:?} to {:?}", self.folder, new_folder))?;

        let moved_file = new_folder.join(self.file.file_name().unwrap_or_default());
        let new_file = new_folder.join(format!("{}.{}", new_name, FILE_EXTENSION));
        if moved_file != new_file {
            std::fs::rename(&moved_file, &new_file)?;
        }

        tracing::info!("Experiment {} saved as {}", self.name, new_name);
        self.name = new_name;
        self.folder = new_folder.to_path_buf();
        self.file = new_file;
        self.untitled = false;
        Ok(())
    }
}

impl Drop for Experiment {
    fn drop(&mut self) {
        if self.running {
            if let Err(e) = self.stop() {
                tracing::error!("Failed to stop experiment {} on shutdown: {}", self.name, e);
            }
        }
    }
}

fn folder_name(folder: &Path) -> Result<String> {
    folder
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| DaqError::NotAnExperiment(folder.to_path_buf()))
}

/// Canonical form of a path that may not exist yet
///
/// The nearest existing ancestor is canonicalized and the missing tail is
/// appended unchanged.
fn canonicalize_lenient(path: &Path) -> Result<PathBuf> {
    let path = std::path::absolute(path)?;
    let mut existing = path.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = existing.canonicalize().unwrap_or_else(|_| existing.to_path_buf());
    resolved.extend(tail.iter().rev());
    Ok(resolved)
}

fn move_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Rename fails across filesystems
    copy_dir(from, to)?;
    std::fs::remove_dir_all(from)
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
