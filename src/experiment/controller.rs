//! Acquisition file loading and per-channel distribution
//!
//! The controller turns the text of an acquisition file, or the rows streamed
//! by a running recorder, into timestamped integer series, one per input
//! module. Timestamps are not stored in the file: row *t* is placed at
//! `start + t * response_timeout`, where `start` keeps advancing across
//! calls so live rows continue where the previous batch ended.

use super::channel::{ChannelBuffer, ChannelSink};
use super::header::{ExperimentHeader, AXES_KEY, TITLE_KEY};
use super::recorder::RecorderEvent;
use super::Experiment;
use crate::config::{keys, SharedPreferences};
use crate::error::{DaqError, Result, ResultExt};
use crate::protocol::MAX_MODULES;
use crate::types::SampleRow;
use crossbeam_channel::Receiver;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Chart start used when `chart.time.start` is unset: 2020-02-18T00:00:00Z
pub const DEFAULT_TIME_START: i64 = 1_581_984_000_000;

/// Acquisition file extension
pub const FILE_EXTENSION: &str = "fim";

/// Shape of the data being distributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelLayout {
    /// Number of channels; rows carry one field per channel
    pub module_count: usize,
    /// Milliseconds between two consecutive rows
    pub response_timeout: i64,
}

impl ChannelLayout {
    /// Layout for `module_count` channels, at most one per bus address
    pub fn new(module_count: usize, response_timeout: i64) -> Self {
        Self {
            module_count: module_count.min(usize::from(MAX_MODULES)),
            response_timeout,
        }
    }

    pub fn from_header(header: &ExperimentHeader) -> Self {
        Self::new(header.module_count.max(0) as usize, header.response_timeout)
    }
}

/// A field that could not be decoded; its value was replaced with zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// Row index within the batch
    pub row: usize,
    /// Channel index
    pub column: usize,
    /// Offending text; empty when the field was missing
    pub field: String,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.field.is_empty() {
            write!(f, "row {}, channel {}: missing value", self.row, self.column)
        } else {
            write!(f, "row {}, channel {}: cannot parse {:?}", self.row, self.column, self.field)
        }
    }
}

/// Outcome of distributing one batch of rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    /// Rows distributed
    pub rows: usize,
    pub errors: Vec<DecodeError>,
}

/// What a successful load found
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSummary {
    pub header: Option<ExperimentHeader>,
    pub axes: Option<String>,
    pub decode: DecodeReport,
}

type ChannelFactory<C> = Box<dyn Fn(usize) -> C + Send>;

/// Distributes acquisition data to per-module channels
pub struct ExperimentController<C: ChannelSink = ChannelBuffer> {
    prefs: SharedPreferences,
    layout: ChannelLayout,
    channels: Vec<C>,
    factory: ChannelFactory<C>,
    time_start: i64,
}

impl<C: ChannelSink> std::fmt::Debug for ExperimentController<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentController")
            .field("layout", &self.layout)
            .field("channels", &self.channels.len())
            .field("time_start", &self.time_start)
            .finish()
    }
}

impl<C: ChannelSink + Default> ExperimentController<C> {
    /// Controller whose channels are created with `C::default()`
    pub fn new(prefs: SharedPreferences) -> Self {
        Self::with_factory(prefs, |_| C::default())
    }
}

impl<C: ChannelSink> ExperimentController<C> {
    /// Controller creating channel `i` with `factory(i)`
    pub fn with_factory(prefs: SharedPreferences, factory: impl Fn(usize) -> C + Send + 'static) -> Self {
        let time_start = prefs
            .read()
            .ok()
            .and_then(|p| p.get_int(keys::CHART_TIME_START))
            .unwrap_or(DEFAULT_TIME_START);
        Self {
            prefs,
            layout: ChannelLayout::default(),
            channels: Vec::new(),
            factory: Box::new(factory),
            time_start,
        }
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    pub fn channels(&self) -> &[C] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [C] {
        &mut self.channels
    }

    /// Timestamp the next row will get
    pub fn time_start(&self) -> i64 {
        self.time_start
    }

    pub fn set_time_start(&mut self, time_start: i64) {
        self.time_start = time_start;
    }

    /// Replace all channels with fresh ones for `layout`
    pub fn reset_channels(&mut self, layout: ChannelLayout) {
        self.layout = layout;
        self.channels = (0..layout.module_count).map(|i| (self.factory)(i)).collect();
    }

    /// Load the file of a saved experiment
    ///
    /// Untitled experiments have nothing to load and return `None`.
    pub fn open(&mut self, experiment: &Experiment) -> Result<Option<LoadSummary>> {
        if experiment.is_untitled() {
            return Ok(None);
        }
        let file = File::open(experiment.file())
            .with_context(|| format!("Failed to open {:?}", experiment.file()))?;
        self.load(BufReader::new(file)).map(Some)
    }

    /// Parse an acquisition file and distribute its rows
    ///
    /// Nothing is committed (preferences, channels, start time) unless the
    /// whole file is structurally valid.
    pub fn load(&mut self, reader: impl BufRead) -> Result<LoadSummary> {
        let lines = reader.lines().collect::<std::io::Result<Vec<String>>>()?;
        if lines.is_empty() {
            return Err(DaqError::EmptyFile);
        }

        let mut header: Option<ExperimentHeader> = None;
        let mut axes = None;
        let mut data_enabled = false;
        let mut rows = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => match key.trim() {
                    TITLE_KEY => match ExperimentHeader::parse(value.trim()) {
                        Ok(parsed) => {
                            data_enabled = parsed.enables_data();
                            header = Some(parsed);
                        }
                        Err(e) => tracing::warn!("Ignoring header at line {}: {}", index + 1, e),
                    },
                    AXES_KEY => axes = Some(value.trim().to_string()),
                    other => tracing::debug!("Ignoring key {:?} at line {}", other, index + 1),
                },
                None => {
                    if !data_enabled {
                        return Err(DaqError::InvalidFile {
                            line: index + 1,
                            reason: "data before a header with at least one module".to_string(),
                        });
                    }
                    rows.push(line.clone());
                }
            }
        }

        let layout = {
            let mut prefs = self
                .prefs
                .write()
                .map_err(|_| DaqError::Config("preferences lock poisoned".to_string()))?;
            if let Some(header) = &header {
                header.apply_to(&mut prefs);
            }
            if let Some(axes) = &axes {
                prefs.set(keys::RUNTIME_MAP_OF_AXES, axes);
            }
            match &header {
                Some(header) => ChannelLayout::from_header(header),
                None => ChannelLayout::new(
                    prefs.get_int_or(keys::MODULE_COUNT, 0).max(0) as usize,
                    prefs.get_int_or(keys::RESPONSE_TIMEOUT, 200),
                ),
            }
        };

        self.reset_channels(layout);
        let decode = self.add_data_on_tabs(&rows);
        tracing::info!(
            "Loaded {} row(s) into {} channel(s), {} decode error(s)",
            decode.rows,
            layout.module_count,
            decode.errors.len()
        );

        Ok(LoadSummary {
            header,
            axes,
            decode,
        })
    }

    /// Scale and distribute rows to the channels
    ///
    /// Each row advances the running start time by one response timeout.
    /// Fields that are missing or not numbers become zero and are reported.
    pub fn add_data_on_tabs<S: AsRef<str>>(&mut self, rows: &[S]) -> DecodeReport {
        let count = self.layout.module_count.min(self.channels.len());
        if count == 0 || rows.is_empty() {
            return DecodeReport::default();
        }

        let coefficients: Vec<f64> = self.channels[..count]
            .iter()
            .map(|c| f64::from(c.coefficient()))
            .collect();
        let mut timestamps = Vec::with_capacity(rows.len());
        let mut values = vec![Vec::with_capacity(rows.len()); count];
        let mut report = DecodeReport {
            rows: rows.len(),
            errors: Vec::new(),
        };

        for (t, row) in rows.iter().enumerate() {
            let sample = decode_row(row.as_ref(), &coefficients, self.time_start, |column, field| {
                let error = DecodeError {
                    row: t,
                    column,
                    field: field.to_string(),
                };
                tracing::warn!("Decoding error: {}", error);
                report.errors.push(error);
            });
            self.time_start += self.layout.response_timeout;

            timestamps.push(sample.timestamp);
            for (series, value) in values.iter_mut().zip(sample.values) {
                series.push(value);
            }
        }

        for (channel, series) in self.channels.iter_mut().zip(values) {
            channel.set_data(&timestamps, &series);
        }
        report
    }

    /// Feed rows published by a running recorder to the channels
    pub fn drain_live(&mut self, events: &Receiver<RecorderEvent>) -> DecodeReport {
        let mut batch = Vec::new();
        for event in events.try_iter() {
            match event {
                RecorderEvent::Row(line) => batch.push(line),
                RecorderEvent::Error(e) => tracing::warn!("Recorder: {}", e),
                RecorderEvent::Stopped { rows } => {
                    tracing::info!("Recorder stopped after {} row(s)", rows)
                }
            }
        }
        self.add_data_on_tabs(&batch)
    }

    /// Discard an experiment that was never saved
    pub fn exit(&self, experiment: &Experiment) -> Result<()> {
        if experiment.is_untitled() && experiment.folder().exists() {
            tracing::info!("Removing unsaved experiment {:?}", experiment.folder());
            std::fs::remove_dir_all(experiment.folder())
                .with_context(|| format!("Failed to remove {:?}", experiment.folder()))?;
        }
        Ok(())
    }

    /// Save the experiment as `name` inside `parent_dir`
    pub fn save_as(&self, experiment: &mut Experiment, parent_dir: &Path, name: &str) -> Result<()> {
        let target = resolve_save_target(parent_dir, name)?;
        experiment.save_as(&target)
    }
}

/// Decode one data line into scaled integers, one per coefficient
///
/// Each field is parsed as a float, multiplied by its coefficient and
/// truncated toward zero. Missing or unparsable fields become zero and are
/// passed to `on_error` with their column. Extra fields are ignored.
pub fn decode_row(
    line: &str,
    coefficients: &[f64],
    timestamp: i64,
    mut on_error: impl FnMut(usize, &str),
) -> SampleRow {
    let mut fields = line.split(',');
    let values = coefficients
        .iter()
        .enumerate()
        .map(|(column, coefficient)| {
            let field = fields.next().map(str::trim).unwrap_or_default();
            match field.parse::<f64>() {
                Ok(parsed) => (parsed * coefficient) as i32 as i64,
                Err(_) => {
                    on_error(column, field);
                    0
                }
            }
        })
        .collect();
    if fields.next().is_some() {
        tracing::debug!("Ignoring extra fields in {:?}", line);
    }
    SampleRow { timestamp, values }
}

/// Folder an experiment saved as `name` in `parent_dir` ends up in
///
/// Picking the `.fim` file of an existing experiment folder means "this
/// folder", not a new folder named after the file.
pub fn resolve_save_target(parent_dir: &Path, name: &str) -> Result<PathBuf> {
    let name = sanitize_name(name)?;
    if let Some(stem) = name.strip_suffix(&format!(".{}", FILE_EXTENSION)) {
        if parent_dir.file_name().and_then(|n| n.to_str()) == Some(stem) {
            return Ok(parent_dir.to_path_buf());
        }
    }
    Ok(parent_dir.join(name))
}

fn sanitize_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(DaqError::Config(format!("invalid experiment name {:?}", name)));
    }
    Ok(name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect())
}
