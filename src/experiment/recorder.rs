//! Recording thread of a running experiment
//!
//! Once per sampling interval the recorder writes the next reference sample
//! to the output module, reads every input module and appends one data line
//! to the acquisition file. Lines are flushed as they are written so a crash
//! loses at most the row in progress.
//!
//! The thread is stopped cooperatively: the stop channel's `recv_timeout`
//! is also the wait between rows, so [`Recorder::stop`] takes effect
//! immediately instead of after the next interval.

use crate::bus::Bus;
use crate::error::{DaqError, Result, ResultExt};
use crate::protocol;
use crate::types::DeviceTable;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Capacity of the live row stream; rows beyond it only go to the file
const EVENT_CAPACITY: usize = 1024;

/// Produces one data row per call
///
/// Every row must carry one field per module declared in the experiment
/// header; the recorder stops on the first row of another width.
#[cfg_attr(test, mockall::automock)]
pub trait SampleSource: Send {
    /// Drive `reference` (if any) and read every input, one field per module
    fn read_row(&mut self, reference: Option<f32>) -> Result<Vec<String>>;
}

/// Sample source backed by real (or simulated) modules on a bus
#[derive(Debug, Clone)]
pub struct BusSampleSource {
    bus: Bus,
    inputs: Vec<u8>,
    output: Option<u8>,
    timeout: Duration,
}

impl BusSampleSource {
    pub fn new(bus: Bus, inputs: Vec<u8>, output: Option<u8>, timeout: Duration) -> Self {
        Self {
            bus,
            inputs,
            output,
            timeout,
        }
    }

    /// Read every device of `devices` except `output`, which is driven
    pub fn from_devices(bus: Bus, devices: &DeviceTable, output: Option<u8>, timeout: Duration) -> Self {
        let inputs = devices
            .iter()
            .filter_map(|d| d.address_value())
            .filter(|a| Some(*a) != output)
            .collect();
        Self::new(bus, inputs, output, timeout)
    }

    pub fn inputs(&self) -> &[u8] {
        &self.inputs
    }

    fn read_input(&self, address: u8) -> Result<String> {
        let codec = self.bus.codec();
        let response = self.bus.request(&codec.read_frame(address), self.timeout)?;
        let body = codec
            .strip_checksum(&response)
            .ok_or_else(|| DaqError::Transport(format!("bad checksum in {:?}", response)))?;
        protocol::parse_analog_reading(body)
            .map(str::to_string)
            .ok_or_else(|| {
                DaqError::Transport(format!(
                    "unexpected reply from module {}: {:?}",
                    protocol::format_address(address),
                    body
                ))
            })
    }
}

impl SampleSource for BusSampleSource {
    fn read_row(&mut self, reference: Option<f32>) -> Result<Vec<String>> {
        if let (Some(address), Some(value)) = (self.output, reference) {
            let frame = self.bus.codec().analog_out_frame(address, value);
            if let Err(e) = self.bus.request(&frame, self.timeout) {
                if !e.is_recoverable() {
                    return Err(e);
                }
                tracing::warn!("Output module {:02X} did not confirm {}: {}", address, value, e);
            }
        }

        let mut row = Vec::with_capacity(self.inputs.len());
        for &address in &self.inputs {
            match self.read_input(address) {
                Ok(value) => row.push(value),
                Err(DaqError::PortClosed) => return Err(DaqError::PortClosed),
                Err(e) => {
                    // Left empty; decoded as zero on reload
                    tracing::warn!("No reading from module {:02X}: {}", address, e);
                    row.push(String::new());
                }
            }
        }
        Ok(row)
    }
}

/// Live notifications from the recording thread
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// A data line that was just appended to the file
    Row(String),
    /// A row could not be produced; recording continues
    Error(String),
    /// The thread exited after writing `rows` lines
    Stopped { rows: u64 },
}

/// Handle onto a running recording thread
///
/// Dropping the handle stops and joins the thread.
#[derive(Debug)]
pub struct Recorder {
    file: PathBuf,
    stop: Sender<()>,
    events: Receiver<RecorderEvent>,
    join: Option<JoinHandle<Result<u64>>>,
}

impl Recorder {
    /// Start recording into `file`, cycling through `signal` as reference
    ///
    /// With `width`, a row with a different number of fields ends the
    /// recording before it reaches the file.
    pub fn spawn(
        source: Box<dyn SampleSource>,
        file: &Path,
        signal: Vec<f32>,
        interval: Duration,
        width: Option<usize>,
    ) -> Result<Self> {
        let handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .with_context(|| format!("Failed to open {:?} for recording", file))?;

        let (stop_tx, stop_rx) = bounded(1);
        let (event_tx, event_rx) = bounded(EVENT_CAPACITY);
        let writer = BufWriter::new(handle);

        let join = std::thread::Builder::new()
            .name("i7000-recorder".to_string())
            .spawn(move || record(source, writer, signal, interval, width, stop_rx, event_tx))?;

        tracing::info!("Recording to {:?} every {:?}", file, interval);
        Ok(Self {
            file: file.to_path_buf(),
            stop: stop_tx,
            events: event_rx,
            join: Some(join),
        })
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Live event stream
    pub fn events(&self) -> &Receiver<RecorderEvent> {
        &self.events
    }

    /// Whether the thread has exited on its own (e.g. port closed)
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |j| j.is_finished())
    }

    /// Stop the thread and wait for it; returns the number of rows written
    pub fn stop(mut self) -> Result<u64> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<u64> {
        let _ = self.stop.try_send(());
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| DaqError::Transport("recorder thread panicked".to_string()))?,
            None => Ok(0),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("Recorder ended with error: {}", e);
        }
    }
}

fn record(
    mut source: Box<dyn SampleSource>,
    mut writer: impl Write,
    signal: Vec<f32>,
    interval: Duration,
    width: Option<usize>,
    stop: Receiver<()>,
    events: Sender<RecorderEvent>,
) -> Result<u64> {
    let mut rows = 0u64;
    let mut tick = 0usize;
    let mut deadline = Instant::now();

    let outcome = loop {
        let reference = (!signal.is_empty()).then(|| signal[tick % signal.len()]);
        tick = tick.wrapping_add(1);

        match source.read_row(reference) {
            Ok(fields) if width.is_some_and(|w| w != fields.len()) => {
                let e = DaqError::Config(format!(
                    "sample source produced {} field(s), header declares {}",
                    fields.len(),
                    width.unwrap_or_default()
                ));
                tracing::error!("Recording aborted: {}", e);
                publish(&events, RecorderEvent::Error(e.to_string()));
                break Err(e);
            }
            Ok(fields) => {
                let line = fields.join(",");
                if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
                    let _ = events.try_send(RecorderEvent::Error(e.to_string()));
                    break Err(DaqError::Io(e));
                }
                rows += 1;
                publish(&events, RecorderEvent::Row(line));
            }
            Err(e) if e.is_recoverable() && !matches!(e, DaqError::PortClosed) => {
                tracing::warn!("Skipping row: {}", e);
                publish(&events, RecorderEvent::Error(e.to_string()));
            }
            Err(e) => {
                tracing::error!("Recording aborted: {}", e);
                publish(&events, RecorderEvent::Error(e.to_string()));
                break Err(e);
            }
        }

        deadline += interval;
        let wait = deadline.saturating_duration_since(Instant::now());
        match stop.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break Ok(rows),
            Err(RecvTimeoutError::Timeout) => {}
        }
    };

    tracing::info!("Recorder stopped after {} row(s)", rows);
    publish(&events, RecorderEvent::Stopped { rows });
    outcome
}

fn publish(events: &Sender<RecorderEvent>, event: RecorderEvent) {
    if let Err(TrySendError::Full(event)) = events.try_send(event) {
        tracing::debug!("Live stream full, dropped {:?}", event);
    }
}
