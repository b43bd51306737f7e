//! # i7000-daq: I-7000 Serial Bus Controller
//!
//! Discovers I-7000 family modules on a serial bus, exchanges ASCII commands
//! with them, drives a reference waveform and records timestamped
//! multi-channel readings into `.fim` acquisition files that can be reloaded
//! later.
//!
//! ## Architecture
//!
//! - **Protocol**: Frame encoding, checksums and response decoding
//! - **Bus**: Shared transport, receive buffer, command exchange and device scanner
//! - **Signal**: Reference waveform synthesis at three-decimal precision
//! - **Experiment**: Acquisition folders, recording thread and file reloading
//! - **Communication**: Crossbeam channels between the scan/record threads and callers
//!
//! ## Configuration
//!
//! Preferences are stored as TOML in the platform-appropriate data directory
//! under `i7000-daq`:
//!
//! - **Linux**: `~/.local/share/i7000-daq/`
//! - **macOS**: `~/Library/Application Support/i7000-daq/`
//! - **Windows**: `%APPDATA%\i7000-daq\`
//!
//! ## Example
//!
//! ```
//! use i7000_daq::bus::{Bus, CommandExchange, ReceiveBuffer, SimulatedTransport};
//!
//! let buffer = ReceiveBuffer::new();
//! let transport = SimulatedTransport::new(buffer.clone()).with_module(0x01, "7017");
//! let mut exchange = CommandExchange::new(Bus::new(transport, buffer));
//!
//! let response = exchange.send("$01M")?;
//! assert_eq!(response, "!017017\r");
//! # Ok::<(), i7000_daq::DaqError>(())
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod experiment;
pub mod protocol;
pub mod signal;
pub mod types;

// Re-export commonly used types
pub use bus::{Bus, CommandExchange, DeviceScanner, ReceiveBuffer, ScanEvent, Transport};
pub use config::{AcquisitionSettings, Preferences, SharedPreferences};
pub use error::{DaqError, Result, ResultExt};
pub use experiment::{Experiment, ExperimentController, ExperimentHeader};
pub use protocol::FrameCodec;
pub use signal::{SampleTiming, SignalForm, Waveform};
pub use types::{Device, DeviceTable, SampleRow};
