//! Simulated I-7000 bus for testing without hardware
//!
//! [`SimulatedTransport`] answers frames the way a chain of real modules
//! would: addresses without a module stay silent, known modules acknowledge
//! name queries, renames, analog reads and analog writes. Responses are
//! pushed into the [`ReceiveBuffer`] either inline or from a short-lived
//! thread when a response delay is configured, which mimics the
//! asynchronous notification of a real serial driver.
//!
//! # Example
//!
//! ```
//! use i7000_daq::bus::{Bus, ReceiveBuffer, SimulatedTransport};
//!
//! let buffer = ReceiveBuffer::new();
//! let transport = SimulatedTransport::new(buffer.clone())
//!     .with_module(0x01, "7017")
//!     .with_module(0x02, "7024");
//! let bus = Bus::new(transport, buffer);
//! assert!(bus.is_open());
//! ```

use super::buffer::ReceiveBuffer;
use super::transport::Transport;
use crate::error::{DaqError, Result};
use crate::protocol::{self, FrameCodec, TERMINATOR};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// State of one simulated module
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedModule {
    /// Name reported by `$AAM`
    pub name: String,
    /// Value reported by `#AA`
    pub reading: f32,
    /// Last value written with `#AA(data)`
    pub output: Option<f32>,
    /// Report the output of another module instead of `reading`
    pub loopback_from: Option<u8>,
}

impl SimulatedModule {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reading: 0.0,
            output: None,
            loopback_from: None,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    modules: BTreeMap<u8, SimulatedModule>,
    frames: Vec<String>,
    open: bool,
}

/// Inspection handle onto a simulated bus, usable after the transport has
/// been moved into a [`Bus`](super::Bus)
#[derive(Debug, Clone)]
pub struct SimulatedBusHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBusHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Current name of a module
    pub fn module_name(&self, address: u8) -> Option<String> {
        self.lock().modules.get(&address).map(|m| m.name.clone())
    }

    /// Last analog output written to a module
    pub fn output(&self, address: u8) -> Option<f32> {
        self.lock().modules.get(&address).and_then(|m| m.output)
    }

    /// Change the value a module reports
    pub fn set_reading(&self, address: u8, reading: f32) {
        if let Some(module) = self.lock().modules.get_mut(&address) {
            module.reading = reading;
        }
    }

    /// Every frame written so far, terminators included
    pub fn frames(&self) -> Vec<String> {
        self.lock().frames.clone()
    }

    /// Open or close the simulated port
    pub fn set_open(&self, open: bool) {
        self.lock().open = open;
    }
}

/// Transport backed by simulated modules
pub struct SimulatedTransport {
    buffer: ReceiveBuffer,
    state: Arc<Mutex<SimState>>,
    codec: FrameCodec,
    echo: bool,
    response_delay: Duration,
}

impl SimulatedTransport {
    /// Create an open bus with no modules
    pub fn new(buffer: ReceiveBuffer) -> Self {
        Self {
            buffer,
            state: Arc::new(Mutex::new(SimState {
                open: true,
                ..SimState::default()
            })),
            codec: FrameCodec::new(false),
            echo: false,
            response_delay: Duration::ZERO,
        }
    }

    /// Add a module at `address`
    pub fn with_module(self, address: u8, name: impl Into<String>) -> Self {
        self.lock()
            .modules
            .insert(address, SimulatedModule::new(name));
        self
    }

    /// Set the analog reading of an existing module
    pub fn with_reading(self, address: u8, reading: f32) -> Self {
        if let Some(module) = self.lock().modules.get_mut(&address) {
            module.reading = reading;
        }
        self
    }

    /// Make `input` report whatever was last written to `output`
    pub fn with_loopback(self, input: u8, output: u8) -> Self {
        if let Some(module) = self.lock().modules.get_mut(&input) {
            module.loopback_from = Some(output);
        }
        self
    }

    /// Expect and produce checksummed frames
    pub fn with_checksum(mut self, enabled: bool) -> Self {
        self.codec = FrameCodec::new(enabled);
        self
    }

    /// Echo every written frame back before the response (half-duplex
    /// adapters without echo suppression)
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Deliver responses from a separate thread after `delay`
    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// Inspection handle shared with this transport
    pub fn handle(&self) -> SimulatedBusHandle {
        SimulatedBusHandle {
            state: self.state.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn respond(&self, frame: &str) -> Option<String> {
        // Corrupted frames are ignored by real modules
        let body = self.codec.strip_checksum(frame)?;
        let mut chars = body.chars();
        let lead = chars.next()?;
        let rest = chars.as_str();
        let address = protocol::parse_address(rest.get(..2)?)?;
        let command = rest.get(2..).unwrap_or_default();
        let addr_text = protocol::format_address(address);

        let mut state = self.lock();
        let loopback = state
            .modules
            .get(&address)?
            .loopback_from
            .and_then(|src| state.modules.get(&src).and_then(|m| m.output));
        let module = state.modules.get_mut(&address)?;

        let reply = match (lead, command) {
            (protocol::COMMAND_LEAD, "M") => format!("!{}{}", addr_text, module.name),
            (protocol::HOST_LEAD, cmd) if cmd.starts_with(protocol::RENAME_COMMAND) => {
                module.name = cmd[1..].to_string();
                format!("!{}", addr_text)
            }
            (protocol::DATA_LEAD, "") => {
                let value = loopback.unwrap_or(module.reading);
                format!(">{}", protocol::format_engineering(value))
            }
            (protocol::DATA_LEAD, data) => match data.parse::<f32>() {
                Ok(value) => {
                    module.output = Some(value);
                    ">".to_string()
                }
                Err(_) => format!("?{}", addr_text),
            },
            _ => format!("?{}", addr_text),
        };

        let mut sealed = reply;
        if self.codec.checksum_enabled() {
            let cs = protocol::checksum(&sealed);
            sealed.push_str(&cs);
        }
        sealed.push(TERMINATOR);
        Some(sealed)
    }
}

impl Transport for SimulatedTransport {
    fn write(&mut self, frame: &str) -> Result<()> {
        {
            let mut state = self.lock();
            if !state.open {
                return Err(DaqError::PortClosed);
            }
            state.frames.push(frame.to_string());
        }

        let mut delivery = String::new();
        if self.echo {
            delivery.push_str(frame);
        }
        if let Some(reply) = self.respond(frame) {
            delivery.push_str(&reply);
        }
        if delivery.is_empty() {
            return Ok(());
        }

        if self.response_delay.is_zero() {
            self.buffer.append(&delivery);
        } else {
            let buffer = self.buffer.clone();
            let delay = self.response_delay;
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                buffer.append(&delivery);
            });
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn name(&self) -> String {
        "simulated".to_string()
    }
}
