//! Bus access: transport, receive buffer, exchange and scanning
//!
//! All bus traffic goes through a [`Bus`] handle. The handle is cheap to
//! clone and is shared between the command console, the device scanner and
//! the experiment recorder, each of which usually runs on its own thread.
//!
//! # Architecture
//!
//! - [`Transport`] - Write side of the serial link (external or simulated)
//! - [`ReceiveBuffer`] - Text accumulated from the link's notifications
//! - [`CommandExchange`] - Synchronous send-and-await with command history
//! - [`DeviceScanner`] - Background address-range scan with progress events
//! - [`SimulatedTransport`] - Virtual module chain for tests and demos
//!
//! # Single outstanding wait
//!
//! The receive buffer is cleared by whoever starts waiting, so two waits at
//! once would steal each other's responses. [`Bus::begin_wait`] hands out
//! one [`WaitGuard`] at a time; a second caller gets [`DaqError::Busy`]
//! until the guard is dropped.

pub mod buffer;
pub mod exchange;
pub mod history;
pub mod scanner;
pub mod simulated;
pub mod transport;

pub use buffer::{ReceiveBuffer, WaitOutcome};
pub use exchange::{CommandExchange, DEFAULT_RESPONSE_TIMEOUT};
pub use history::{CommandHistory, DEFAULT_HISTORY_CAPACITY};
pub use scanner::{parse_scan_response, DeviceScanner, ScanEvent, ScanHandle, ScanRange};
pub use simulated::{SimulatedBusHandle, SimulatedModule, SimulatedTransport};
pub use transport::Transport;

use crate::error::{DaqError, Result};
use crate::protocol::{FrameCodec, TERMINATOR};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared handle to one serial bus
#[derive(Clone)]
pub struct Bus {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    buffer: ReceiveBuffer,
    checksum_enabled: Arc<AtomicBool>,
    waiting: Arc<AtomicBool>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("checksum_enabled", &self.checksum_enabled())
            .field("waiting", &self.is_waiting())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl Bus {
    /// Wrap a transport whose notifications feed `buffer`
    pub fn new(transport: impl Transport + 'static, buffer: ReceiveBuffer) -> Self {
        Self::from_boxed(Box::new(transport), buffer)
    }

    /// Wrap an already boxed transport
    pub fn from_boxed(transport: Box<dyn Transport>, buffer: ReceiveBuffer) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            buffer,
            checksum_enabled: Arc::new(AtomicBool::new(false)),
            waiting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The receive buffer fed by the transport
    pub fn buffer(&self) -> &ReceiveBuffer {
        &self.buffer
    }

    /// Codec reflecting the current checksum setting
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.checksum_enabled())
    }

    /// Whether frames carry a checksum
    pub fn checksum_enabled(&self) -> bool {
        self.checksum_enabled.load(Ordering::SeqCst)
    }

    /// Toggle checksums for all users of this bus
    pub fn set_checksum_enabled(&self, enabled: bool) {
        self.checksum_enabled.store(enabled, Ordering::SeqCst);
        tracing::debug!("Checksum {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Whether the underlying link is open
    pub fn is_open(&self) -> bool {
        self.transport
            .lock()
            .map(|t| t.is_open())
            .unwrap_or(false)
    }

    /// Whether a scan or exchange currently holds the wait guard
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Claim the single outstanding wait
    pub fn begin_wait(&self) -> Result<WaitGuard> {
        self.waiting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| DaqError::Busy)?;
        Ok(WaitGuard {
            waiting: self.waiting.clone(),
        })
    }

    /// Write one frame to the transport
    pub fn write(&self, frame: &str) -> Result<()> {
        let mut transport = self
            .transport
            .lock()
            .map_err(|_| DaqError::Transport("transport lock poisoned".to_string()))?;
        if !transport.is_open() {
            return Err(DaqError::PortClosed);
        }
        tracing::debug!("-> {:?}", frame);
        transport.write(frame)
    }

    /// Abort the wait in progress, if any
    pub fn interrupt(&self) {
        self.buffer.interrupt();
    }

    /// Send one frame and wait for a terminated response
    ///
    /// Holds the wait guard for the duration of the call. On timeout the
    /// buffer is left as it was so the partial response can be inspected.
    pub fn request(&self, frame: &str, timeout: Duration) -> Result<String> {
        let _guard = self.begin_wait()?;
        self.buffer.clear();
        self.write(frame)?;
        self.await_response(timeout)
    }

    /// Wait for a terminated response to a frame that was just written
    pub(crate) fn await_response(&self, timeout: Duration) -> Result<String> {
        match self.buffer.wait_for(TERMINATOR, timeout) {
            WaitOutcome::Matched(response) => {
                tracing::debug!("<- {:?}", response);
                Ok(response)
            }
            WaitOutcome::TimedOut(partial) => {
                tracing::warn!("No response within {:?}, buffer: {:?}", timeout, partial);
                Err(DaqError::Timeout { timeout, partial })
            }
            WaitOutcome::Interrupted => Err(DaqError::Cancelled),
        }
    }
}

/// Proof that the holder is the only party waiting on the bus
#[derive(Debug)]
pub struct WaitGuard {
    waiting: Arc<AtomicBool>,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.waiting.store(false, Ordering::SeqCst);
    }
}
