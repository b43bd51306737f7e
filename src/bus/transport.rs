//! Transport trait for the byte stream under the bus
//!
//! The core never reads from a transport. Implementations push whatever the
//! link delivers into a [`ReceiveBuffer`](super::ReceiveBuffer) from their own
//! notification context, on whatever thread that happens to be.

use crate::error::Result;

/// Write side of a serial link
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Write one complete frame; fails with [`DaqError::Transport`] or
    /// [`DaqError::PortClosed`] when the link is unusable
    ///
    /// [`DaqError::Transport`]: crate::error::DaqError::Transport
    /// [`DaqError::PortClosed`]: crate::error::DaqError::PortClosed
    fn write(&mut self, frame: &str) -> Result<()>;

    /// Whether the link is open
    fn is_open(&self) -> bool;

    /// Human-readable link name for logs
    fn name(&self) -> String {
        "transport".to_string()
    }
}
