//! Error handling for the I-7000 bus controller
//!
//! This module defines the crate-wide error type and a Result alias for use
//! throughout the library. Transport failures and timeouts are recoverable:
//! callers report them and return to their idle state.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for bus, signal and experiment operations
#[derive(Error, Debug)]
pub enum DaqError {
    /// The underlying link rejected a write (port busy, unplugged, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// A write was attempted on a transport that is not open
    #[error("Port is not open")]
    PortClosed,

    /// No terminator arrived within the exchange bound
    #[error("Timeout after {timeout:?} (received {partial:?})")]
    Timeout {
        /// The bound that elapsed
        timeout: Duration,
        /// Whatever had accumulated in the receive buffer
        partial: String,
    },

    /// Another scan or exchange is already waiting on the bus
    #[error("Bus is busy with another request")]
    Busy,

    /// The wait was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// The command text cannot be sent
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// No device with this address in the device table
    #[error("Device {0} not found")]
    DeviceNotFound(String),

    /// The acquisition file has no lines at all
    #[error("File is empty")]
    EmptyFile,

    /// The acquisition file is structurally invalid
    #[error("Invalid file structure at line {line}: {reason}")]
    InvalidFile { line: usize, reason: String },

    /// The `title=` header could not be decoded
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// The path is not `<folder>/<folder>.fim` and no such file sits next to it
    #[error("Not an experiment file: {0:?}")]
    NotAnExperiment(PathBuf),

    /// Save-as destination is the experiment folder's own subtree
    #[error("Cannot save experiment into its own folder: {0:?}")]
    SaveIntoSelf(PathBuf),

    /// Save-as destination contains the experiment folder
    #[error("Cannot save experiment over a folder that contains it: {0:?}")]
    SaveOverParent(PathBuf),

    /// The experiment is already recording
    #[error("Experiment is already running")]
    AlreadyRunning,

    /// Stop was requested on an experiment that is not recording
    #[error("Experiment is not running")]
    NotRunning,

    /// Errors related to configuration loading/saving or validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DaqError>,
    },
}

impl DaqError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DaqError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether the operation may simply be retried
    pub fn is_recoverable(&self) -> bool {
        match self {
            DaqError::Timeout { .. }
            | DaqError::Busy
            | DaqError::Cancelled
            | DaqError::Transport(_)
            | DaqError::PortClosed => true,
            DaqError::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}

/// Result type alias for bus and experiment operations
pub type Result<T> = std::result::Result<T, DaqError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| DaqError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DaqError::Io(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::InvalidCommand("empty".to_string());
        assert_eq!(err.to_string(), "Invalid command: empty");
    }

    #[test]
    fn test_error_with_context() {
        let err = DaqError::EmptyFile;
        let with_ctx = err.with_context("Failed to open experiment");
        assert!(with_ctx.to_string().contains("Failed to open experiment"));
        assert!(with_ctx.to_string().contains("File is empty"));
    }

    #[test]
    fn test_timeout_keeps_partial_response() {
        let err = DaqError::Timeout {
            timeout: Duration::from_millis(100),
            partial: "!01".to_string(),
        };
        assert!(err.to_string().contains("100ms"));
        assert!(err.to_string().contains("!01"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(DaqError::Busy.is_recoverable());
        assert!(DaqError::Busy.with_context("scan").is_recoverable());
        assert!(!DaqError::EmptyFile.is_recoverable());
        assert!(!DaqError::SaveIntoSelf(PathBuf::from("/tmp/x")).is_recoverable());
    }

    #[test]
    fn test_io_result_context() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = res.context("Reading header").unwrap_err();
        assert!(err.to_string().starts_with("Reading header"));
    }
}
