//! Error types for sciflash.

use std::io;
use thiserror::Error;

/// Result type for sciflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sciflash operations.
///
/// Protocol-level failures during a running session are not errors: they are
/// reported through [`crate::session::Outcome`]. This type covers setup,
/// transport and file problems that prevent a session from running at all.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, dump files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// No scanner adapter was found.
    #[error("Device not found")]
    DeviceNotFound,

    /// Malformed frame or unexpected reply.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Image file has the wrong size or cannot be used.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Unsupported bootloader, chip or operation combination.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another session is already active.
    #[error("A bootstrap session is already running")]
    Busy,
}
