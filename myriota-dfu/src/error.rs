//! Error types for myriota-dfu.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for myriota-dfu operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for myriota-dfu operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The transport failed to send or subscribe.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport reports that no device is connected.
    #[error("Device not connected")]
    NotConnected,

    /// The session is closed or its event channel went away.
    #[error("Session closed")]
    SessionClosed,

    /// The device never announced its bootloader.
    #[error("Device not found or not in bootloader mode")]
    DeviceNotFound,

    /// Writing the enter-bootloader command failed.
    #[error("Failed entering bootloader, restart the module and try again")]
    BootloaderEntry,

    /// The whole transfer did not finish within its wall-clock ceiling.
    #[error("Upload timed out after {} seconds", .0.as_secs())]
    UploadTimedOut(Duration),

    /// The start-application confirmation never arrived.
    #[error("Application did not start")]
    ApplicationNotStarted,

    /// The sender gave up and cancelled the transfer.
    #[error("Transfer aborted: {0}")]
    TransferAborted(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
