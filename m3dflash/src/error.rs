//! Error types for m3dflash.

use std::io;
use thiserror::Error;

/// Result type for m3dflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for m3dflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No serial port matching the printer could be selected.
    #[error("No printer port found")]
    PortNotFound,

    /// The port could not be opened within the retry window.
    #[error("Failed to open {path}: {reason}")]
    OpenFailed {
        /// Device path.
        path: String,
        /// Last error reported by the OS.
        reason: String,
    },

    /// Another process holds the exclusive lock on the device.
    #[error("{0} is in use by another process")]
    LockHeld(String),

    /// No connection is open.
    #[error("Not connected to a printer")]
    NotConnected,

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The device replied, but not with the expected acknowledgment.
    #[error("Unexpected reply to {command}: expected {expected:02X?}, got {actual:02X?}")]
    UnexpectedReply {
        /// Command that was sent.
        command: &'static str,
        /// Expected reply bytes.
        expected: Vec<u8>,
        /// Reply bytes actually received.
        actual: Vec<u8>,
    },

    /// Firmware image does not fit into the chip's flash.
    #[error("Firmware image is {size} bytes, chip capacity is {capacity} bytes")]
    ImageTooLarge {
        /// Encoded image size.
        size: usize,
        /// Chip capacity.
        capacity: usize,
    },

    /// Firmware image could not be used.
    #[error("Invalid firmware image: {0}")]
    InvalidImage(String),

    /// CRC reported by the device does not match the transmitted image.
    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// CRC computed on the host, in device byte order.
        expected: u32,
        /// CRC reported by the device.
        actual: u32,
    },

    /// Writing the EEPROM metadata failed.
    #[error("EEPROM write at offset {address} failed: {source}")]
    EepromWriteFailed {
        /// EEPROM offset being written.
        address: u16,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A G-code line could not be parsed or rendered.
    #[error("Invalid G-code: {0}")]
    InvalidGcode(String),
}
