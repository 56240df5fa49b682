//! Port abstraction for serial communication with the printer.
//!
//! The transport layer never touches an OS handle directly. It works against
//! two traits:
//!
//! - [`Port`]: an open, exclusively owned byte stream with a read timeout.
//! - [`Connector`]: enumerates candidate devices and opens them as [`Port`]s.
//!
//! ```text
//! +------------------+
//! |  Printer driver  |
//! +--------+---------+
//!          |
//! +--------+---------+
//! |    Transport     |  reconnect, reply framing, timing
//! +--------+---------+
//!          |
//! +--------+---------+      +------------------+
//! | Connector / Port | <--- | NativeConnector  |  serialport crate
//! +------------------+      +------------------+
//! ```
//!
//! Tests substitute an in-memory device for [`NativeConnector`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use m3dflash::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> std::io::Result<()> {
//!     port.write_all(b"M115")?;
//!
//!     let mut buf = [0u8; 64];
//!     let n = port.read(&mut buf)?;
//!     println!("Received: {:?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::device::SerialPortSet;
use crate::error::Result;

/// Baud rate of the printer's USB CDC interface.
pub const BAUD_RATE: u32 = 115_200;

/// Serial port configuration.
///
/// Framing is always 8 data bits, no parity, one stop bit and no flow
/// control; only the values below vary.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: BAUD_RATE,
            timeout: Duration::from_millis(200),
        }
    }
}

impl SerialConfig {
    /// Create a configuration for `port_name` at the printer's baud rate.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An open serial connection.
///
/// A read that times out may report `ErrorKind::TimedOut`,
/// `ErrorKind::WouldBlock` or `Ok(0)`; callers treat all three as "no data".
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release the device lock.
    ///
    /// Calling this more than once is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes and wait until they have been transmitted.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Source of printer connections.
///
/// Separated from [`Port`] because enumeration and opening happen before
/// any handle exists, and because the printer re-enumerates under a new
/// path whenever it switches between firmware and bootloader.
pub trait Connector {
    /// Connection type produced by [`open`](Self::open).
    type Port: Port;

    /// Device paths that currently match the printer's USB identity.
    fn candidate_ports(&self) -> Result<SerialPortSet>;

    /// Open `config.port_name` exclusively.
    ///
    /// Must return [`Error::LockHeld`](crate::Error::LockHeld) when another
    /// process owns the device so the caller can stop retrying.
    fn open(&self, config: &SerialConfig) -> Result<Self::Port>;
}

#[cfg(feature = "native")]
pub use native::{NativeConnector, NativePort};
