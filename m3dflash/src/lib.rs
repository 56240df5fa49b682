//! # m3dflash
//!
//! A library for updating the firmware of M3D Micro 3D printers.
//!
//! This crate provides the host side of the printer's serial protocol:
//!
//! - Discovery of the printer's USB serial port, including re-discovery
//!   after it resets into its bootloader
//! - The bootloader command set (erase, page write, CRC read-back, EEPROM)
//! - The firmware image codec and CRC-32 verification
//! - A minimal G-code model for talking to the running firmware
//!
//! ## Supported Platforms
//!
//! - **Linux**: ports discovered through sysfs
//! - **macOS, Windows**: ports discovered through the `serialport` crate
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for image information
//!
//! ## Example
//!
//! ```rust,no_run
//! use m3dflash::{FirmwareImage, NativeConnector, Printer};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load and validate the image before touching the printer
//!     let image = FirmwareImage::from_file("M3D-2015122901.hex")?;
//!
//!     let mut printer = Printer::new(NativeConnector);
//!     printer.connect(None)?;
//!
//!     let report = printer.update_firmware(&image, |stage| println!("{stage}"))?;
//!     println!("CRC {:#010x}", report.crc);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod gcode;
pub mod image;
pub mod port;
pub mod printer;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativeConnector, NativePort};
pub use {
    device::{PRINTER_USB, SerialPortSet, UsbIdentity, list_candidate_ports, pick_port},
    error::{Error, Result},
    gcode::{Framing, Gcode},
    image::{Encoding, FirmwareImage, ImageInfo},
    port::{Connector, Port, SerialConfig},
    printer::{Printer, UpdateReport, UpdateStage},
    protocol::crc::crc32,
    transport::{Transport, TransportTimings},
};
