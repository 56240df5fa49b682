//! Firmware image handling.

pub mod codec;
pub mod firmware;

pub use firmware::{Encoding, FirmwareImage, ImageInfo, page_count, version_from_path};
