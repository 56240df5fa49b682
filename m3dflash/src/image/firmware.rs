//! Firmware image loading and paging.
//!
//! A firmware file is either a plain AVR binary or the obfuscated form the
//! vendor ships. Plain binaries are recognized by their first byte and encoded
//! on load, so a [`FirmwareImage`] always holds the encoded representation.
//!
//! The bootloader decodes every byte in place without undoing the pair swap,
//! so page data on the wire is the encoded image with each pair swapped back.
//! The tail of the last page is padded with [`ENCODED_FILLER`].

use {
    crate::{
        error::{Error, Result},
        image::codec::{self, ENCODED_FILLER},
        protocol::{
            bootloader::{CHIP_CAPACITY, PAGE_BYTES},
            crc::crc32,
        },
    },
    log::debug,
    std::{fs, path::Path},
};

/// Maximum number of trailing file-name digits used as the version.
const VERSION_DIGITS: usize = 10;

/// Encoding of an image as it was found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Encoding {
    /// Plain AVR binary; encoded by the host before transmission.
    Plaintext,
    /// Already encoded; transmitted unchanged.
    Encoded,
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plaintext => write!(f, "plaintext"),
            Self::Encoded => write!(f, "encoded"),
        }
    }
}

/// Number of pages needed for an encoded image of `len` bytes.
pub fn page_count(len: usize) -> usize {
    len.div_ceil(PAGE_BYTES)
}

/// Extract the firmware version from a file name.
///
/// The version is the run of ASCII digits immediately before the extension
/// (`M3D-2015122901.hex` gives `2015122901`). Only the last ten digits are
/// used.
pub fn version_from_path(path: impl AsRef<Path>) -> Result<u32> {
    let path = path.as_ref();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    let digits = stem
        .bytes()
        .rev()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        return Err(Error::InvalidImage(format!(
            "no version number in file name {}",
            path.display()
        )));
    }

    let run = &stem[stem.len() - digits.min(VERSION_DIGITS)..];
    run.parse()
        .map_err(|_| Error::InvalidImage(format!("version {run} does not fit in 32 bits")))
}

/// A firmware image ready to be written page by page.
#[derive(Clone)]
pub struct FirmwareImage {
    encoded: Vec<u8>,
    source_encoding: Encoding,
    version: Option<u32>,
}

impl FirmwareImage {
    /// Load an image from a file, taking the version from its name.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading firmware from: {}", path.display());

        let data = fs::read(path)?;
        let mut image = Self::from_bytes(data)?;
        match version_from_path(path) {
            Ok(version) => image.version = Some(version),
            Err(e) => debug!("{e}"),
        }
        Ok(image)
    }

    /// Build an image from raw file contents, encoding plaintext input.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidImage("image is empty".into()));
        }

        let (encoded, source_encoding) = if codec::is_plaintext(&data) {
            (codec::encode(&data), Encoding::Plaintext)
        } else {
            (data, Encoding::Encoded)
        };

        if encoded.len() > CHIP_CAPACITY {
            return Err(Error::ImageTooLarge {
                size: encoded.len(),
                capacity: CHIP_CAPACITY,
            });
        }

        debug!(
            "Firmware image: {} bytes, {source_encoding}, {} pages",
            encoded.len(),
            page_count(encoded.len())
        );

        Ok(Self {
            encoded,
            source_encoding,
            version: None,
        })
    }

    /// Set the version stored in EEPROM after a successful update.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Encoded image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.encoded
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.encoded.len()
    }

    /// Whether the image has no data.
    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    /// Encoding the image had on disk.
    pub fn source_encoding(&self) -> Encoding {
        self.source_encoding
    }

    /// Firmware version, if known.
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// Number of pages to write.
    pub fn page_count(&self) -> usize {
        page_count(self.encoded.len())
    }

    /// Wire bytes for page `index`.
    pub fn page(&self, index: usize) -> [u8; PAGE_BYTES] {
        let len = self.encoded.len();
        let base = index * PAGE_BYTES;
        let mut page = [ENCODED_FILLER; PAGE_BYTES];
        for (offset, byte) in page.iter_mut().enumerate() {
            let position = base + offset;
            if position | 1 < len {
                *byte = self.encoded[position ^ 1];
            }
        }
        page
    }

    /// Iterate over all pages in write order.
    pub fn pages(&self) -> impl Iterator<Item = [u8; PAGE_BYTES]> + '_ {
        (0..self.page_count()).map(|i| self.page(i))
    }

    /// Chip-sized plaintext image the device should hold after the update.
    pub fn decoded_rom(&self) -> Box<[u8]> {
        codec::decode_rom(&self.encoded)
    }

    /// CRC-32 of [`decoded_rom`](Self::decoded_rom).
    pub fn crc(&self) -> u32 {
        crc32(&self.decoded_rom())
    }

    /// Summarize the image without talking to a device.
    pub fn inspect(&self) -> ImageInfo {
        ImageInfo {
            encoding: self.source_encoding,
            size: self.encoded.len(),
            page_count: self.page_count(),
            crc: self.crc(),
            version: self.version,
        }
    }
}

impl std::fmt::Debug for FirmwareImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareImage")
            .field("len", &self.encoded.len())
            .field("source_encoding", &self.source_encoding)
            .field("version", &self.version)
            .finish()
    }
}

/// Offline summary of a firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ImageInfo {
    /// Encoding found on disk.
    pub encoding: Encoding,
    /// Encoded size in bytes.
    pub size: usize,
    /// Pages written during an update.
    pub page_count: usize,
    /// Expected flash CRC after the update.
    pub crc: u32,
    /// Version from the file name.
    pub version: Option<u32>,
}
