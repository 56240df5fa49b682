//! Firmware update flow.
//!
//! ```text
//! ensure bootloader -> erase -> address 0 -> pages 0..n -> address 0
//!   -> read CRC -> compare -> EEPROM version -> EEPROM CRC
//! ```
//!
//! Any failure stops the update immediately. A failure after the erase
//! leaves the flash partially written; the printer stays in its bootloader
//! and the update can simply be run again.

use {
    super::Printer,
    crate::{
        error::{Error, Result},
        image::FirmwareImage,
        port::Connector,
        protocol::crc::crc_matches,
    },
    log::{debug, info},
    std::{fmt, path::Path},
};

/// EEPROM offset of the firmware version.
pub const EEPROM_VERSION_OFFSET: u16 = 0;

/// EEPROM offset of the firmware CRC.
pub const EEPROM_CRC_OFFSET: u16 = 4;

/// Progress of a firmware update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    /// Resetting the printer into its bootloader.
    SwitchingToBootloader,
    /// Erasing the application flash.
    Erasing,
    /// Writing page `index` of `total`.
    WritingPage {
        /// Zero-based page index.
        index: usize,
        /// Number of pages in the image.
        total: usize,
    },
    /// Reading back and comparing the flash CRC.
    Verifying,
    /// Storing version and CRC in EEPROM.
    WritingEeprom,
    /// Update finished.
    Done,
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SwitchingToBootloader => write!(f, "Switching to bootloader"),
            Self::Erasing => write!(f, "Erasing flash"),
            Self::WritingPage { index, total } => {
                write!(f, "Writing page {}/{total}", index + 1)
            },
            Self::Verifying => write!(f, "Verifying"),
            Self::WritingEeprom => write!(f, "Writing EEPROM"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Result of a successful update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReport {
    /// Firmware version written to EEPROM.
    pub version: u32,
    /// Flash CRC written to EEPROM.
    pub crc: u32,
    /// Pages written.
    pub pages: usize,
}

impl<C: Connector> Printer<C> {
    /// Load a firmware file and install it.
    ///
    /// The file is read and validated before the printer is touched.
    pub fn update_firmware_file<P, F>(&mut self, path: P, progress: F) -> Result<UpdateReport>
    where
        P: AsRef<Path>,
        F: FnMut(UpdateStage),
    {
        let image = FirmwareImage::from_file(path)?;
        self.update_firmware(&image, progress)
    }

    /// Install `image` on the connected printer.
    ///
    /// # Arguments
    ///
    /// * `image` - Firmware to write; must carry a version
    /// * `progress` - Called on every stage change and before every page
    pub fn update_firmware<F>(
        &mut self,
        image: &FirmwareImage,
        mut progress: F,
    ) -> Result<UpdateReport>
    where
        F: FnMut(UpdateStage),
    {
        let version = image.version().ok_or_else(|| {
            Error::InvalidImage("firmware version unknown; name the file after its version".into())
        })?;
        if !self.transport.is_connected() {
            return Err(Error::NotConnected);
        }

        if !self.is_bootloader_mode()? {
            progress(UpdateStage::SwitchingToBootloader);
            self.switch_to_bootloader()?;
        }

        progress(UpdateStage::Erasing);
        self.erase_chip()?;
        self.set_address(0)?;

        let total = image.page_count();
        info!("Writing {total} pages");
        for (index, page) in image.pages().enumerate() {
            progress(UpdateStage::WritingPage { index, total });
            self.write_page(&page)?;
        }

        progress(UpdateStage::Verifying);
        self.set_address(0)?;
        let device = self.read_crc()?;
        let crc = image.crc();
        debug!("Host CRC {crc:#010x}, device CRC {device:#010x}");
        if !crc_matches(crc, device) {
            return Err(Error::CrcMismatch {
                expected: crc.swap_bytes(),
                actual: device,
            });
        }

        progress(UpdateStage::WritingEeprom);
        self.write_eeprom_u32(EEPROM_VERSION_OFFSET, version)?;
        self.write_eeprom_u32(EEPROM_CRC_OFFSET, crc)?;

        progress(UpdateStage::Done);
        info!("Firmware {version} installed");
        Ok(UpdateReport {
            version,
            crc,
            pages: total,
        })
    }

    /// Store `value` little-endian, one byte per EEPROM write.
    fn write_eeprom_u32(&mut self, offset: u16, value: u32) -> Result<()> {
        for (address, byte) in (offset..).zip(value.to_le_bytes()) {
            self.write_eeprom(address, &[byte])?;
        }
        Ok(())
    }
}
