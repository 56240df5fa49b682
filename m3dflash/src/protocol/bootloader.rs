//! M3D bootloader command framing.
//!
//! The bootloader on the printer's ATxmega32C4 speaks a byte-oriented
//! protocol: every command starts with a single ASCII opcode followed by a
//! fixed or length-prefixed binary payload. Multi-byte fields are sent
//! most-significant byte first.
//!
//! ```text
//! +--------+------------------------------------------+-----------------+
//! | Opcode | Payload                                  | Reply           |
//! +--------+------------------------------------------+-----------------+
//! |  'E'   | -                                        | "\r"            |
//! |  'A'   | addr_hi addr_lo                          | "\r"            |
//! |  'B'   | len_hi len_lo data[len]                  | "\r"            |
//! |  'C'   | 'A'                                      | crc32 (4 bytes) |
//! |  'U'   | addr_hi addr_lo len_hi len_lo data[len]  | "\r"            |
//! +--------+------------------------------------------+-----------------+
//! ```

use {
    crate::error::{Error, Result},
    byteorder::{BigEndian, WriteBytesExt},
};

/// Flash page size in 16-bit words.
pub const PAGE_SIZE_WORDS: usize = 0x80;

/// Number of application flash pages.
pub const PAGE_COUNT: usize = 0x80;

/// Bytes sent per page write (each flash word is two bytes).
pub const PAGE_BYTES: usize = PAGE_SIZE_WORDS * 2;

/// Application flash capacity in bytes.
pub const CHIP_CAPACITY: usize = PAGE_COUNT * PAGE_SIZE_WORDS * 2;

/// Acknowledgment sent by the bootloader for every accepted write.
pub const ACK: &[u8] = b"\r";

/// Length of the CRC reply.
pub const CRC_REPLY_LEN: usize = 4;

/// Firmware status query understood by both firmware and bootloader.
pub const STATUS_QUERY: &str = "M115";

/// Command that makes the running firmware reset into the bootloader.
pub const BOOTLOADER_SWITCH: &str = "M115 S628";

/// First reply byte to [`STATUS_QUERY`] when the bootloader is running.
pub const BOOTLOADER_SENTINEL: u8 = b'B';

/// Bootloader opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Erase the application flash.
    Erase = b'E',
    /// Set the flash write address.
    SetAddress = b'A',
    /// Write one flash page at the current address.
    WritePage = b'B',
    /// Read back the flash CRC.
    ReadCrc = b'C',
    /// Write an EEPROM region.
    WriteEeprom = b'U',
}

impl Opcode {
    /// Human-readable command name, used in error reports.
    pub fn name(self) -> &'static str {
        match self {
            Self::Erase => "erase",
            Self::SetAddress => "set address",
            Self::WritePage => "write page",
            Self::ReadCrc => "read CRC",
            Self::WriteEeprom => "write EEPROM",
        }
    }
}

/// Bootloader command frame builder.
#[derive(Debug)]
pub struct CommandFrame {
    opcode: Opcode,
    data: Vec<u8>,
}

impl CommandFrame {
    /// Create a new command frame with an empty payload.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            data: Vec::new(),
        }
    }

    /// Create a chip erase frame.
    pub fn erase() -> Self {
        Self::new(Opcode::Erase)
    }

    /// Create a set-address frame.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn set_address(address: u16) -> Self {
        let mut frame = Self::new(Opcode::SetAddress);
        frame.data.write_u16::<BigEndian>(address).unwrap();
        frame
    }

    /// Create a page write frame.
    #[allow(clippy::unwrap_used, clippy::cast_possible_truncation)]
    pub fn write_page(page: &[u8; PAGE_BYTES]) -> Self {
        let mut frame = Self::new(Opcode::WritePage);
        frame.data.reserve(2 + PAGE_BYTES);
        frame.data.write_u16::<BigEndian>(PAGE_BYTES as u16).unwrap();
        frame.data.extend_from_slice(page);
        frame
    }

    /// Create a CRC read-back frame.
    pub fn read_crc() -> Self {
        let mut frame = Self::new(Opcode::ReadCrc);
        frame.data.push(b'A');
        frame
    }

    /// Create an EEPROM write frame.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn write_eeprom(address: u16, data: &[u8]) -> Result<Self> {
        let len = u16::try_from(data.len()).map_err(|_| {
            Error::Protocol(format!("EEPROM write of {} bytes is too long", data.len()))
        })?;

        let mut frame = Self::new(Opcode::WriteEeprom);
        frame.data.write_u16::<BigEndian>(address).unwrap();
        frame.data.write_u16::<BigEndian>(len).unwrap();
        frame.data.extend_from_slice(data);
        Ok(frame)
    }

    /// Build the bytes to put on the wire.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.data.len());
        buf.push(self.opcode as u8);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Get the opcode.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }
}

/// Check whether a status reply came from the bootloader.
pub fn is_bootloader_reply(reply: &[u8]) -> bool {
    reply.first() == Some(&BOOTLOADER_SENTINEL)
}
