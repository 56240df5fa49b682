//! CRC-32 used to verify flash contents.
//!
//! The bootloader computes a standard reflected CRC-32 (IEEE 802.3, seed and
//! final XOR `0xFFFFFFFF`) over the whole application flash region and
//! reports it most-significant byte first.

use crc::{CRC_32_ISO_HDLC, Crc};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Calculate the CRC-32/IEEE of `data`.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Decode the 4-byte CRC reply sent by the bootloader.
///
/// The device sends the value big-endian while the host computes it in the
/// table's little-endian convention, so the decoded value equals
/// `crc32(..).swap_bytes()` when flash contents match.
#[must_use]
pub fn device_crc(reply: [u8; 4]) -> u32 {
    u32::from_be_bytes(reply)
}

/// Check whether a device-reported CRC matches a host-computed one.
#[must_use]
pub fn crc_matches(host_crc: u32, device_crc: u32) -> bool {
    host_crc.swap_bytes() == device_crc
}
