//! Protocol implementations.

pub mod bootloader;
pub mod crc;

// Re-export common types
pub use bootloader::{CommandFrame, Opcode, is_bootloader_reply};
