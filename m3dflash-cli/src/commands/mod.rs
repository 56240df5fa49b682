//! Command implementations.
//!
//! Commands that talk to the printer live in [`device`]; offline commands
//! live in [`info`].

pub(crate) mod device;
pub(crate) mod info;
