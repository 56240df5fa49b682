//! Printer protocol driver.
//!
//! [`Printer`] speaks to the running firmware (G-code, ASCII or binary
//! framing) and to the bootloader (single-letter commands from
//! [`protocol::bootloader`](crate::protocol::bootloader)). Every command is
//! followed by a bounded wait for its reply; the only unbounded wait is the
//! reconnect after the printer resets into its bootloader.
//!
//! ## Example
//!
//! ```rust,no_run
//! use m3dflash::{NativeConnector, Printer};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut printer = Printer::new(NativeConnector);
//!     printer.connect(None)?;
//!
//!     let report = printer.update_firmware_file("M3D-2015122901.hex", |stage| {
//!         println!("{stage}");
//!     })?;
//!     println!("Firmware {} installed, CRC {:#010x}", report.version, report.crc);
//!
//!     Ok(())
//! }
//! ```

mod update;

pub use update::{EEPROM_CRC_OFFSET, EEPROM_VERSION_OFFSET, UpdateReport, UpdateStage};

use {
    crate::{
        error::{Error, Result},
        gcode::{Framing, Gcode},
        port::Connector,
        protocol::{
            bootloader::{
                ACK, BOOTLOADER_SWITCH, CRC_REPLY_LEN, CommandFrame, Opcode, PAGE_BYTES,
                STATUS_QUERY, is_bootloader_reply,
            },
            crc::device_crc,
        },
        transport::{Transport, TransportTimings},
    },
    log::{debug, info},
};

/// Connection to an M3D printer.
pub struct Printer<C: Connector> {
    transport: Transport<C>,
}

impl<C: Connector> Printer<C> {
    /// Create a disconnected printer using `connector` to find ports.
    pub fn new(connector: C) -> Self {
        Self {
            transport: Transport::new(connector),
        }
    }

    /// Replace the transport timing parameters.
    #[must_use]
    pub fn with_timings(mut self, timings: TransportTimings) -> Self {
        self.transport = self.transport.with_timings(timings);
        self
    }

    /// Underlying transport.
    pub fn transport(&self) -> &Transport<C> {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut Transport<C> {
        &mut self.transport
    }

    /// Connect to `port`, or to the first attached printer.
    pub fn connect(&mut self, port: Option<&str>) -> Result<()> {
        self.transport.connect(port)
    }

    /// Close the connection.
    pub fn disconnect(&mut self) -> Result<()> {
        self.transport.close()
    }

    /// Path of the current connection.
    pub fn port_name(&self) -> Option<&str> {
        self.transport.port_name()
    }

    /// Raw reply to the `M115` status query.
    pub fn firmware_status(&mut self) -> Result<Vec<u8>> {
        self.transport.send(STATUS_QUERY.as_bytes())?;
        self.transport.receive_ascii()
    }

    /// Whether the bootloader, rather than the firmware, is running.
    pub fn is_bootloader_mode(&mut self) -> Result<bool> {
        let reply = self.firmware_status()?;
        let bootloader = is_bootloader_reply(&reply);
        debug!("Status reply {reply:02X?}, bootloader: {bootloader}");
        Ok(bootloader)
    }

    /// Reset the printer into its bootloader.
    ///
    /// The switch command is sent once as text and once as a binary frame,
    /// since the firmware may be in either mode. Each send is followed by a
    /// reconnect that waits as long as it takes for the printer to
    /// reappear.
    pub fn switch_to_bootloader(&mut self) -> Result<()> {
        info!("Switching printer to bootloader mode");
        self.transport.save_ports()?;

        let switch = Gcode::parse(BOOTLOADER_SWITCH)?;
        self.transport.send(switch.to_ascii().as_bytes())?;
        self.transport.reconnect();
        self.transport.send(&switch.to_binary()?)?;
        self.transport.reconnect();

        debug!(
            "Reconnected on {}",
            self.transport.port_name().unwrap_or("?")
        );
        Ok(())
    }

    /// Send a G-code command to the firmware and return its reply.
    ///
    /// The bootloader switch command makes the printer reset, so the reply
    /// is empty and the connection is re-established before returning.
    pub fn send_gcode(&mut self, gcode: &Gcode, framing: Framing) -> Result<Vec<u8>> {
        let switching = gcode.is_bootloader_switch();
        if switching {
            self.transport.save_ports()?;
        }

        match framing {
            Framing::Ascii => self.transport.send(gcode.to_ascii().as_bytes())?,
            Framing::Binary => self.transport.send(&gcode.to_binary()?)?,
        }

        if switching {
            self.transport.reconnect();
            return Ok(Vec::new());
        }

        match framing {
            Framing::Ascii => self.transport.receive_ascii(),
            Framing::Binary => self.transport.receive_binary(),
        }
    }

    /// Erase the application flash.
    pub fn erase_chip(&mut self) -> Result<()> {
        debug!("Erasing chip");
        self.transport.send(&CommandFrame::erase().build())?;
        let timeout = self.transport.timings().erase_timeout;
        let reply = self.transport.wait_for_reply(timeout)?;
        check_ack(Opcode::Erase, reply)
    }

    /// Set the flash write address.
    pub fn set_address(&mut self, address: u16) -> Result<()> {
        self.command(&CommandFrame::set_address(address))
    }

    /// Write one page at the current address.
    pub fn write_page(&mut self, page: &[u8; PAGE_BYTES]) -> Result<()> {
        self.command(&CommandFrame::write_page(page))
    }

    /// Read the CRC the bootloader computes over the whole flash.
    ///
    /// The value is decoded big-endian; compare it with
    /// [`crc_matches`](crate::protocol::crc::crc_matches).
    pub fn read_crc(&mut self) -> Result<u32> {
        self.transport.send(&CommandFrame::read_crc().build())?;
        let reply = self.transport.receive_ascii()?;
        match reply.get(..CRC_REPLY_LEN) {
            Some(&[a, b, c, d]) => Ok(device_crc([a, b, c, d])),
            _ if reply.is_empty() => Err(Error::Timeout("no reply to read CRC".into())),
            _ => Err(Error::Protocol(format!(
                "CRC reply too short: {reply:02X?}"
            ))),
        }
    }

    /// Write `data` to EEPROM at `address`.
    pub fn write_eeprom(&mut self, address: u16, data: &[u8]) -> Result<()> {
        CommandFrame::write_eeprom(address, data)
            .and_then(|frame| self.command(&frame))
            .map_err(|e| Error::EepromWriteFailed {
                address,
                source: Box::new(e),
            })
    }

    /// Send a bootloader command and expect the acknowledgment.
    fn command(&mut self, frame: &CommandFrame) -> Result<()> {
        self.transport.send(&frame.build())?;
        let reply = self.transport.receive_ascii()?;
        check_ack(frame.opcode(), reply)
    }
}

fn check_ack(opcode: Opcode, reply: Vec<u8>) -> Result<()> {
    if reply == ACK {
        return Ok(());
    }
    if reply.is_empty() {
        return Err(Error::Timeout(format!("no reply to {}", opcode.name())));
    }
    Err(Error::UnexpectedReply {
        command: opcode.name(),
        expected: ACK.to_vec(),
        actual: reply,
    })
}
