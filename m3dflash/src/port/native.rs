//! Native serial port implementation using the `serialport` crate.
//!
//! On Unix the port is opened with `TIOCEXCL`, so a second open of the same
//! device fails with `EBUSY` while we hold it. Windows COM ports are
//! exclusive by default and report "access denied" instead.

use {
    crate::{
        device,
        error::{Error, Result},
        port::{Connector, Port, SerialConfig},
    },
    log::{debug, trace},
    serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits},
    std::{
        io::{Read, Write},
        time::Duration,
    },
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| {
                if is_lock_error(&e) {
                    Error::LockHeld(config.port_name.clone())
                } else {
                    Error::Serial(e)
                }
            })?;

        debug!("Opened {} at {} baud", config.port_name, config.baud_rate);

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            timeout: config.timeout,
        })
    }
}

/// Check whether an open failure means another process holds the device.
fn is_lock_error(e: &serialport::Error) -> bool {
    let description = e.description.to_ascii_lowercase();
    description.contains("busy") || description.contains("access is denied")
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            trace!("Closed {}", self.name);
        }
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.write(buf))
    }

    // Blocks until the OS has transmitted everything (tcdrain on Unix).
    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(std::io::Write::flush)
    }
}

/// Connector for printers attached to this host.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

impl Connector for NativeConnector {
    type Port = NativePort;

    fn candidate_ports(&self) -> Result<device::SerialPortSet> {
        device::list_candidate_ports()
    }

    fn open(&self, config: &SerialConfig) -> Result<NativePort> {
        NativePort::open(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_errors_are_recognized() {
        let busy = serialport::Error::new(
            serialport::ErrorKind::Io(std::io::ErrorKind::Other),
            "Device or resource busy",
        );
        assert!(is_lock_error(&busy));

        let denied = serialport::Error::new(serialport::ErrorKind::NoDevice, "Access is denied.");
        assert!(is_lock_error(&denied));

        let missing = serialport::Error::new(serialport::ErrorKind::NoDevice, "No such device");
        assert!(!is_lock_error(&missing));
    }

    #[test]
    fn test_open_missing_port_is_not_lock_error() {
        let config = SerialConfig::new("/dev/m3dflash-does-not-exist");
        assert!(matches!(NativePort::open(&config), Err(Error::Serial(_))));
    }
}
