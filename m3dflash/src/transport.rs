//! Serial transport: connection lifecycle and reply framing.
//!
//! The transport owns at most one open [`Port`]. Opening a new connection
//! always closes the previous one first, and the handle is released on drop.
//!
//! Replies come in two shapes:
//!
//! - ASCII: the firmware and bootloader do not terminate these. A reply is
//!   whatever arrives after the first byte until the line goes quiet.
//! - Binary: newline-terminated; the newline is not returned.

use {
    crate::{
        device::{SerialPortSet, pick_port},
        error::{Error, Result},
        port::{Connector, Port, SerialConfig},
    },
    log::{debug, info, trace, warn},
    std::{
        io::{ErrorKind, Read},
        thread,
        time::{Duration, Instant},
    },
};

/// Timing parameters for the transport.
///
/// [`Default`] matches what the printer's firmware and bootloader expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportTimings {
    /// Open attempts before giving up.
    pub open_attempts: usize,
    /// Pause before every open attempt.
    pub open_retry_delay: Duration,
    /// Wait for the first byte of a reply.
    pub reply_timeout: Duration,
    /// Silence that ends an ASCII reply.
    pub quiescence: Duration,
    /// Maximum gap between bytes of a binary reply.
    pub line_timeout: Duration,
    /// Maximum wait for the erase acknowledgment.
    pub erase_timeout: Duration,
    /// Pause between reconnect attempts after a mode switch.
    pub reconnect_delay: Duration,
}

impl Default for TransportTimings {
    fn default() -> Self {
        Self {
            open_attempts: 8,
            open_retry_delay: Duration::from_millis(250),
            reply_timeout: Duration::from_millis(200),
            quiescence: Duration::from_micros(50),
            line_timeout: Duration::from_secs(1),
            erase_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_millis(250),
        }
    }
}

/// Owner of the printer connection.
pub struct Transport<C: Connector> {
    connector: C,
    port: Option<C::Port>,
    path: Option<String>,
    snapshot: SerialPortSet,
    timings: TransportTimings,
}

impl<C: Connector> Transport<C> {
    /// Create a disconnected transport.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            port: None,
            path: None,
            snapshot: SerialPortSet::new(),
            timings: TransportTimings::default(),
        }
    }

    /// Replace the timing parameters.
    #[must_use]
    pub fn with_timings(mut self, timings: TransportTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Timing parameters in use.
    pub fn timings(&self) -> &TransportTimings {
        &self.timings
    }

    /// The connector used to find and open ports.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Whether a connection is open.
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Path of the current (or last) connection.
    pub fn port_name(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Record the currently attached ports as the baseline for finding a
    /// port that appears later.
    pub fn save_ports(&mut self) -> Result<()> {
        self.snapshot = self.connector.candidate_ports()?;
        debug!("Saved {} printer port(s)", self.snapshot.len());
        Ok(())
    }

    /// Connect to `path`, or pick a port automatically.
    ///
    /// Automatic selection reuses the previous path while it is attached,
    /// otherwise takes the first port not in the saved snapshot. Only
    /// [`save_ports`](Self::save_ports) moves the snapshot.
    pub fn connect(&mut self, path: Option<&str>) -> Result<()> {
        self.close()?;

        let target = match path {
            Some(p) => p.to_string(),
            None => {
                let current = self.connector.candidate_ports()?;
                pick_port(self.path.as_deref(), &self.snapshot, &current)?
            },
        };

        self.open(&target)
    }

    /// Open `path` with retries.
    fn open(&mut self, path: &str) -> Result<()> {
        let config = SerialConfig::new(path).with_timeout(self.timings.reply_timeout);
        let mut last_error = None;

        for attempt in 1..=self.timings.open_attempts {
            thread::sleep(self.timings.open_retry_delay);

            match self.connector.open(&config) {
                Ok(port) => {
                    if attempt > 1 {
                        debug!("Port opened on attempt {attempt}");
                    }
                    info!("Connected to {path}");
                    self.port = Some(port);
                    self.path = Some(path.to_string());
                    return Ok(());
                },
                Err(e @ Error::LockHeld(_)) => return Err(e),
                Err(e) => {
                    debug!(
                        "Failed to open {path} (attempt {attempt}/{}): {e}",
                        self.timings.open_attempts
                    );
                    last_error = Some(e);
                },
            }
        }

        Err(Error::OpenFailed {
            path: path.to_string(),
            reason: last_error.map_or_else(|| "no attempts made".to_string(), |e| e.to_string()),
        })
    }

    /// Reconnect after the printer reset itself.
    ///
    /// Retries until a printer port can be opened. This never gives up.
    pub fn reconnect(&mut self) {
        let mut failures = 0u32;
        loop {
            match self.connect(None) {
                Ok(()) => return,
                Err(e) => {
                    if failures == 0 {
                        warn!("Waiting for printer to reappear: {e}");
                    } else {
                        trace!("Reconnect attempt {}: {e}", failures + 1);
                    }
                    failures = failures.saturating_add(1);
                    thread::sleep(self.timings.reconnect_delay);
                },
            }
        }
    }

    fn port_mut(&mut self) -> Result<&mut C::Port> {
        self.port.as_mut().ok_or(Error::NotConnected)
    }

    /// Discard stale data, write `bytes` and wait until they are sent.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.clear_buffers()?;
        trace!(">> {bytes:02X?}");
        port.write_all_bytes(bytes)
    }

    /// Receive an unterminated ASCII reply.
    ///
    /// Returns an empty reply if nothing arrives within the reply timeout.
    pub fn receive_ascii(&mut self) -> Result<Vec<u8>> {
        let TransportTimings {
            reply_timeout,
            quiescence,
            ..
        } = self.timings;
        let port = self.port_mut()?;

        let mut buf = [0u8; 64];
        port.set_timeout(reply_timeout)?;
        let n = read_some(port, &mut buf)?;
        if n == 0 {
            trace!("<< (no reply)");
            return Ok(Vec::new());
        }

        let mut reply = buf[..n].to_vec();
        port.set_timeout(quiescence)?;
        loop {
            let n = read_some(port, &mut buf)?;
            if n == 0 {
                break;
            }
            reply.extend_from_slice(&buf[..n]);
        }

        trace!("<< {reply:02X?}");
        Ok(reply)
    }

    /// Receive a newline-terminated binary reply, without the newline.
    ///
    /// Returns an empty reply if nothing arrives within the reply timeout,
    /// and [`Error::Timeout`] if the line stalls before its newline.
    pub fn receive_binary(&mut self) -> Result<Vec<u8>> {
        let TransportTimings {
            reply_timeout,
            line_timeout,
            ..
        } = self.timings;
        let port = self.port_mut()?;

        let mut byte = [0u8; 1];
        port.set_timeout(reply_timeout)?;
        if read_some(port, &mut byte)? == 0 {
            trace!("<< (no reply)");
            return Ok(Vec::new());
        }

        let mut reply = Vec::new();
        port.set_timeout(line_timeout)?;
        while byte[0] != b'\n' {
            reply.push(byte[0]);
            if read_some(port, &mut byte)? == 0 {
                return Err(Error::Timeout(format!(
                    "binary reply stalled after {} bytes",
                    reply.len()
                )));
            }
        }

        trace!("<< {reply:02X?}");
        Ok(reply)
    }

    /// Poll for an ASCII reply until one arrives or `timeout` passes.
    pub fn wait_for_reply(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let reply = self.receive_ascii()?;
            if !reply.is_empty() {
                return Ok(reply);
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "no reply within {} ms",
                    timeout.as_millis()
                )));
            }
        }
    }

    /// Close the connection. Safe to call when already closed.
    pub fn close(&mut self) -> Result<()> {
        match self.port.take() {
            Some(mut port) => {
                debug!("Closing {}", port.name());
                port.close()
            },
            None => Ok(()),
        }
    }
}

impl<C: Connector> Drop for Transport<C> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Error closing port: {e}");
        }
    }
}

/// Read into `buf`, treating a timeout as zero bytes.
fn read_some<P: Port>(port: &mut P, buf: &mut [u8]) -> Result<usize> {
    match port.read(buf) {
        Ok(n) => Ok(n),
        Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
        Err(e) => Err(Error::Io(e)),
    }
}
