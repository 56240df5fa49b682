//! Printer discovery.
//!
//! The printer enumerates as a USB CDC-ACM device with a fixed vendor and
//! product ID. Switching between firmware and bootloader resets the USB
//! device, and the OS may hand out a different path afterwards, so
//! discovery also supports picking the path that appeared since a previous
//! snapshot.

#[cfg(target_os = "linux")]
pub mod sysfs;

use crate::error::{Error, Result};

#[cfg(all(feature = "native", not(target_os = "linux")))]
use log::trace;
use log::debug;

/// USB vendor/product identity of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbIdentity {
    /// USB vendor ID.
    pub vid: u16,
    /// USB product ID.
    pub pid: u16,
}

/// Identity of the M3D printer's USB interface (Atmel VID).
pub const PRINTER_USB: UsbIdentity = UsbIdentity {
    vid: 0x03EB,
    pid: 0x2404,
};

impl UsbIdentity {
    /// Check a numeric VID/PID pair.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }

    /// Check a platform hardware-ID string.
    ///
    /// Recognizes the Windows PnP form (`USB\VID_03EB&PID_2404\...`), the
    /// pyserial/macOS form (`USB VID:PID=3eb:2404`) and the Linux modalias
    /// form (`usb:v03EBp2404d...`).
    pub fn matches_hardware_id(&self, id: &str) -> bool {
        let id = id.to_ascii_lowercase();
        let forms = [
            format!("vid_{:04x}&pid_{:04x}", self.vid, self.pid),
            format!("{:x}:{:x}", self.vid, self.pid),
            format!("usb:v{:04x}p{:04x}", self.vid, self.pid),
        ];
        forms.iter().any(|form| id.contains(form.as_str()))
    }
}

impl std::fmt::Display for UsbIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vid, self.pid)
    }
}

/// Ordered set of device paths matching the printer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerialPortSet {
    paths: Vec<String>,
}

impl SerialPortSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path, keeping the first occurrence on duplicates.
    pub fn insert(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Check whether `path` is in the set.
    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Iterate over paths in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// Paths in `self` that are absent from `previous`.
    pub fn added_since<'a>(&'a self, previous: &'a Self) -> impl Iterator<Item = &'a str> {
        self.iter().filter(move |p| !previous.contains(p))
    }

    /// Number of paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether no path matched.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for SerialPortSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for path in iter {
            set.insert(path);
        }
        set
    }
}

impl IntoIterator for SerialPortSet {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.into_iter()
    }
}

/// Choose the port to connect to.
///
/// Prefers `last_used` while it is still present, then the first port in
/// `current` that was not in `previous`.
pub fn pick_port(
    last_used: Option<&str>,
    previous: &SerialPortSet,
    current: &SerialPortSet,
) -> Result<String> {
    if let Some(path) = last_used.filter(|p| current.contains(p)) {
        debug!("Reusing port {path}");
        return Ok(path.to_string());
    }

    if let Some(path) = current.added_since(previous).next() {
        debug!("Found new port {path}");
        return Ok(path.to_string());
    }

    Err(Error::PortNotFound)
}

/// List device paths for attached printers.
#[cfg(target_os = "linux")]
pub fn list_candidate_ports() -> Result<SerialPortSet> {
    sysfs::list_ports(
        std::path::Path::new(sysfs::SYS_CLASS_TTY),
        std::path::Path::new(sysfs::DEV_DIR),
        &PRINTER_USB,
    )
}

/// List device paths for attached printers.
#[cfg(all(feature = "native", not(target_os = "linux")))]
pub fn list_candidate_ports() -> Result<SerialPortSet> {
    let ports = serialport::available_ports()?;

    Ok(ports
        .into_iter()
        .filter(|p| match &p.port_type {
            serialport::SerialPortType::UsbPort(info) => {
                trace!(
                    "USB port {} (VID: {:04X}, PID: {:04X})",
                    p.port_name, info.vid, info.pid
                );
                PRINTER_USB.matches(info.vid, info.pid)
            },
            _ => false,
        })
        .map(|p| p.port_name)
        .collect())
}

/// List device paths for attached printers (no enumeration backend).
#[cfg(all(not(feature = "native"), not(target_os = "linux")))]
pub fn list_candidate_ports() -> Result<SerialPortSet> {
    Ok(SerialPortSet::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(paths: &[&str]) -> SerialPortSet {
        paths.iter().copied().collect()
    }

    #[test]
    fn test_identity_matches() {
        assert!(PRINTER_USB.matches(0x03EB, 0x2404));
        assert!(!PRINTER_USB.matches(0x03EB, 0x2405));
        assert_eq!(PRINTER_USB.to_string(), "03EB:2404");
    }

    #[test]
    fn test_identity_matches_hardware_ids() {
        assert!(PRINTER_USB.matches_hardware_id(r"USB\VID_03EB&PID_2404\6&1234"));
        assert!(PRINTER_USB.matches_hardware_id("USB VID:PID=3eb:2404 SNR=AB12"));
        assert!(PRINTER_USB.matches_hardware_id("usb:v03EBp2404d0100dc02dsc00dp00"));
        assert!(!PRINTER_USB.matches_hardware_id("usb:v1A86p7523d0254"));
        assert!(!PRINTER_USB.matches_hardware_id(""));
    }

    #[test]
    fn test_port_set_keeps_order_and_dedups() {
        let ports = set(&["/dev/ttyACM1", "/dev/ttyACM0", "/dev/ttyACM1"]);
        assert_eq!(ports.len(), 2);
        assert_eq!(
            ports.iter().collect::<Vec<_>>(),
            ["/dev/ttyACM1", "/dev/ttyACM0"]
        );
    }

    #[test]
    fn test_pick_port_prefers_new_port() {
        let previous = set(&["A", "B"]);
        let current = set(&["A", "B", "C"]);
        assert_eq!(pick_port(None, &previous, &current).unwrap(), "C");
    }

    #[test]
    fn test_pick_port_reuses_last_port() {
        let previous = set(&["A"]);
        let current = set(&["A"]);
        assert_eq!(pick_port(Some("A"), &previous, &current).unwrap(), "A");
    }

    #[test]
    fn test_pick_port_last_used_gone() {
        let previous = set(&["A"]);
        let current = set(&["B"]);
        assert_eq!(pick_port(Some("A"), &previous, &current).unwrap(), "B");
    }

    #[test]
    fn test_pick_port_nothing_new() {
        let previous = set(&["A"]);
        let current = set(&["A"]);
        assert!(matches!(
            pick_port(None, &previous, &current),
            Err(Error::PortNotFound)
        ));
    }

    #[test]
    fn test_pick_port_empty() {
        assert!(matches!(
            pick_port(Some("A"), &set(&["A"]), &SerialPortSet::new()),
            Err(Error::PortNotFound)
        ));
    }

    #[test]
    fn test_pick_port_first_connect() {
        let current = set(&["/dev/ttyACM0", "/dev/ttyACM1"]);
        assert_eq!(
            pick_port(None, &SerialPortSet::new(), &current).unwrap(),
            "/dev/ttyACM0"
        );
    }
}
