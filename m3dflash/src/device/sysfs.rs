//! Linux discovery through sysfs.
//!
//! Every CDC-ACM tty has `/sys/class/tty/ttyACM*/device/uevent`, whose
//! `MODALIAS` line starts with `usb:v<VID>p<PID>`.

use {
    super::{SerialPortSet, UsbIdentity},
    crate::error::Result,
    log::trace,
    std::{fs, io, path::Path},
};

/// sysfs directory listing tty devices.
pub const SYS_CLASS_TTY: &str = "/sys/class/tty";

/// Directory holding device nodes.
pub const DEV_DIR: &str = "/dev";

const TTY_PREFIX: &str = "ttyACM";

/// List `ttyACM` devices under `sys_root` whose modalias matches `identity`.
///
/// Returned paths are `dev_dir/<name>`, sorted by name. A missing
/// `sys_root` yields an empty set.
pub fn list_ports(
    sys_root: &Path,
    dev_dir: &Path,
    identity: &UsbIdentity,
) -> Result<SerialPortSet> {
    let entries = match fs::read_dir(sys_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SerialPortSet::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(TTY_PREFIX))
        .filter(|name| device_matches(&sys_root.join(name), identity))
        .collect();
    names.sort();

    Ok(names
        .into_iter()
        .map(|name| dev_dir.join(name).to_string_lossy().into_owned())
        .collect())
}

fn device_matches(tty_dir: &Path, identity: &UsbIdentity) -> bool {
    let Ok(uevent) = fs::read_to_string(tty_dir.join("device").join("uevent")) else {
        return false;
    };

    let matched = uevent
        .lines()
        .filter_map(|line| line.strip_prefix("MODALIAS="))
        .any(|alias| identity.matches_hardware_id(alias));
    trace!("{}: printer={matched}", tty_dir.display());
    matched
}
