//! End-to-end update flows against a simulated printer.

use {
    m3dflash::{
        Connector, Error, FirmwareImage, Framing, Gcode, Port, Printer, SerialConfig,
        SerialPortSet, TransportTimings, UpdateStage,
        image::codec::DECODE_TABLE,
        protocol::bootloader::CHIP_CAPACITY,
    },
    std::{
        collections::VecDeque,
        io::{self, Read, Write},
        sync::{Arc, Mutex},
        time::Duration,
    },
};

const FIRMWARE_PORT: &str = "/dev/ttyACM0";
const BOOTLOADER_PORT: &str = "/dev/ttyACM1";
const FIRMWARE_REPLY: &[u8] = b"ok PROTOCOL:RepRap FIRMWARE_NAME:Micro3D";

/// Printer state shared between the connector and its open ports.
struct Device {
    bootloader: bool,
    ports: Vec<String>,
    flash: Vec<u8>,
    address: usize,
    eeprom: [u8; 16],
    eeprom_writes: usize,
    rx: VecDeque<u8>,
    commands: Vec<Vec<u8>>,
    corrupt_crc: bool,
    reject_eeprom: bool,
}

impl Device {
    fn new(bootloader: bool) -> Self {
        let port = if bootloader {
            BOOTLOADER_PORT
        } else {
            FIRMWARE_PORT
        };
        Self {
            bootloader,
            ports: vec![port.to_string()],
            flash: vec![0xFF; CHIP_CAPACITY],
            address: 0,
            eeprom: [0xFF; 16],
            eeprom_writes: 0,
            rx: VecDeque::new(),
            commands: Vec::new(),
            corrupt_crc: false,
            reject_eeprom: false,
        }
    }

    fn reply(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    fn reset_into_bootloader(&mut self) {
        self.bootloader = true;
        self.ports = vec![BOOTLOADER_PORT.to_string()];
    }

    fn handle(&mut self, cmd: &[u8]) {
        self.commands.push(cmd.to_vec());
        let binary = cmd.first().is_some_and(|b| b & 0x80 != 0);

        if !self.bootloader {
            if binary {
                // M115 S628 as a binary frame
                if cmd.starts_with(&[0x82, 0x04]) {
                    self.reset_into_bootloader();
                } else {
                    self.reply(b"ok\n");
                }
            } else if cmd == b"M115 S628" {
                self.reset_into_bootloader();
            } else if cmd == b"M115" {
                self.reply(FIRMWARE_REPLY);
            } else {
                self.reply(b"ok");
            }
            return;
        }

        if binary {
            return;
        }
        match cmd {
            b"M115" => self.reply(b"B"),
            b"E" => {
                self.flash.fill(0xFF);
                self.reply(b"\r");
            },
            [b'A', hi, lo] => {
                self.address = usize::from(u16::from_be_bytes([*hi, *lo])) * 2;
                self.reply(b"\r");
            },
            [b'B', hi, lo, data @ ..] => {
                let len = usize::from(u16::from_be_bytes([*hi, *lo]));
                assert_eq!(data.len(), len);
                for (i, b) in data.iter().enumerate() {
                    self.flash[self.address + i] = DECODE_TABLE[usize::from(*b)];
                }
                self.address += len;
                self.reply(b"\r");
            },
            b"CA" => {
                let mut crc = m3dflash::crc32(&self.flash).to_le_bytes();
                if self.corrupt_crc {
                    crc[0] ^= 0xFF;
                }
                self.reply(&crc);
            },
            [b'U', ah, al, lh, ll, data @ ..] => {
                if self.reject_eeprom {
                    self.reply(b"?");
                    return;
                }
                let address = usize::from(u16::from_be_bytes([*ah, *al]));
                let len = usize::from(u16::from_be_bytes([*lh, *ll]));
                assert_eq!(data.len(), len);
                self.eeprom[address..address + len].copy_from_slice(data);
                self.eeprom_writes += 1;
                self.reply(b"\r");
            },
            _ => {},
        }
    }
}

struct SimPort {
    name: String,
    device: Arc<Mutex<Device>>,
}

impl Read for SimPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut device = self.device.lock().unwrap();
        if device.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "timeout"));
        }
        let n = buf.len().min(device.rx.len());
        for (slot, byte) in buf.iter_mut().zip(device.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.device.lock().unwrap().handle(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimPort {
    fn set_timeout(&mut self, _timeout: Duration) -> m3dflash::Result<()> {
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::ZERO
    }

    fn clear_buffers(&mut self) -> m3dflash::Result<()> {
        self.device.lock().unwrap().rx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> m3dflash::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
struct SimConnector {
    device: Arc<Mutex<Device>>,
}

impl Connector for SimConnector {
    type Port = SimPort;

    fn candidate_ports(&self) -> m3dflash::Result<SerialPortSet> {
        Ok(self.device.lock().unwrap().ports.iter().cloned().collect())
    }

    fn open(&self, config: &SerialConfig) -> m3dflash::Result<SimPort> {
        let device = self.device.lock().unwrap();
        if !device.ports.contains(&config.port_name) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no such device",
            )));
        }
        Ok(SimPort {
            name: config.port_name.clone(),
            device: Arc::clone(&self.device),
        })
    }
}

fn fast_timings() -> TransportTimings {
    TransportTimings {
        open_attempts: 2,
        open_retry_delay: Duration::ZERO,
        reply_timeout: Duration::from_millis(1),
        quiescence: Duration::from_micros(50),
        line_timeout: Duration::from_millis(1),
        erase_timeout: Duration::from_millis(10),
        reconnect_delay: Duration::ZERO,
    }
}

fn connected(device: Device) -> (Printer<SimConnector>, Arc<Mutex<Device>>) {
    let device = Arc::new(Mutex::new(device));
    let connector = SimConnector {
        device: Arc::clone(&device),
    };
    let mut printer = Printer::new(connector).with_timings(fast_timings());
    printer.connect(None).unwrap();
    (printer, device)
}

fn plaintext_firmware(len: usize) -> Vec<u8> {
    let mut data: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
    data[0] = 0x0C;
    data
}

#[test]
fn update_from_firmware_mode_writes_flash_and_eeprom() {
    let (mut printer, device) = connected(Device::new(false));
    let plain = plaintext_firmware(300);
    let image = FirmwareImage::from_bytes(plain.clone())
        .unwrap()
        .with_version(2015122901);

    let mut stages = Vec::new();
    let report = printer
        .update_firmware(&image, |stage| stages.push(stage))
        .unwrap();

    assert_eq!(report.version, 2015122901);
    assert_eq!(report.crc, image.crc());
    assert_eq!(report.pages, 2);
    assert_eq!(printer.port_name(), Some(BOOTLOADER_PORT));

    assert_eq!(stages.first(), Some(&UpdateStage::SwitchingToBootloader));
    assert_eq!(stages.last(), Some(&UpdateStage::Done));
    let pages = stages
        .iter()
        .filter(|s| matches!(s, UpdateStage::WritingPage { .. }))
        .count();
    assert_eq!(pages, 2);

    let device = device.lock().unwrap();
    assert!(device.bootloader);
    assert_eq!(&device.flash[..300], plain.as_slice());
    assert!(device.flash[300..].iter().all(|&b| b == 0xFF));
    assert_eq!(&device.eeprom[..4], &2015122901u32.to_le_bytes());
    assert_eq!(&device.eeprom[4..8], &report.crc.to_le_bytes());
    assert_eq!(device.eeprom_writes, 8);
    assert!(device.commands.iter().any(|c| c == b"M115 S628"));
}

#[test]
fn update_in_bootloader_mode_skips_switch() {
    let (mut printer, device) = connected(Device::new(true));
    let image = FirmwareImage::from_bytes(plaintext_firmware(256))
        .unwrap()
        .with_version(1);

    let mut stages = Vec::new();
    let report = printer
        .update_firmware(&image, |stage| stages.push(stage))
        .unwrap();

    assert_eq!(report.pages, 1);
    assert!(!stages.contains(&UpdateStage::SwitchingToBootloader));
    let device = device.lock().unwrap();
    assert!(!device.commands.iter().any(|c| c == b"M115 S628"));
    assert_eq!(&device.eeprom[..4], &[1, 0, 0, 0]);
}

#[test]
fn crc_mismatch_skips_eeprom() {
    let mut sim = Device::new(true);
    sim.corrupt_crc = true;
    let (mut printer, device) = connected(sim);
    let image = FirmwareImage::from_bytes(plaintext_firmware(64))
        .unwrap()
        .with_version(7);

    let result = printer.update_firmware(&image, |_| {});

    assert!(matches!(result, Err(Error::CrcMismatch { .. })));
    let device = device.lock().unwrap();
    assert_eq!(device.eeprom_writes, 0);
    assert!(device.eeprom.iter().all(|&b| b == 0xFF));
}

#[test]
fn eeprom_rejection_reports_offset() {
    let mut sim = Device::new(true);
    sim.reject_eeprom = true;
    let (mut printer, _device) = connected(sim);
    let image = FirmwareImage::from_bytes(plaintext_firmware(64))
        .unwrap()
        .with_version(7);

    let result = printer.update_firmware(&image, |_| {});
    assert!(matches!(
        result,
        Err(Error::EepromWriteFailed { address: 0, .. })
    ));
}

#[test]
fn oversized_file_is_rejected_before_device_io() {
    let (mut printer, device) = connected(Device::new(false));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firmware-2015122901.hex");
    std::fs::write(&path, plaintext_firmware(CHIP_CAPACITY + 2)).unwrap();

    let result = printer.update_firmware_file(&path, |_| {});

    assert!(matches!(result, Err(Error::ImageTooLarge { .. })));
    assert!(device.lock().unwrap().commands.is_empty());
}

#[test]
fn missing_version_is_rejected_before_device_io() {
    let (mut printer, device) = connected(Device::new(true));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firmware.hex");
    std::fs::write(&path, plaintext_firmware(64)).unwrap();

    let result = printer.update_firmware_file(&path, |_| {});

    assert!(matches!(result, Err(Error::InvalidImage(_))));
    assert!(device.lock().unwrap().commands.is_empty());
}

#[test]
fn update_from_file_uses_version_in_name() {
    let (mut printer, device) = connected(Device::new(true));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("M3D-2016040401.hex");
    std::fs::write(&path, plaintext_firmware(512)).unwrap();

    let report = printer.update_firmware_file(&path, |_| {}).unwrap();

    assert_eq!(report.version, 2016040401);
    assert_eq!(
        &device.lock().unwrap().eeprom[..4],
        &2016040401u32.to_le_bytes()
    );
}

#[test]
fn status_and_mode_detection() {
    let (mut printer, _device) = connected(Device::new(false));
    assert_eq!(printer.firmware_status().unwrap(), FIRMWARE_REPLY);
    assert!(!printer.is_bootloader_mode().unwrap());

    let (mut printer, _device) = connected(Device::new(true));
    assert!(printer.is_bootloader_mode().unwrap());
}

#[test]
fn send_gcode_in_both_framings() {
    let (mut printer, _device) = connected(Device::new(false));
    let gcode = Gcode::parse("G28").unwrap();

    assert_eq!(printer.send_gcode(&gcode, Framing::Ascii).unwrap(), b"ok");
    assert_eq!(printer.send_gcode(&gcode, Framing::Binary).unwrap(), b"ok");
}

#[test]
fn send_gcode_switch_reconnects() {
    let (mut printer, device) = connected(Device::new(false));
    let gcode = Gcode::parse("M115 S628").unwrap();

    let reply = printer.send_gcode(&gcode, Framing::Ascii).unwrap();

    assert!(reply.is_empty());
    assert_eq!(printer.port_name(), Some(BOOTLOADER_PORT));
    assert!(device.lock().unwrap().bootloader);
}

#[test]
fn encoded_image_is_sent_unchanged() {
    let (mut printer, device) = connected(Device::new(true));
    let plain = plaintext_firmware(128);
    let encoded = m3dflash::image::codec::encode(&plain);
    let image = FirmwareImage::from_bytes(encoded).unwrap().with_version(3);

    printer.update_firmware(&image, |_| {}).unwrap();

    assert_eq!(&device.lock().unwrap().flash[..128], plain.as_slice());
}
