//! Update, status, and send command implementations.

use {
    crate::{Cli, CliError, config::Config, resolve_port, use_fancy_output},
    anyhow::{Context, Result},
    console::style,
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    m3dflash::{
        FirmwareImage, Framing, Gcode, NativeConnector, Printer, UpdateStage,
        protocol::is_bootloader_reply,
    },
    std::path::Path,
};

/// Open a connection to the printer.
fn connect(cli: &Cli, config: &Config) -> Result<Printer<NativeConnector>> {
    let port = resolve_port(cli, config);
    if !cli.quiet {
        eprintln!(
            "{} Waiting for printer on {}",
            style("⏳").yellow(),
            port.unwrap_or("any port")
        );
    }

    let mut printer = Printer::new(NativeConnector);
    printer
        .connect(port)
        .context("Failed to connect to printer")?;
    Ok(printer)
}

/// Update command implementation.
pub(crate) fn cmd_update(cli: &Cli, config: &Config, firmware: &Path) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware {}",
            style("📦").cyan(),
            firmware.display()
        );
    }

    let image = FirmwareImage::from_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;
    if image.version().is_none() {
        return Err(CliError::Usage(format!(
            "no version in {}; name the file after its version, e.g. M3D-2015122901.hex",
            firmware.display()
        ))
        .into());
    }

    if !cli.quiet {
        let info = image.inspect();
        eprintln!(
            "{} {} image, {} bytes in {} pages",
            style("ℹ").blue(),
            info.encoding,
            info.size,
            info.page_count
        );
    }

    let mut printer = connect(cli, config)?;

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(image.page_count() as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb
    };

    let report = printer
        .update_firmware(&image, |stage| match stage {
            UpdateStage::WritingPage { index, total } => {
                pb.set_length(total as u64);
                pb.set_position(index as u64);
                pb.set_message("Writing");
            },
            UpdateStage::Verifying => {
                pb.set_position(image.page_count() as u64);
                pb.set_message(stage.to_string());
            },
            _ => pb.set_message(stage.to_string()),
        })
        .inspect_err(|_| pb.abandon())
        .context("Firmware update failed")?;

    pb.finish_with_message("Complete");
    printer.disconnect()?;

    if !cli.quiet {
        eprintln!(
            "\n{} Firmware {} installed (CRC {:#010x}, {} pages)",
            style("🎉").green().bold(),
            report.version,
            report.crc,
            report.pages
        );
    }
    Ok(())
}

/// Status command implementation.
pub(crate) fn cmd_status(cli: &Cli, config: &Config) -> Result<()> {
    let mut printer = connect(cli, config)?;
    let reply = printer
        .firmware_status()
        .context("Failed to query printer status")?;

    let mode = if is_bootloader_reply(&reply) {
        "bootloader"
    } else {
        "firmware"
    };
    println!("Port: {}", printer.port_name().unwrap_or("?"));
    println!("Mode: {mode}");
    println!("Reply: {}", format_reply(&reply));

    printer.disconnect()?;
    Ok(())
}

/// Send command implementation.
pub(crate) fn cmd_send(cli: &Cli, config: &Config, line: &str, binary: bool) -> Result<()> {
    let gcode = Gcode::parse(line).map_err(|e| CliError::Usage(e.to_string()))?;
    let framing = if binary {
        // Reject values that cannot be framed before touching the printer
        gcode
            .to_binary()
            .map_err(|e| CliError::Usage(e.to_string()))?;
        Framing::Binary
    } else {
        Framing::Ascii
    };

    let mut printer = connect(cli, config)?;
    let reply = printer
        .send_gcode(&gcode, framing)
        .with_context(|| format!("Failed to send {gcode}"))?;

    if gcode.is_bootloader_switch() {
        if !cli.quiet {
            eprintln!(
                "{} Printer restarted in bootloader mode on {}",
                style("✓").green(),
                style(printer.port_name().unwrap_or("?")).cyan()
            );
        }
    } else {
        println!("{}", format_reply(&reply));
    }

    printer.disconnect()?;
    Ok(())
}

/// Render a reply as text, or as hex bytes when it is not printable.
fn format_reply(reply: &[u8]) -> String {
    match std::str::from_utf8(reply) {
        Ok(text) if !text.chars().any(|c| c.is_control() && !c.is_whitespace()) => {
            text.trim().to_string()
        },
        _ => reply
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" "),
    }
}
