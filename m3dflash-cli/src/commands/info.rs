//! Firmware info and port listing command implementations.

use {
    crate::Cli,
    anyhow::{Context, Result},
    console::style,
    m3dflash::{FirmwareImage, PRINTER_USB, list_candidate_ports},
    std::path::Path,
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = list_candidate_ports().context("Failed to list serial ports")?;

    if json {
        let paths: Vec<&str> = ports.iter().collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "usb_id": PRINTER_USB.to_string(),
                "ports": paths,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!(
        "{}",
        style(format!("Printer ports ({PRINTER_USB})"))
            .bold()
            .underlined()
    );

    if ports.is_empty() {
        eprintln!("  {}", style("No printer found").dim());
        return Ok(());
    }

    for path in ports.iter() {
        eprintln!("  {} {}", style("•").green(), style(path).cyan());
    }
    if let Some(first) = ports.iter().next() {
        eprintln!(
            "\n{} Auto-detection would use {}",
            style("→").green().bold(),
            style(first).cyan().bold()
        );
    }
    Ok(())
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, firmware: &Path, json: bool) -> Result<()> {
    if json {
        return cmd_info_json(firmware);
    }

    if !cli.quiet {
        eprintln!(
            "{} Loading firmware {}",
            style("📦").cyan(),
            firmware.display()
        );
    }

    let info = FirmwareImage::from_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?
        .inspect();

    eprintln!("\n{}", style("Firmware image").bold().underlined());
    eprintln!("  Encoding: {}", info.encoding);
    eprintln!("  Size: {} bytes", info.size);
    eprintln!("  Pages: {}", info.page_count);
    eprintln!("  CRC: {:#010X}", info.crc);
    match info.version {
        Some(version) => eprintln!("  Version: {version}"),
        None => eprintln!(
            "  Version: {} (name the file after its version to update with it)",
            style("unknown").yellow()
        ),
    }
    Ok(())
}

/// Info command `--json` output: structured JSON to stdout.
fn cmd_info_json(firmware: &Path) -> Result<()> {
    let info = FirmwareImage::from_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?
        .inspect();

    let output = serde_json::json!({
        "ok": true,
        "data": info,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
