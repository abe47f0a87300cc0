//! Script-style `flash` command.

use {
    super::update::{EventPrinter, open_port, resolve_update_config, resolve_version},
    crate::{Cli, CliError, UpdateArgs, config::Config, get_baud, get_port, was_interrupted},
    anyhow::{Context, Result},
    console::style,
    iapflash::{FirmwareImage, UpdateReport, Updater},
    std::path::Path,
};

pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// One-line summary of a finished update.
pub(crate) fn summary(report: &UpdateReport) -> String {
    format!(
        "Sent {} bytes (CRC32 0x{:08X}, version 0x{:08X}) to {} in {:.1}s, {} retransmissions",
        report.image_size,
        report.image_crc,
        report.version,
        report.device,
        report.elapsed.as_secs_f64(),
        report.retransmissions
    )
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    firmware: &Path,
    args: &UpdateArgs,
) -> Result<()> {
    let image = FirmwareImage::from_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;
    let update_config = resolve_update_config(args, config)?;
    let version = resolve_version(args.version, config)?;

    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes, CRC32 0x{:08X}, {} frames of {} bytes)",
            style("ℹ").blue(),
            firmware.display(),
            image.len(),
            image.crc(),
            image.chunk_count(update_config.chunk_size),
            update_config.chunk_size
        );
    }

    let port_name = get_port(cli, config)?;
    let baud = get_baud(cli, config);
    ensure_not_interrupted()?;

    let port = open_port(&port_name, baud)?;
    if !cli.quiet {
        eprintln!(
            "{} Using {} at {baud} baud",
            style("🔌").cyan(),
            style(&port_name).green()
        );
    }

    let printer = EventPrinter::new(cli.quiet, cli.verbose);
    let report = Updater::new(port, update_config)
        .update(&image, version, &mut |event| printer.handle(event))
        .context("Update failed")?;

    if !cli.quiet {
        eprintln!("{} {}", style("✓").green().bold(), summary(&report));
        eprintln!(
            "{}",
            style("The bootloader verifies the image and reboots on its own.").dim()
        );
    }

    Ok(())
}
