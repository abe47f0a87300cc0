//! Interactive `wizard` command.
//!
//! Collects the port, baud rate, image and version through prompts, then runs
//! the session on a worker thread and streams its events to the terminal.

use {
    super::{
        flash::summary,
        update::{EventPrinter, open_port, resolve_update_config, resolve_version},
        version::format_version,
    },
    crate::{
        Cli, CliError, UpdateArgs, config::Config, get_baud, get_port, parse_version,
        serial::map_prompt_error,
    },
    anyhow::{Context, Result, anyhow},
    console::style,
    dialoguer::{Confirm, Input, theme::ColorfulTheme},
    iapflash::{FirmwareImage, UpdateEvent, Updater},
    std::{io::IsTerminal, path::Path, sync::mpsc, thread},
};

fn ensure_interactive(cli: &Cli) -> Result<()> {
    if cli.non_interactive || !std::io::stdin().is_terminal() || !std::io::stderr().is_terminal()
    {
        return Err(CliError::Usage(
            "The wizard needs an interactive terminal; use `iapflash flash` in scripts".to_string(),
        )
        .into());
    }
    Ok(())
}

#[allow(clippy::ptr_arg)] // dialoguer hands validators &T
fn validate_firmware_path(input: &String) -> Result<(), String> {
    let path = Path::new(input.trim());
    if path.is_file() {
        Ok(())
    } else {
        Err(format!("{} is not a file", path.display()))
    }
}

#[allow(clippy::ptr_arg)]
fn validate_version(input: &String) -> Result<(), String> {
    parse_version(input).map(|_| ())
}

/// Wizard command implementation.
pub(crate) fn cmd_wizard(cli: &Cli, config: &mut Config) -> Result<()> {
    ensure_interactive(cli)?;
    let theme = ColorfulTheme::default();

    eprintln!("{}", style("iapflash update wizard").bold().underlined());

    let update_config = resolve_update_config(&UpdateArgs::default(), config)?;
    let port_name = get_port(cli, config)?;

    let baud: u32 = Input::with_theme(&theme)
        .with_prompt("Baud rate")
        .default(get_baud(cli, config))
        .interact_text()
        .map_err(map_prompt_error)?;

    let firmware: String = Input::with_theme(&theme)
        .with_prompt("Firmware image")
        .validate_with(validate_firmware_path)
        .interact_text()
        .map_err(map_prompt_error)?;
    let firmware = firmware.trim().to_string();
    let image = FirmwareImage::from_file(&firmware)
        .with_context(|| format!("Failed to load firmware {firmware}"))?;

    let default_version = format_version(resolve_version(None, config)?);
    let version: String = Input::with_theme(&theme)
        .with_prompt("Firmware version (0x hex or decimal)")
        .default(default_version)
        .validate_with(validate_version)
        .interact_text()
        .map_err(map_prompt_error)?;
    let version = parse_version(&version).map_err(CliError::Usage)?;

    eprintln!();
    eprintln!("  Port:     {}", style(&port_name).green());
    eprintln!("  Baud:     {baud}");
    eprintln!(
        "  Image:    {firmware} ({} bytes, CRC32 0x{:08X})",
        image.len(),
        image.crc()
    );
    eprintln!("  Version:  {}", format_version(version));
    eprintln!();

    let confirmed = Confirm::with_theme(&theme)
        .with_prompt("Start the update?")
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);
    if !confirmed {
        return Err(CliError::Cancelled("Update cancelled".to_string()).into());
    }

    let port = open_port(&port_name, baud)?;
    let (tx, rx) = mpsc::channel::<UpdateEvent>();
    let worker = thread::spawn(move || {
        Updater::new(port, update_config).update(&image, version, &mut |event| {
            // The receiver only goes away if the terminal thread panicked
            let _ = tx.send(event);
        })
    });

    let printer = EventPrinter::new(cli.quiet, cli.verbose);
    for event in rx {
        printer.handle(event);
    }

    let report = worker
        .join()
        .map_err(|_| anyhow!("Update worker panicked"))?
        .context("Update failed")?;

    eprintln!("{} {}", style("✓").green().bold(), summary(&report));
    Ok(())
}
