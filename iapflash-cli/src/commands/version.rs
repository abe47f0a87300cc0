//! `query-version` command.

use {
    super::{
        flash::ensure_not_interrupted,
        update::{EventPrinter, open_port, resolve_update_config},
    },
    crate::{Cli, UpdateArgs, config::Config, get_baud, get_port},
    anyhow::{Context, Result},
    iapflash::Updater,
};

/// Version as printed on stdout.
pub(crate) fn format_version(version: u32) -> String {
    format!("0x{version:08X}")
}

/// Handshake and print the version the bootloader recorded for the installed image.
pub(crate) fn cmd_query_version(cli: &Cli, config: &mut Config) -> Result<()> {
    let update_config = resolve_update_config(&UpdateArgs::default(), config)?;
    let port_name = get_port(cli, config)?;
    let baud = get_baud(cli, config);
    ensure_not_interrupted()?;

    let port = open_port(&port_name, baud)?;
    let printer = EventPrinter::new(cli.quiet, cli.verbose);
    let version = Updater::new(port, update_config)
        .query_version(&mut |event| printer.handle(event))
        .context("Version query failed")?;

    println!("{}", format_version(version));
    Ok(())
}
