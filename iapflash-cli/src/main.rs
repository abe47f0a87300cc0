//! iapflash CLI - update MCU firmware through a serial IAP bootloader.
//!
//! ## Features
//!
//! - Script-style `flash` and an interactive `wizard`
//! - Query the firmware version recorded by the bootloader
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    clap_complete::Shell,
    console::style,
    env_logger::Env,
    log::debug,
    std::{
        env,
        path::PathBuf,
        process::ExitCode,
        sync::atomic::{AtomicBool, Ordering},
    },
};

mod commands;
mod config;
mod serial;

use {
    config::Config,
    serial::{SerialOptions, ask_remember_port, select_serial_port},
};

/// Default baud rate when neither the command line nor a config file sets one.
pub(crate) const DEFAULT_BAUD: u32 = 115_200;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations and colors should be used on stderr.
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Failures that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or missing operator input.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration value.
    #[error("{0}")]
    Config(String),
    /// Stopped by the user.
    #[error("{0}")]
    Cancelled(String),
}

/// Exit codes.
pub(crate) mod exit {
    pub const SUCCESS: u8 = 0;
    pub const FAILURE: u8 = 1;
    pub const USAGE: u8 = 2;
    pub const CONFIG: u8 = 3;
    pub const DEVICE: u8 = 4;
    pub const CANCELLED: u8 = 130;
}

/// Map an error to the process exit code.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => exit::USAGE,
            CliError::Config(_) => exit::CONFIG,
            CliError::Cancelled(_) => exit::CANCELLED,
        };
    }

    let lib_err = err.downcast_ref::<iapflash::Error>().or_else(|| {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<iapflash::Error>())
    });
    match lib_err {
        Some(iapflash::Error::Interrupted) => exit::CANCELLED,
        Some(iapflash::Error::Config(_)) => exit::CONFIG,
        Some(e) if e.is_transport() => exit::DEVICE,
        _ => exit::FAILURE,
    }
}

/// iapflash - update MCU firmware over a serial IAP bootloader.
///
/// Environment variables:
///   IAPFLASH_PORT              - Default serial port
///   IAPFLASH_BAUD              - Default baud rate (default: 115200)
///   IAPFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "iapflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    iapflash flash app.bin --fw-version 0x00010002\n  \
    iapflash -p /dev/ttyUSB0 query-version\n  \
    iapflash wizard")]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "IAPFLASH_PORT")]
    pub port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "IAPFLASH_BAUD")]
    pub baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "IAPFLASH_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    pub confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    pub list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Update session overrides shared by `flash`.
#[derive(clap::Args, Debug, Clone, Default)]
pub(crate) struct UpdateArgs {
    /// Firmware version announced in START_UPDATE (0x hex or decimal).
    #[arg(id = "fw_version", long = "fw-version", value_name = "VERSION", value_parser = parse_version)]
    pub version: Option<u32>,

    /// Image bytes per DATA frame.
    #[arg(long, value_name = "BYTES")]
    pub chunk_size: Option<usize>,

    /// ACK wait per attempt, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub ack_timeout_ms: Option<u64>,

    /// Attempts per DATA/END frame.
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Send a firmware image to the bootloader.
    Flash {
        /// Raw firmware image (.bin).
        firmware: PathBuf,

        #[command(flatten)]
        update: UpdateArgs,
    },

    /// Guided update with prompts for every parameter.
    Wizard,

    /// Print the firmware version recorded by the bootloader.
    QueryVersion,

    /// List available serial ports.
    ListPorts {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

/// Parse a version: `0x`-prefixed hex (underscores allowed) or decimal.
pub(crate) fn parse_version(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"));
    match hex {
        Some(digits) => {
            let digits: String = digits.chars().filter(|c| *c != '_').collect();
            u32::from_str_radix(&digits, 16).map_err(|e| format!("Invalid hex version: {e}"))
        },
        None => s
            .parse::<u32>()
            .map_err(|e| format!("Invalid version: {e}")),
    }
}

fn log_filter(cli: &Cli) -> String {
    let level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    // Session lines reach the terminal through the event printer
    if cli.verbose >= 2 {
        level.to_string()
    } else {
        format!("{level},iapflash::update::session=off")
    }
}

fn init_logging(cli: &Cli) {
    env_logger::Builder::from_env(Env::default().default_filter_or(log_filter(cli)))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Failed to install Ctrl-C handler: {e}");
    }
    iapflash::set_interrupt_checker(was_interrupted);
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "iapflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::from(exit::SUCCESS),
        Err(err) => {
            let err = if was_interrupted() && exit_code_for(&err) != exit::CANCELLED {
                err.context(CliError::Cancelled("Interrupted".to_string()))
            } else {
                err
            };
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = match &cli.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    match &cli.command {
        Commands::Flash { firmware, update } => {
            commands::flash::cmd_flash(cli, &mut config, firmware, update)
        },
        Commands::Wizard => commands::wizard::cmd_wizard(cli, &mut config),
        Commands::QueryVersion => commands::version::cmd_query_version(cli, &mut config),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: iapflash completions bash \
                         (or use --install to auto-detect)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

/// Resolve the serial port from CLI args, config or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    if !selected.is_known && !cli.non_interactive && cli.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Baud rate from CLI args, then config, then the default.
pub(crate) fn get_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.port.connection.baud)
        .unwrap_or(DEFAULT_BAUD)
}
