//! Helpers shared by the commands that drive a bootloader session.

use {
    crate::{CliError, UpdateArgs, config::Config, parse_version, use_fancy_output},
    anyhow::{Context, Result},
    console::style,
    iapflash::{
        LogKind, LogLine, NativePort, SerialConfig, SessionState, UpdateConfig, UpdateEvent,
    },
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    std::time::Duration,
};

/// Version announced when neither the command line nor the config sets one.
pub(crate) const DEFAULT_FIRMWARE_VERSION: u32 = 0x0001_0001;

/// Engine parameters: command line first, then `[update]`, then library defaults.
pub(crate) fn resolve_update_config(args: &UpdateArgs, config: &Config) -> Result<UpdateConfig> {
    let mut update = UpdateConfig::default();

    if let Some(chunk_size) = args.chunk_size.or(config.update.chunk_size) {
        update = update.with_chunk_size(chunk_size);
    }
    if let Some(ms) = args.ack_timeout_ms.or(config.update.ack_timeout_ms) {
        update = update.with_ack_timeout(Duration::from_millis(ms));
    }
    if let Some(retries) = args.retries.or(config.update.max_retries) {
        update = update.with_max_retries(retries);
    }

    update
        .validate()
        .context("Invalid update parameters")?;
    Ok(update)
}

/// Firmware version: command line first, then `[update] version`, then the default.
pub(crate) fn resolve_version(arg: Option<u32>, config: &Config) -> Result<u32> {
    if let Some(version) = arg {
        return Ok(version);
    }
    match &config.update.version {
        Some(text) => parse_version(text)
            .map_err(|e| CliError::Config(format!("[update] version {text:?}: {e}")).into()),
        None => Ok(DEFAULT_FIRMWARE_VERSION),
    }
}

/// Open the selected serial port at 8N1.
pub(crate) fn open_port(name: &str, baud: u32) -> Result<NativePort> {
    Ok(NativePort::open(&SerialConfig::new(name, baud))?)
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
                 {bytes}/{total_bytes} {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Renders session events on stderr.
pub(crate) struct EventPrinter {
    bar: ProgressBar,
    quiet: bool,
    show_frames: bool,
}

impl EventPrinter {
    /// Per-frame `[-->]` and ACK lines are only shown without a progress bar or with `-v`.
    pub(crate) fn new(quiet: bool, verbose: u8) -> Self {
        let fancy = !quiet && use_fancy_output();
        Self {
            bar: if fancy {
                progress_bar()
            } else {
                ProgressBar::hidden()
            },
            quiet,
            show_frames: !fancy || verbose > 0,
        }
    }

    pub(crate) fn handle(&self, event: UpdateEvent) {
        match event {
            UpdateEvent::Log(line) => self.print_line(&line),
            UpdateEvent::State(SessionState::Done) => self.bar.finish(),
            UpdateEvent::State(SessionState::Failed) => self.bar.abandon(),
            UpdateEvent::State(_) => {},
            UpdateEvent::Progress { sent, total } => {
                self.bar.set_length(total as u64);
                self.bar.set_position(sent as u64);
            },
        }
    }

    fn wants(&self, kind: LogKind) -> bool {
        match kind {
            LogKind::Error => true,
            LogKind::Send | LogKind::Ack => !self.quiet && self.show_frames,
            LogKind::Step | LogKind::Ok | LogKind::Retry => !self.quiet,
        }
    }

    fn print_line(&self, line: &LogLine) {
        if !self.wants(line.kind) {
            return;
        }
        let prefix = line.kind.prefix();
        let prefix = match line.kind {
            LogKind::Step => style(prefix).cyan(),
            LogKind::Ok | LogKind::Ack => style(prefix).green(),
            LogKind::Send => style(prefix).dim(),
            LogKind::Retry => style(prefix).yellow(),
            LogKind::Error => style(prefix).red().bold(),
        };
        self.bar
            .suspend(|| eprintln!("{prefix} {}", line.message));
    }
}
