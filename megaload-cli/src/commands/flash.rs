//! Flash command implementation.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use megaload::{
    BootloaderSession, DeviceProfile, FieldOrder, GenericProfile, MegaLoadProfile, MemoryImage,
    NativePort, ProfileKind, SerialConfig, SessionConfig, UploadConfig, Uploader,
    port::{DEFAULT_BAUD, StopBits},
    progress::{Event, ProgressReporter, RetryReason},
    protocol::upload::{DEFAULT_MAX_FAILURES, DEFAULT_PAGE_TIMEOUT},
    session::DEFAULT_HANDSHAKE_TIMEOUT,
};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::escape::unescape;
use crate::{Cli, CliError, use_fancy_output};

/// Arguments of `megaload flash`.
#[derive(Args, Debug, Clone)]
pub(crate) struct FlashArgs {
    /// Path to the Intel HEX file.
    pub(crate) hex: PathBuf,

    /// Serial port to use.
    #[arg(short, long, env = "MEGALOAD_PORT")]
    pub(crate) port: Option<String>,

    /// Baud rate [default: 38400].
    #[arg(short, long, env = "MEGALOAD_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Stop bits on the serial line [default: 2].
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u8).range(1..=2))]
    pub(crate) stop_bits: Option<u8>,

    /// Time to wait for the bootloader, in seconds [default: 10].
    #[arg(short, long, value_name = "SECS")]
    pub(crate) timeout: Option<u64>,

    /// Time to wait for each page acknowledgement, in seconds [default: 3].
    #[arg(long, value_name = "SECS")]
    pub(crate) page_timeout: Option<u64>,

    /// String sent to make the application enter the bootloader
    /// (C escapes such as \n, \r and \xHH are decoded).
    #[arg(short = 's', long = "send-reset", value_name = "STRING")]
    pub(crate) send_reset: Option<String>,

    /// Order the bootloader sends its parameters in, as five tokens
    /// from proc, flash, boot, page, eeprom.
    #[arg(long, env = "MEGALOAD_FIELD_ORDER", value_name = "TOKENS")]
    pub(crate) field_order: Option<FieldOrder>,

    /// EvB 5.1 boards send the page size first (overrides --field-order).
    #[arg(long)]
    pub(crate) workaround_evb: bool,

    /// Bootloader family.
    #[arg(long, value_enum)]
    pub(crate) profile: Option<ProfileArg>,

    /// Log every byte exchanged with the device.
    #[arg(long)]
    pub(crate) debug: bool,
}

/// Bootloader families selectable on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum ProfileArg {
    /// MegaLoad 3/4/5 (default).
    Megaload,
    /// Generic address/length/payload/checksum framing.
    Generic,
}

impl From<ProfileArg> for ProfileKind {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Megaload => ProfileKind::MegaLoad,
            ProfileArg::Generic => ProfileKind::Generic,
        }
    }
}

/// Flash settings after merging command line, config file and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FlashSettings {
    pub(crate) port: String,
    pub(crate) baud: u32,
    pub(crate) stop_bits: StopBits,
    pub(crate) timeout: Duration,
    pub(crate) page_timeout: Duration,
    pub(crate) reset: Vec<u8>,
    pub(crate) field_order: FieldOrder,
    pub(crate) profile: ProfileKind,
    pub(crate) max_failures: u32,
    pub(crate) trace_wire: bool,
}

impl FlashSettings {
    pub(crate) fn resolve(args: &FlashArgs, config: &Config) -> Result<Self, CliError> {
        let port = args
            .port
            .clone()
            .or_else(|| {
                config
                    .connection
                    .port
                    .clone()
            })
            .ok_or_else(|| {
                CliError::Usage("No serial port given; use --port or MEGALOAD_PORT".to_string())
            })?;

        let field_order = if args.workaround_evb {
            FieldOrder::EVB
        } else if let Some(order) = args.field_order {
            order
        } else if let Some(tokens) = &config.device.field_order {
            tokens
                .parse()
                .map_err(|e: megaload::Error| CliError::Usage(format!("In config file: {e}")))?
        } else {
            FieldOrder::default()
        };

        let profile = match (args.profile, &config.device.profile) {
            (Some(arg), _) => arg.into(),
            (None, Some(name)) => ProfileKind::from_name(name).ok_or_else(|| {
                CliError::Usage(format!(
                    "Unknown profile '{name}' in config file (expected megaload or generic)"
                ))
            })?,
            (None, None) => ProfileKind::default(),
        };

        let reset = match args
            .send_reset
            .as_ref()
            .or(config
                .device
                .reset
                .as_ref())
        {
            Some(s) => unescape(s).map_err(|e| CliError::Usage(format!("Invalid reset string: {e}")))?,
            None => Vec::new(),
        };

        let stop_bits = match args
            .stop_bits
            .or(config.connection.stop_bits)
        {
            None | Some(2) => StopBits::Two,
            Some(1) => StopBits::One,
            Some(n) => {
                return Err(CliError::Usage(format!(
                    "Invalid stop bits {n} in config file (expected 1 or 2)"
                )));
            },
        };

        let timeout = args
            .timeout
            .or(config.connection.timeout)
            .map_or(DEFAULT_HANDSHAKE_TIMEOUT, Duration::from_secs);
        let page_timeout = args
            .page_timeout
            .or(config.device.page_timeout)
            .map_or(DEFAULT_PAGE_TIMEOUT, Duration::from_secs);

        Ok(Self {
            port,
            baud: args
                .baud
                .or(config.connection.baud)
                .unwrap_or(DEFAULT_BAUD),
            stop_bits,
            timeout,
            page_timeout,
            reset,
            field_order,
            profile,
            max_failures: config
                .device
                .max_failures
                .unwrap_or(DEFAULT_MAX_FAILURES),
            trace_wire: args.debug,
        })
    }
}

/// Draws lifecycle events on stderr.
struct ConsoleReporter {
    pb: ProgressBar,
    quiet: bool,
}

impl ConsoleReporter {
    fn new(quiet: bool) -> Self {
        let pb = if quiet || !use_fancy_output() {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(0);
            #[allow(clippy::unwrap_used)] // Static template string
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages {msg}")
                    .unwrap()
                    .progress_chars("#>-"),
            );
            pb.set_draw_target(ProgressDrawTarget::stderr());
            pb
        };
        Self { pb, quiet }
    }

    fn status(&self, line: String) {
        if !self.quiet {
            self.pb
                .suspend(|| eprintln!("{line}"));
        }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn report(&mut self, event: &Event) {
        match event {
            Event::ResetSent => {},
            Event::BannerRecognized { description } => {
                self.status(format!("{} Found {description} bootloader", style("✓").green()));
            },
            Event::ProcInfoRead(info) => {
                self.status(format!(
                    "{} Signature 0x{:02X}, flash {} B, boot {} B, page {} B, EEPROM {} B",
                    style("ℹ").blue(),
                    info.signature,
                    info.flash_size,
                    info.boot_size,
                    info.page_size,
                    info.eeprom_size
                ));
            },
            Event::UploadStarted { total_pages, .. } => {
                self.pb
                    .set_length(*total_pages as u64);
                self.pb
                    .set_message("flashing");
            },
            Event::PageRetry {
                page,
                failures,
                reason,
                ..
            } => {
                let reason = match reason {
                    RetryReason::Nak => "rejected".to_string(),
                    RetryReason::Timeout => "no answer".to_string(),
                    RetryReason::Unexpected(b) => format!("unexpected byte 0x{b:02X}"),
                };
                self.status(format!(
                    "{} Page {page}: {reason} (failure {failures})",
                    style("⚠").yellow()
                ));
            },
            Event::PageWritten { index, .. } => {
                self.pb
                    .set_position(*index as u64 + 1);
            },
            Event::Finished(_) => {
                self.pb
                    .finish_with_message("complete");
            },
            Event::Failed { .. } => {
                self.pb
                    .abandon();
            },
        }
    }
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, args: &FlashArgs, config: &Config) -> Result<()> {
    let settings = FlashSettings::resolve(args, config)?;

    if !cli.quiet {
        eprintln!(
            "{} Loading {}",
            style("📦").cyan(),
            args.hex
                .display()
        );
    }
    let image = MemoryImage::from_file(&args.hex)
        .with_context(|| format!("Failed to load {}", args.hex.display()))?;
    if image.is_empty() {
        return Err(megaload::Error::EmptyImage.into());
    }
    if !cli.quiet {
        eprintln!(
            "{} {} bytes in {} segment(s)",
            style("ℹ").blue(),
            image.len(),
            image
                .segments()
                .len()
        );
    }

    let serial = SerialConfig::new(&settings.port, settings.baud)
        .with_timeout(settings.timeout)
        .with_stop_bits(settings.stop_bits);
    let port = NativePort::open(&serial).with_context(|| format!("Failed to open {}", settings.port))?;
    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style("🔌").cyan(),
            settings.port,
            settings.baud
        );
        eprintln!(
            "{} Waiting for bootloader (reset the board if needed)...",
            style("⏳").yellow()
        );
    }

    match settings.profile {
        ProfileKind::MegaLoad => flash_with(port, MegaLoadProfile::new(), &settings, &image, cli.quiet),
        ProfileKind::Generic => flash_with(port, GenericProfile::new(), &settings, &image, cli.quiet),
    }
}

fn flash_with<D: DeviceProfile>(
    port: NativePort,
    profile: D,
    settings: &FlashSettings,
    image: &MemoryImage,
    quiet: bool,
) -> Result<()> {
    let session_config = SessionConfig::default()
        .with_reset_sequence(
            settings
                .reset
                .clone(),
        )
        .with_handshake_timeout(settings.timeout)
        .with_field_timeout(settings.timeout)
        .with_field_order(settings.field_order)
        .with_trace_wire(settings.trace_wire);
    let mut session = BootloaderSession::new(port, profile, session_config);
    let mut reporter = ConsoleReporter::new(quiet);

    session
        .handshake(&mut reporter)
        .context("Bootloader handshake failed")?;

    let upload_config = UploadConfig::default()
        .with_page_timeout(settings.page_timeout)
        .with_max_failures(settings.max_failures);
    let summary = Uploader::new(&mut session, upload_config).upload(image, &mut reporter)?;

    session.close()?;

    if !quiet {
        eprintln!(
            "\n{} Flashed {} pages ({} bytes, {} retries)",
            style("🎉").green().bold(),
            summary.pages_written,
            summary.bytes_written,
            summary.total_retries
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Commands;
    use clap::Parser;

    fn flash_args(extra: &[&str]) -> FlashArgs {
        let mut argv = vec!["megaload", "flash", "app.hex"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv)
            .unwrap()
            .command
        {
            Commands::Flash(args) => args,
            Commands::Info { .. } => panic!("Expected Flash command"),
        }
    }

    #[test]
    fn test_parse_flash_with_all_options() {
        let args = flash_args(&[
            "-p",
            "/dev/ttyUSB0",
            "-b",
            "19200",
            "-t",
            "5",
            "--page-timeout",
            "2",
            "-s",
            "boot\\n",
            "--field-order",
            "page proc flash boot eeprom",
            "--profile",
            "generic",
            "--debug",
        ]);
        assert_eq!(args.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(args.baud, Some(19200));
        assert_eq!(args.timeout, Some(5));
        assert_eq!(args.page_timeout, Some(2));
        assert_eq!(args.send_reset.as_deref(), Some("boot\\n"));
        assert_eq!(args.field_order, Some(FieldOrder::EVB));
        assert_eq!(args.profile, Some(ProfileArg::Generic));
        assert!(args.debug);
    }

    #[test]
    fn test_parse_rejects_bad_field_order() {
        let result = Cli::try_parse_from([
            "megaload",
            "flash",
            "app.hex",
            "--field-order",
            "proc,flash,boot,page,page",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_defaults() {
        let settings = FlashSettings::resolve(&flash_args(&["-p", "COM3"]), &Config::default()).unwrap();
        assert_eq!(settings.port, "COM3");
        assert_eq!(settings.baud, 38400);
        assert_eq!(settings.stop_bits, StopBits::Two);
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.page_timeout, Duration::from_secs(3));
        assert!(settings.reset.is_empty());
        assert_eq!(settings.field_order, FieldOrder::default());
        assert_eq!(settings.profile, ProfileKind::MegaLoad);
        assert_eq!(settings.max_failures, 3);
        assert!(!settings.trace_wire);
    }

    #[test]
    fn test_resolve_requires_port() {
        let err = FlashSettings::resolve(&flash_args(&[]), &Config::default()).unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));
    }

    #[test]
    fn test_resolve_command_line_beats_config() {
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyS0".to_string());
        config.connection.baud = Some(9600);
        config.device.reset = Some("cfg".to_string());
        config.device.max_failures = Some(5);

        let settings =
            FlashSettings::resolve(&flash_args(&["-b", "57600", "-s", "\\x1b"]), &config).unwrap();
        assert_eq!(settings.port, "/dev/ttyS0");
        assert_eq!(settings.baud, 57600);
        assert_eq!(settings.reset, vec![0x1B]);
        assert_eq!(settings.max_failures, 5);
    }

    #[test]
    fn test_resolve_stop_bits() {
        let mut config = Config::default();
        config.connection.stop_bits = Some(1);
        let settings = FlashSettings::resolve(&flash_args(&["-p", "COM1"]), &config).unwrap();
        assert_eq!(settings.stop_bits, StopBits::One);

        let settings =
            FlashSettings::resolve(&flash_args(&["-p", "COM1", "--stop-bits", "2"]), &config).unwrap();
        assert_eq!(settings.stop_bits, StopBits::Two);

        config.connection.stop_bits = Some(3);
        assert!(FlashSettings::resolve(&flash_args(&["-p", "COM1"]), &config).is_err());
        assert!(Cli::try_parse_from(["megaload", "flash", "app.hex", "--stop-bits", "3"]).is_err());
    }

    #[test]
    fn test_resolve_workaround_evb() {
        let mut config = Config::default();
        config.device.field_order = Some("proc,flash,boot,page,eeprom".to_string());

        let settings =
            FlashSettings::resolve(&flash_args(&["-p", "COM1", "--workaround-evb"]), &config).unwrap();
        assert_eq!(settings.field_order, FieldOrder::EVB);
    }

    #[test]
    fn test_resolve_config_values() {
        let mut config = Config::default();
        config.device.field_order = Some("page,proc,flash,boot,eeprom".to_string());
        config.device.profile = Some("generic".to_string());
        config.device.reset = Some("go\\r".to_string());

        let settings = FlashSettings::resolve(&flash_args(&["-p", "COM1"]), &config).unwrap();
        assert_eq!(settings.field_order, FieldOrder::EVB);
        assert_eq!(settings.profile, ProfileKind::Generic);
        assert_eq!(settings.reset, b"go\r".to_vec());
    }

    #[test]
    fn test_resolve_bad_config_values() {
        let mut config = Config::default();
        config.device.field_order = Some("proc,flash".to_string());
        assert!(FlashSettings::resolve(&flash_args(&["-p", "COM1"]), &config).is_err());

        let mut config = Config::default();
        config.device.profile = Some("stk500".to_string());
        assert!(FlashSettings::resolve(&flash_args(&["-p", "COM1"]), &config).is_err());
    }

    #[test]
    fn test_resolve_bad_reset_string() {
        let err = FlashSettings::resolve(&flash_args(&["-p", "COM1", "-s", "\\x4"]), &Config::default())
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("reset")
        );
    }

    #[test]
    fn test_console_reporter_quiet_is_silent() {
        let mut reporter = ConsoleReporter::new(true);
        reporter.report(&Event::UploadStarted {
            total_pages: 2,
            page_size: 128,
        });
        reporter.report(&Event::PageWritten {
            index: 1,
            total: 2,
            page: 4,
            retries: 0,
        });
        assert!(
            reporter
                .pb
                .is_hidden()
        );
    }
}
