//! megaload CLI - Command-line tool for flashing AVR chips through MegaLoad
//! serial bootloaders.
//!
//! ## Features
//!
//! - Flash Intel HEX images page by page with retries
//! - MegaLoad 3/4/5 auto-detection
//! - Configurable procinfo field order (EvB 5.1 workaround included)
//! - Inspect HEX files without hardware
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use log::{LevelFilter, debug};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod escape;

use commands::flash::FlashArgs;
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if the progress bar and colors should be used.
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Errors caused by how the tool was invoked rather than by the device.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Missing or contradictory options, or a bad config file.
    #[error("{0}")]
    Usage(String),
}

/// megaload - Flash AVR chips through MegaLoad serial bootloaders.
///
/// Environment variables:
///   MEGALOAD_PORT          - Default serial port
///   MEGALOAD_BAUD          - Default baud rate (default: 38400)
///   MEGALOAD_FIELD_ORDER   - Procinfo field order, e.g. "proc,flash,boot,page,eeprom"
#[derive(Parser)]
#[command(name = "megaload")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Flash an Intel HEX file through the bootloader.
    Flash(FlashArgs),

    /// Show information about an Intel HEX file.
    Info {
        /// Path to the Intel HEX file.
        hex: PathBuf,

        /// Page size used to count pages.
        #[arg(long, default_value = "128", value_parser = clap::value_parser!(u32).range(1..))]
        page_size: u32,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // NO_COLOR and TTY detection
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(log_level));
    builder
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        });
    if let Commands::Flash(args) = &cli.command {
        if args.debug {
            builder.filter_module(megaload::protocol::WIRE_TARGET, LevelFilter::Trace);
        }
    }
    builder.init();

    debug!(
        "megaload v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)?
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash(args) => commands::flash::cmd_flash(cli, args, &config),
        Commands::Info {
            hex,
            page_size,
            json,
        } => commands::info::cmd_info(hex, *page_size, *json),
    }
}

/// Map an error to the process exit code: 2 for usage and configuration
/// mistakes, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    let usage = err
        .chain()
        .any(|cause| {
            cause
                .downcast_ref::<CliError>()
                .is_some()
                || cause
                    .downcast_ref::<megaload::Error>()
                    .is_some_and(|e| e.kind() == megaload::ErrorKind::Config)
        });
    if usage { 2 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_info() {
        let cli = Cli::try_parse_from(["megaload", "info", "app.hex"]).unwrap();
        if let Commands::Info {
            hex,
            page_size,
            json,
        } = cli.command
        {
            assert_eq!(hex.to_str().unwrap(), "app.hex");
            assert_eq!(page_size, 128);
            assert!(!json);
        } else {
            panic!("Expected Info command");
        }
    }

    #[test]
    fn test_cli_parse_info_json() {
        let cli =
            Cli::try_parse_from(["megaload", "info", "--json", "--page-size", "64", "app.hex"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Info {
                json: true,
                page_size: 64,
                ..
            }
        ));
    }

    #[test]
    fn test_cli_rejects_zero_page_size() {
        let result = Cli::try_parse_from(["megaload", "info", "--page-size", "0", "app.hex"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "megaload",
            "-vv",
            "--quiet",
            "--config",
            "/tmp/megaload.toml",
            "info",
            "app.hex",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert_eq!(
            cli.config_path
                .as_deref()
                .and_then(|p| p.to_str()),
            Some("/tmp/megaload.toml")
        );
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["megaload"]).is_err());
    }

    #[test]
    fn test_exit_code_usage() {
        let err = anyhow::Error::from(CliError::Usage("no port".into()));
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn test_exit_code_config_error_through_context() {
        let err = Err::<(), _>(megaload::Error::Config("bad".into()))
            .context("loading config")
            .unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn test_exit_code_runtime_errors() {
        let err = anyhow::Error::from(megaload::Error::EmptyImage);
        assert_eq!(exit_code(&err), 1);

        let err = anyhow::Error::from(megaload::Error::PageFailed {
            page: 3,
            address: 0x180,
            attempts: 3,
        });
        assert_eq!(exit_code(&err), 1);

        let err = anyhow::anyhow!("something else");
        assert_eq!(exit_code(&err), 1);
    }
}
