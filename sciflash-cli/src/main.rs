//! sciflash CLI - reprogram SBEC3/JTEC engine controllers through a scanner.
//!
//! ## Features
//!
//! - Put the ECU into bootstrap mode
//! - Read and write flash memory and EEPROM
//! - Identify the flash chip
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use sciflash::{Bootloader, FlashChip};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;
mod ui;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad arguments or an unusable setup (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Bad configuration (exit 3).
    #[error("{0}")]
    Config(String),
    /// No scanner found (exit 4).
    #[error("{0}")]
    DeviceNotFound(String),
    /// Stopped by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => 2,
                CliError::Config(_) => 3,
                CliError::DeviceNotFound(_) => 4,
                CliError::Cancelled(_) => 130,
            };
        }
        if let Some(lib_err) = cause.downcast_ref::<sciflash::Error>() {
            return match lib_err {
                sciflash::Error::Config(_) => 3,
                sciflash::Error::DeviceNotFound => 4,
                _ => 1,
            };
        }
    }
    1
}

/// sciflash - reprogram SBEC3/JTEC engine controllers in bootstrap mode.
///
/// Environment variables:
///   SCIFLASH_PORT              - Default serial port
///   SCIFLASH_BAUD              - Scanner baud rate (default: 250000)
///   SCIFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "sciflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "SCIFLASH_PORT")]
    port: Option<String>,

    /// Scanner baud rate.
    #[arg(short, long, global = true, env = "SCIFLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "SCIFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Controller selection shared by the session commands.
#[derive(Args, Debug, Clone, Default)]
struct TargetArgs {
    /// Bootloader variant (e.g. sbec3, sbec3a, jtec). See `sciflash chips`.
    #[arg(long, value_parser = parse_bootloader)]
    bootloader: Option<Bootloader>,

    /// Flash chip name or index (e.g. N28F020). See `sciflash chips`.
    #[arg(long, value_parser = parse_chip)]
    chip: Option<FlashChip>,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Put the ECU into bootstrap mode.
    Bootstrap {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Read the flash memory to a file.
    ReadFlash {
        /// Destination file.
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Write a flash image.
    WriteFlash {
        /// Flash image (128 or 256 KiB).
        image: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Do not back up the flash memory first.
        #[arg(long)]
        no_backup_flash: bool,

        /// Do not back up the EEPROM first.
        #[arg(long)]
        no_backup_eeprom: bool,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Read the EEPROM to a file.
    ReadEeprom {
        /// Destination file.
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Write an EEPROM image.
    WriteEeprom {
        /// EEPROM image (512 bytes).
        image: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Identify the flash memory chip.
    DetectChip {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// List supported bootloaders and flash chips.
    Chips {
        /// Output the catalogs as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show information about an image file.
    Info {
        /// Flash or EEPROM image.
        image: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
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

fn parse_bootloader(s: &str) -> Result<Bootloader, String> {
    match Bootloader::from_name(s) {
        Some(Bootloader::Empty) | None => Err(format!(
            "unknown bootloader '{s}' (expected one of: {})",
            Bootloader::ALL
                .iter()
                .map(|b| b.short_name())
                .collect::<Vec<_>>()
                .join(", ")
        )),
        Some(bootloader) => Ok(bootloader),
    }
}

fn parse_chip(s: &str) -> Result<FlashChip, String> {
    FlashChip::from_name(s).ok_or_else(|| {
        format!(
            "unknown flash chip '{s}' (expected one of: {})",
            FlashChip::ALL
                .iter()
                .map(|c| c.name())
                .collect::<Vec<_>>()
                .join(", ")
        )
    })
}

fn main() {
    let code = match run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            exit_code(&err)
        },
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "sciflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Ctrl-C handler not installed: {e}");
    }
    sciflash::set_interrupt_checker(was_interrupted);

    let mut config = match &cli.config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };

    match &cli.command {
        Commands::Bootstrap { target } => commands::session::cmd_bootstrap(&cli, &mut config, target),
        Commands::ReadFlash { output, target } => {
            commands::session::cmd_read_flash(&cli, &mut config, target, output)
        },
        Commands::WriteFlash {
            image,
            target,
            no_backup_flash,
            no_backup_eeprom,
            yes,
        } => commands::session::cmd_write_flash(
            &cli,
            &mut config,
            target,
            image,
            commands::session::WriteFlashOptions {
                backup_flash: !*no_backup_flash,
                backup_eeprom: !*no_backup_eeprom,
                yes: *yes,
            },
        ),
        Commands::ReadEeprom { output, target } => {
            commands::session::cmd_read_eeprom(&cli, &mut config, target, output)
        },
        Commands::WriteEeprom { image, target, yes } => {
            commands::session::cmd_write_eeprom(&cli, &mut config, target, image, *yes)
        },
        Commands::DetectChip { target } => {
            commands::session::cmd_detect_chip(&cli, &mut config, target)
        },
        Commands::Chips { json } => commands::info::cmd_chips(*json),
        Commands::Info { image, json } => commands::info::cmd_info(image, *json),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: sciflash completions bash \
                         (or use `sciflash completions --install`)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

/// Get serial port from CLI args or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    // Ask to remember if not a known device and interactive mode
    if !selected.is_known && !cli.non_interactive && cli.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_read_flash() {
        let cli = Cli::try_parse_from([
            "sciflash",
            "read-flash",
            "-o",
            "dump.bin",
            "--bootloader",
            "sbec3a",
            "--chip",
            "N28F020",
        ])
        .unwrap();
        match cli.command {
            Commands::ReadFlash { output, target } => {
                assert_eq!(output, PathBuf::from("dump.bin"));
                assert_eq!(target.bootloader, Some(Bootloader::Sbec3a));
                assert_eq!(target.chip, Some(FlashChip::N28F020));
            },
            _ => panic!("Expected ReadFlash command"),
        }
    }

    #[test]
    fn test_cli_parse_write_flash_options() {
        let cli = Cli::try_parse_from([
            "sciflash",
            "write-flash",
            "new.bin",
            "--no-backup-eeprom",
            "-y",
        ])
        .unwrap();
        match cli.command {
            Commands::WriteFlash {
                image,
                no_backup_flash,
                no_backup_eeprom,
                yes,
                ..
            } => {
                assert_eq!(image, PathBuf::from("new.bin"));
                assert!(!no_backup_flash);
                assert!(no_backup_eeprom);
                assert!(yes);
            },
            _ => panic!("Expected WriteFlash command"),
        }
    }

    #[test]
    fn test_cli_parse_write_eeprom() {
        let cli = Cli::try_parse_from(["sciflash", "write-eeprom", "eep.bin", "--bootloader", "jtec"])
            .unwrap();
        match cli.command {
            Commands::WriteEeprom { target, yes, .. } => {
                assert_eq!(target.bootloader, Some(Bootloader::Jtec));
                assert!(!yes);
            },
            _ => panic!("Expected WriteEeprom command"),
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "sciflash",
            "-p",
            "/dev/ttyACM0",
            "-b",
            "115200",
            "-vv",
            "--non-interactive",
            "detect-chip",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.baud, Some(115_200));
        assert_eq!(cli.verbose, 2);
        assert!(cli.non_interactive);
    }

    #[test]
    fn test_cli_rejects_unknown_bootloader() {
        assert!(Cli::try_parse_from(["sciflash", "bootstrap", "--bootloader", "sbec9"]).is_err());
        assert!(Cli::try_parse_from(["sciflash", "bootstrap", "--bootloader", "empty"]).is_err());
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["sciflash"]).is_err());
    }

    #[test]
    fn test_parse_chip_by_index_and_name() {
        assert_eq!(parse_chip("4"), Ok(FlashChip::N28F020));
        assert_eq!(parse_chip("m28f102"), Ok(FlashChip::M28F102));
        assert!(parse_chip("W25Q64").is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&CliError::Usage("x".into()).into()), 2);
        assert_eq!(exit_code(&CliError::Config("x".into()).into()), 3);
        assert_eq!(exit_code(&CliError::DeviceNotFound("x".into()).into()), 4);
        assert_eq!(exit_code(&CliError::Cancelled("x".into()).into()), 130);
        assert_eq!(exit_code(&sciflash::Error::DeviceNotFound.into()), 4);
        assert_eq!(
            exit_code(&sciflash::Error::Config("x".into()).into()),
            3
        );
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    }

    #[test]
    fn test_exit_code_survives_context() {
        let err = anyhow::Error::from(CliError::Cancelled("x".into())).context("while reading");
        assert_eq!(exit_code(&err), 130);
    }
}
