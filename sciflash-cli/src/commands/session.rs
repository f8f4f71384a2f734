//! Bootstrap, read, write and detect command implementations.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use log::debug;
use sciflash::port::{DEFAULT_BAUD, NativePort, Port, READ_POLL_TIMEOUT};
use sciflash::runner::bootstrap::BOOTSTRAP_TIMEOUT;
use sciflash::runner::{LinkReader, spawn_link_reader};
use sciflash::session::Timing;
use sciflash::{
    BootstrapOutcome, Bootloader, EcuState, EepromImage, FlashImage, LinkTransport, Operation,
    Outcome, SerialConfig, Session, SessionConfig, SessionReport, SessionRunner,
};
use std::path::Path;

use crate::config::Config;
use crate::serial::map_prompt_error;
use crate::ui::{ConsoleObserver, PromptOperator};
use crate::{Cli, CliError, TargetArgs, get_port, was_interrupted};

/// Options for `write-flash`.
pub(crate) struct WriteFlashOptions {
    pub(crate) backup_flash: bool,
    pub(crate) backup_eeprom: bool,
    pub(crate) yes: bool,
}

type PortRunner = SessionRunner<LinkTransport<Box<dyn Port>>>;

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted.".to_string()).into())
    } else {
        Ok(())
    }
}

fn resolve_bootloader(target: &TargetArgs, config: &Config) -> Result<Bootloader> {
    if let Some(bootloader) = target.bootloader {
        return Ok(bootloader);
    }
    config.bootloader()?.ok_or_else(|| {
        CliError::Usage(
            "No bootloader selected; pass --bootloader or set `bootloader` in [session]."
                .to_string(),
        )
        .into()
    })
}

/// Build the session configuration from flags and config file.
fn session_config(
    operation: Operation,
    target: &TargetArgs,
    config: &Config,
) -> Result<SessionConfig> {
    let bootloader = resolve_bootloader(target, config)?;
    let chip = match target.chip {
        Some(chip) => Some(chip),
        None => config.flash_chip()?,
    };

    let mut session = SessionConfig::new(operation, bootloader)
        .with_flash_chip(chip)
        .with_timing(config.timing.apply(Timing::default()));
    if let Some(dir) = &config.session.backup_dir {
        session = session.with_backup_dir(dir);
    }
    session = session.with_backups(
        config.session.backup_flash.unwrap_or(true),
        config.session.backup_eeprom.unwrap_or(true),
    );
    Ok(session)
}

/// Open the scanner port and start the link reader.
fn connect(cli: &Cli, config: &mut Config, timing: Timing) -> Result<(PortRunner, LinkReader)> {
    let port_name = get_port(cli, config)?;
    let baud = cli
        .baud
        .or(config.port.connection.baud)
        .unwrap_or(DEFAULT_BAUD);
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port_name).cyan(),
            baud
        );
    }

    let reader_port = NativePort::open(
        &SerialConfig::new(port_name.as_str(), baud).with_timeout(READ_POLL_TIMEOUT),
    )
    .with_context(|| format!("Failed to open serial port {port_name}"))?;
    let mut writer_port = reader_port.try_clone_port()?;
    writer_port.set_timeout(timing.transmit)?;
    writer_port.clear_buffers()?;

    let runner = SessionRunner::new(LinkTransport::new(writer_port));
    let reader = spawn_link_reader(reader_port, runner.sender());
    debug!("Link reader started on {port_name}");
    Ok((runner, reader))
}

/// Run one session and turn its outcome into a CLI result.
fn run_session(
    cli: &Cli,
    config: &mut Config,
    session_config: SessionConfig,
) -> Result<SessionReport> {
    let session = Session::new(session_config)?;
    ensure_not_interrupted()?;

    let (mut runner, reader) = connect(cli, config, session.config().timing)?;
    let mut observer = ConsoleObserver::new(cli.quiet);
    let report = runner.run(session, &mut observer);
    observer.finish();
    reader.stop();
    if observer.key_cycle_requested() {
        debug!("Session ended with a key cycle request");
    }

    let report = report?;
    conclude(&report.outcome)?;
    Ok(report)
}

fn conclude(outcome: &Outcome) -> Result<()> {
    let indeterminate = |ecu: EcuState| {
        if ecu == EcuState::Indeterminate {
            eprintln!(
                "{} {}",
                style("⚠").yellow().bold(),
                style("ECU memory may be partially written. Do not turn the key off; retry the write.")
                    .yellow()
            );
        }
    };

    match outcome {
        Outcome::Success(task) => {
            debug!("Session finished at {task:?}");
            Ok(())
        },
        Outcome::Cancelled { ecu } => {
            indeterminate(*ecu);
            Err(CliError::Cancelled("Current task is cancelled.".to_string()).into())
        },
        Outcome::Aborted { reason, ecu } => {
            indeterminate(*ecu);
            Err(anyhow::anyhow!("{reason}"))
        },
    }
}

fn confirm_destructive(cli: &Cli, yes: bool, prompt: &str) -> Result<()> {
    if yes {
        return Ok(());
    }
    if cli.non_interactive {
        return Err(CliError::Usage(
            "Refusing to write without --yes in non-interactive mode.".to_string(),
        )
        .into());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);
    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled("Write cancelled.".to_string()).into())
    }
}

fn done(cli: &Cli, message: &str) {
    if !cli.quiet {
        eprintln!("\n{} {message}", style("✓").green().bold());
    }
}

/// Bootstrap command implementation.
pub(crate) fn cmd_bootstrap(cli: &Cli, config: &mut Config, target: &TargetArgs) -> Result<()> {
    if cli.non_interactive {
        return Err(CliError::Usage(
            "Bootstrapping needs operator confirmation; run without --non-interactive.".to_string(),
        )
        .into());
    }
    let bootloader = resolve_bootloader(target, config)?;
    let chip = match target.chip {
        Some(chip) => Some(chip),
        None => config.flash_chip()?,
    };
    let timing = config.timing.apply(Timing::default());

    let (mut runner, reader) = connect(cli, config, timing)?;
    let mut operator = PromptOperator::new(cli.quiet);
    let outcome = runner.bootstrap(bootloader, chip, BOOTSTRAP_TIMEOUT, &mut operator);
    reader.stop();

    match outcome? {
        BootstrapOutcome::Ready => {
            done(cli, &format!("ECU is in bootstrap mode ({bootloader})"));
            Ok(())
        },
        BootstrapOutcome::Cancelled => {
            Err(CliError::Cancelled("ECU bootstrapping is cancelled.".to_string()).into())
        },
        BootstrapOutcome::Failed(status) => Err(anyhow::anyhow!("Bootstrap failed: {status}")),
    }
}

/// Read flash command implementation.
pub(crate) fn cmd_read_flash(
    cli: &Cli,
    config: &mut Config,
    target: &TargetArgs,
    output: &Path,
) -> Result<()> {
    let session = session_config(Operation::ReadFlash, target, config)?.with_output(output);
    run_session(cli, config, session)?;
    done(cli, &format!("Flash memory saved to {}", output.display()));
    Ok(())
}

/// Write flash command implementation.
pub(crate) fn cmd_write_flash(
    cli: &Cli,
    config: &mut Config,
    target: &TargetArgs,
    image_path: &Path,
    options: WriteFlashOptions,
) -> Result<()> {
    let image = FlashImage::from_file(image_path)
        .with_context(|| format!("Failed to load flash image {}", image_path.display()))?;
    let mut session = session_config(Operation::WriteFlash, target, config)?.with_flash_image(image);
    let backup_flash = session.backup_flash && options.backup_flash;
    let backup_eeprom = session.backup_eeprom && options.backup_eeprom;
    session = session.with_backups(backup_flash, backup_eeprom);

    confirm_destructive(
        cli,
        options.yes,
        &format!(
            "Write {} to the ECU flash memory?",
            image_path.display()
        ),
    )?;

    let report = run_session(cli, config, session)?;
    if let Some(chip) = report.flash_chip {
        debug!("Flash chip: {chip}");
    }
    done(cli, "Flash memory written");
    Ok(())
}

/// Read EEPROM command implementation.
pub(crate) fn cmd_read_eeprom(
    cli: &Cli,
    config: &mut Config,
    target: &TargetArgs,
    output: &Path,
) -> Result<()> {
    let session = session_config(Operation::ReadEeprom, target, config)?.with_output(output);
    run_session(cli, config, session)?;
    done(cli, &format!("EEPROM saved to {}", output.display()));
    Ok(())
}

/// Write EEPROM command implementation.
pub(crate) fn cmd_write_eeprom(
    cli: &Cli,
    config: &mut Config,
    target: &TargetArgs,
    image_path: &Path,
    yes: bool,
) -> Result<()> {
    let image = EepromImage::from_file(image_path)
        .with_context(|| format!("Failed to load EEPROM image {}", image_path.display()))?;
    let session = session_config(Operation::WriteEeprom, target, config)?.with_eeprom_image(image);

    confirm_destructive(
        cli,
        yes,
        &format!("Write {} to the ECU EEPROM?", image_path.display()),
    )?;

    run_session(cli, config, session)?;
    done(cli, "EEPROM written");
    Ok(())
}

/// Detect chip command implementation.
pub(crate) fn cmd_detect_chip(cli: &Cli, config: &mut Config, target: &TargetArgs) -> Result<()> {
    let session = session_config(Operation::IdentifyFlashChip, target, config)?;
    let report = run_session(cli, config, session)?;

    match report.flash_chip {
        Some(chip) => {
            println!("{chip}");
            Ok(())
        },
        None => Err(anyhow::anyhow!("Flash memory type could not be determined")),
    }
}
