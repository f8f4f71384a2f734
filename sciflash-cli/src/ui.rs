//! Terminal front-end for running sessions.

use crate::use_fancy_output;
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use sciflash::session::{Direction, Progress, Region};
use sciflash::{Operator, SessionObserver};

/// Prints the status stream and drives a progress bar.
pub(crate) struct ConsoleObserver {
    quiet: bool,
    bar: Option<(Region, Direction, ProgressBar)>,
    key_cycle: bool,
}

impl ConsoleObserver {
    pub(crate) fn new(quiet: bool) -> Self {
        Self {
            quiet,
            bar: None,
            key_cycle: false,
        }
    }

    /// Whether the session asked for a key cycle.
    pub(crate) fn key_cycle_requested(&self) -> bool {
        self.key_cycle
    }

    /// Tear down the progress bar, if any.
    pub(crate) fn finish(&mut self) {
        if let Some((_, _, bar)) = self.bar.take() {
            bar.abandon();
        }
    }

    fn print(&self, line: &str) {
        match &self.bar {
            Some((_, _, bar)) => bar.suspend(|| eprintln!("{line}")),
            None => eprintln!("{line}"),
        }
    }

    fn new_bar(progress: &Progress) -> ProgressBar {
        let bar = ProgressBar::new(u64::from(progress.total));
        #[allow(clippy::unwrap_used)] // Static template string
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        bar.set_draw_target(ProgressDrawTarget::stderr());
        let verb = match progress.direction {
            Direction::Read => "Reading",
            Direction::Write => "Writing",
        };
        bar.set_message(format!("{verb} {}", progress.region));
        bar
    }
}

impl SessionObserver for ConsoleObserver {
    fn status(&mut self, line: &str) {
        if !self.quiet {
            self.print(line);
        }
    }

    fn progress(&mut self, progress: &Progress) {
        if self.quiet || !use_fancy_output() {
            return;
        }

        let same = self
            .bar
            .as_ref()
            .is_some_and(|(region, direction, _)| {
                *region == progress.region && *direction == progress.direction
            });
        if !same {
            self.finish();
            self.bar = Some((progress.region, progress.direction, Self::new_bar(progress)));
        }

        if let Some((_, _, bar)) = &self.bar {
            bar.set_position(u64::from(progress.done));
            if progress.done >= progress.total {
                bar.finish();
            }
        }
    }

    fn key_cycle_required(&mut self) {
        self.key_cycle = true;
        self.print(&format!(
            "{} {}",
            style("⚠").yellow().bold(),
            style("Cycle the ignition key before starting the engine.").yellow()
        ));
    }
}

/// Asks the operator through terminal prompts.
pub(crate) struct PromptOperator {
    quiet: bool,
}

impl PromptOperator {
    pub(crate) fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Operator for PromptOperator {
    fn confirm(&mut self, prompt: &str) -> bool {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("{prompt} Continue?"))
            .default(true)
            .interact_opt()
            .ok()
            .flatten()
            .unwrap_or(false)
    }

    fn status(&mut self, line: &str) {
        if !self.quiet {
            eprintln!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(region: Region, direction: Direction, done: u32, total: u32) -> Progress {
        Progress {
            region,
            direction,
            done,
            total,
        }
    }

    #[test]
    fn test_quiet_observer_records_key_cycle() {
        let mut observer = ConsoleObserver::new(true);
        observer.status("Battery voltage: 12.000 V");
        observer.progress(&progress(Region::Eeprom, Direction::Read, 512, 512));
        assert!(observer.bar.is_none());
        assert!(!observer.key_cycle_requested());

        observer.key_cycle_required();
        assert!(observer.key_cycle_requested());
    }

    #[test]
    fn test_new_bar_tracks_total() {
        let bar = ConsoleObserver::new_bar(&progress(Region::Flash, Direction::Write, 0, 262_144));
        assert_eq!(bar.length(), Some(262_144));
        assert_eq!(bar.message(), "Writing flash");
    }
}
