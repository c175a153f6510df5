// Rich terminal output for fanout

use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

use super::errors::suggest_fix;
use crate::executor::{Completion, Outcome};

/// Notice printed for every host abandoned at its deadline
pub const TIMEOUT_NOTICE: &str = "Timeout exceeded. Task abandoned.";

/// Terminal output manager
pub struct TerminalOutput {
    progress: ProgressBar,
    verbose: bool,
    quiet: bool,
    is_tty: bool,
}

impl TerminalOutput {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        let is_tty = std::io::stdout().is_terminal();

        // https://no-color.org/
        if std::env::var("NO_COLOR").is_ok() || !is_tty {
            colored::control::set_override(false);
        }

        TerminalOutput {
            progress: ProgressBar::hidden(),
            verbose,
            quiet,
            is_tty,
        }
    }

    /// Print the run header and start the progress bar
    pub fn print_dispatch_header(&mut self, command: &str, hosts: usize, capacity: usize, out_dir: &Path) {
        if self.quiet {
            return;
        }

        println!();
        println!(
            "{} {} ({} hosts, {} at a time)",
            "RUN".green().bold(),
            command.cyan(),
            hosts,
            capacity
        );
        println!("Output is written to {}", out_dir.display().to_string().white().bold());
        println!("{}", "─".repeat(60).dimmed());

        if self.is_tty {
            let pb = ProgressBar::new(hosts as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} hosts {msg}")
            {
                pb.set_style(style.progress_chars("=> "));
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            self.progress = pb;
        }
    }

    /// Print one host's outcome
    pub fn print_completion(&self, completion: &Completion) {
        let host = completion.item.as_str();
        self.progress.inc(1);

        match &completion.outcome {
            Outcome::Success { text } => {
                if self.quiet {
                    return;
                }
                self.progress.suspend(|| {
                    println!(
                        "  {} {} {} {}",
                        "OK".green(),
                        "=>".dimmed(),
                        host.white().bold(),
                        format!("({:.2}s)", completion.elapsed.as_secs_f64()).dimmed()
                    );
                    if self.verbose {
                        for line in text.lines() {
                            println!("      {}", line.dimmed());
                        }
                    }
                });
            }
            Outcome::ConnectionFailure { message, .. } => {
                self.progress.suspend(|| {
                    println!(
                        "  {} {} {}",
                        "FAILED".red().bold(),
                        "=>".dimmed(),
                        host.white().bold()
                    );
                    println!("      {}", message);
                    if let Some(hint) = suggest_fix(message) {
                        println!("      {}: {}", "Hint".yellow().bold(), hint);
                    }
                });
            }
            Outcome::Timeout { .. } => {
                // Always shown, even in quiet mode
                self.progress.suspend(|| {
                    println!(
                        "  {} {} {}: {}",
                        "TIMEOUT".yellow().bold(),
                        "=>".dimmed(),
                        host.white().bold(),
                        TIMEOUT_NOTICE
                    );
                });
            }
        }
    }

    /// Print the run recap summary
    pub fn print_recap(&self, recap: &RunRecap) {
        self.progress.finish_and_clear();

        if self.quiet {
            return;
        }

        println!();
        println!("{}", "RECAP".green().bold());
        println!("{}", "─".repeat(60).dimmed());

        let failed = if recap.failed > 0 {
            format!("failed={}", recap.failed).red().bold()
        } else {
            format!("failed={}", recap.failed).normal()
        };
        let timed_out = if recap.timed_out > 0 {
            format!("timeout={}", recap.timed_out).yellow().bold()
        } else {
            format!("timeout={}", recap.timed_out).normal()
        };

        println!(
            "{}    {}    {}",
            format!("ok={}", recap.ok).green(),
            failed,
            timed_out
        );

        println!();
        println!("Total time: {:.2}s", recap.total_duration.as_secs_f64());
    }
}

/// Per-run tally of host outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRecap {
    pub ok: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub total_duration: Duration,
}

impl RunRecap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Success { .. } => self.ok += 1,
            Outcome::ConnectionFailure { .. } => self.failed += 1,
            Outcome::Timeout { .. } => self.timed_out += 1,
        }
    }

    pub fn hosts(&self) -> usize {
        self.ok + self.failed + self.timed_out
    }
}
