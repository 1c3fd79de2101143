//! Progress indicators for the infragraph CLI.

use crate::ui;
use colored::Colorize;
use declarative::{ContainerOutcome, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner with a message, ticking on its own
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_success(pb: &ProgressBar, msg: &str) {
    pb.finish_and_clear();
    ui::success(msg);
}

pub fn finish_error(pb: &ProgressBar, msg: &str) {
    pb.finish_and_clear();
    ui::error(msg);
}

/// Progress bar over the containers of a reconciliation pass.
pub struct ReconcileProgress {
    bar: ProgressBar,
    quiet: bool,
}

impl ReconcileProgress {
    pub fn new(total: usize, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar, quiet }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn line(&self, text: String) {
        if !self.quiet {
            self.bar.suspend(|| println!("{text}"));
        }
    }
}

impl ProgressCallback for ReconcileProgress {
    fn on_prune_start(&mut self, count: usize) {
        self.bar.set_message(format!("pruning {count} container(s)"));
    }

    fn on_level_start(&mut self, level: usize, names: &[String]) {
        self.bar
            .set_message(format!("level {}: {}", level + 1, ui::truncate_end(&ui::names(names), 40)));
    }

    fn on_container_complete(&mut self, name: &str, outcome: &ContainerOutcome) {
        self.bar.inc(1);
        match outcome {
            ContainerOutcome::Unchanged => {}
            ContainerOutcome::Started { rebuilt: true } => {
                self.line(format!("  {} {name} (rebuilt)", "✓".green()));
            }
            ContainerOutcome::Started { rebuilt: false } => {
                self.line(format!("  {} {name}", "✓".green()));
            }
            ContainerOutcome::Skipped { reason } => {
                self.line(format!("  {} {name}: {reason}", "⚠".yellow()));
            }
            ContainerOutcome::Failed(error) => {
                self.line(format!("  {} {error}", "✗".red()));
            }
        }
    }

    fn on_level_complete(&mut self) {
        self.bar.set_message(String::new());
    }
}
