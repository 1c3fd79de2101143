//! `infragraph timers`

use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;

use crate::Context;
use crate::app::App;
use crate::cli::TimersCommand;
use crate::timers::{self, TimerScheduler};
use crate::ui;

pub fn run(ctx: &Context, app: &App, cmd: TimersCommand) -> Result<()> {
    match cmd {
        TimersCommand::List => list(app),
        TimersCommand::Once { name } => once(ctx, app, name.as_deref()),
        TimersCommand::Run => run_forever(app),
    }
}

fn list(app: &App) -> Result<()> {
    ui::header("Timers");
    for timer in app.registry.timers() {
        ui::kv(&timer.name, &format!("every {}s", timer.interval.as_secs()));
    }
    if app.registry.timers().is_empty() {
        ui::dim("No timers declared");
    }
    Ok(())
}

fn once(ctx: &Context, app: &App, name: Option<&str>) -> Result<()> {
    let selected: Vec<_> = app
        .registry
        .timers()
        .iter()
        .filter(|t| name.is_none_or(|n| t.name == n))
        .cloned()
        .collect();
    if let Some(name) = name
        && selected.is_empty()
    {
        anyhow::bail!("No timer named '{name}'");
    }

    let reports = timers::run_once(&selected, &app.engine, app.alerts.as_ref());
    let mut failed = 0;
    for report in &reports {
        match &report.outcome {
            Ok(message) => ui::success(&format!("{}: {message}", report.name)),
            Err(error) => {
                failed += 1;
                ui::error(&format!("{}: {error}", report.name));
            }
        }
        if ctx.verbose > 0 {
            ui::dim(&format!("took {:.2?}", report.elapsed));
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} timer(s) failed");
    }
    Ok(())
}

fn run_forever(app: &App) -> Result<()> {
    let timers = app.registry.timers();
    if timers.is_empty() {
        ui::warn("No timers declared");
        return Ok(());
    }

    let scheduler = TimerScheduler::start(timers, Arc::clone(&app.engine), Arc::clone(&app.alerts))?;
    ui::info(&format!(
        "Running {} timer(s); {} to stop",
        scheduler.len(),
        "Ctrl-C".bold()
    ));
    scheduler.wait();
    Ok(())
}
