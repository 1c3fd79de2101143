mod app;
mod cli;
mod commands;
mod config;
mod hooks;
mod messaging;
mod paths;
mod plugin;
mod progress;
mod runner;
mod timers;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    // Completions need neither config nor store
    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "infragraph", &mut io::stdout());
        return Ok(());
    }

    let config = config::InfragraphConfig::load(cli.config.as_deref())?;
    let app = app::App::open(config, cli.simulate)?;

    match cli.command {
        Command::Reconcile(args) => commands::reconcile::run(&ctx, &app, args),
        Command::Timers(cmd) => commands::timers::run(&ctx, &app, cmd),
        Command::Resources(cmd) => commands::resources::run(&app, cmd),
        Command::UnixId(cmd) => commands::unix_id::run(&app, cmd),
        Command::Status => commands::status::run(&ctx, &app),
        Command::Completions { .. } => Ok(()),
    }
}
