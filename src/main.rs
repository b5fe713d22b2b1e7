//! nimika - longitudinal term-frequency analytics for toki pona corpora.
//!
//! Reads raw message dumps from many platforms, filters each message to
//! sentences judged in-language, accumulates n-gram frequencies per time
//! bucket in a canonical store, and exports a compact read-optimized
//! analytics database.

mod application;
mod cli;
mod domain;
mod infrastructure;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Actions, Cli};
use infrastructure::config::load_environment;

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    load_environment();

    if let Err(e) = run(&cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

/// Queue actions (from flags or the menu) and execute them on the runtime.
fn run(cli: &Cli) -> domain::Result<()> {
    let actions = match Actions::from_cli(cli)? {
        Some(actions) => actions,
        None => match cli::menu()? {
            Some(actions) => actions,
            None => return Ok(()),
        },
    };

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| domain::AppError::io("failed to start runtime", e))?;
    runtime.block_on(cli::run_actions(actions))
}

/// Setup tracing/logging based on verbosity level.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
