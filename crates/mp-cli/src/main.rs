mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mp_core::config::settings::DEFAULT_SETTINGS_PATH;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::commands::{Command, Outcome};

/// Administer the panel's credential settings and inspect stored secrets.
#[derive(Debug, Parser)]
#[command(name = "mpctl", version)]
struct Cli {
    /// Settings file holding SECRET_KEY and PASSWORD_SCHEME
    #[arg(short, long, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

fn main() -> ExitCode {
    // Diagnostics go to stderr so command output stays pipeable.
    // RUST_LOG controls verbosity, defaulting to warn.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();

    match commands::run(&cli.config, cli.command, &mut stdout) {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::Mismatch) => ExitCode::from(1),
        Err(e) => {
            error!("mpctl failed: {:#}", e);
            ExitCode::from(2)
        }
    }
}
