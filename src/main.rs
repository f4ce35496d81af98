//! Binary entry point: thin wiring around [`taskbridge::cli`].

use clap::Parser;
use std::process::ExitCode;
use taskbridge::cli::{App, Cli};
use taskbridge::command::RealCommandRunner;
use taskbridge::config::SyncSettings;
use taskbridge::sync::{CancelToken, SyncStateStore};
use taskbridge::Result;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(err) = ctrlc::set_handler(move || cancel.cancel()) {
            tracing::warn!(%err, "could not install interrupt handler");
        }
    }

    match run(cli, &cancel) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, cancel: &CancelToken) -> Result<String> {
    let settings = SyncSettings::load_or_default()?;
    let runner = RealCommandRunner::new();
    let state_store = SyncStateStore::at_default_location()?;
    let app = App { settings, runner: &runner, state_store };
    app.execute(cli.command, cancel)
}
