//! Quire CLI - notes from the command line, synced in the background
//!
//! Note edits are recorded locally and queued; `quire sync` pushes them.

mod app;
mod cli;
mod commands;
mod error;


use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::cli::{Cli, Commands};
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "quire=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Completions { shell, output }) => {
            commands::completions::run_completions(shell, output.as_deref())
        }
        Some(Commands::Note { command }) => {
            let app = App::load(cli.config, cli.db_path)?;
            commands::run_note(command, &app).await
        }
        Some(Commands::Auth { command }) => {
            let app = App::load(cli.config, cli.db_path)?;
            commands::auth_cmd::run_auth(command, &app).await
        }
        Some(Commands::Sync { command }) => {
            let app = App::load(cli.config, cli.db_path)?;
            commands::sync::run_sync(command, &app).await
        }
        None => {
            // Quick capture mode: quire "my thought"
            if cli.note.is_empty() {
                Cli::command().print_help()?;
                println!();
                Ok(())
            } else {
                let app = App::load(cli.config, cli.db_path)?;
                commands::add::run_add(None, &cli.note, &app).await
            }
        }
    }
}
