// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, RepoCommands};

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = commands::load_config(cli.config.as_deref(), cli.db_path)?;

    match cli.command {
        Commands::Init => commands::cmd_init(&config),
        Commands::Repo(command) => match command {
            RepoCommands::Add {
                address,
                fingerprint,
                disabled,
            } => commands::cmd_repo_add(&config, &address, fingerprint.as_deref(), disabled),
            RepoCommands::List => commands::cmd_repo_list(&config),
            RepoCommands::Enable { id } => commands::cmd_repo_enable(&config, id),
            RepoCommands::Disable { id } => commands::cmd_repo_disable(&config, id),
            RepoCommands::Remove { id } => commands::cmd_repo_remove(&config, id),
            RepoCommands::ResetFingerprint { id } => {
                commands::cmd_repo_reset_fingerprint(&config, id)
            }
        },
        Commands::Update {
            id,
            unstable,
            quiet,
        } => {
            config.unstable |= unstable;
            commands::cmd_update(config, id, quiet)
        }
        Commands::Cleanup => commands::cmd_cleanup(config),
        Commands::Search { query, limit } => commands::cmd_search(&config, &query, limit),
    }
}
