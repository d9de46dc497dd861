// src/cli/mod.rs
//! CLI definitions for catalog-sync
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod repo;

pub use repo::RepoCommands;

#[derive(Parser)]
#[command(name = "catalog-sync")]
#[command(version)]
#[command(about = "Keep a local copy of signed software catalogs up to date", long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the database file (overrides the configuration)
    #[arg(short, long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the catalog database
    Init,

    /// Repository management
    #[command(subcommand)]
    Repo(RepoCommands),

    /// Update repository catalogs
    Update {
        /// Repository ID (default: all enabled repositories)
        id: Option<i64>,

        /// Select releases newer than the publisher's suggested version
        #[arg(long)]
        unstable: bool,

        /// Log progress instead of drawing progress bars
        #[arg(short, long)]
        quiet: bool,
    },

    /// Remove catalogs of disabled and deleted repositories
    Cleanup,

    /// Search committed catalogs
    Search {
        /// Text to look for in package names, names and summaries
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}
