// src/cli/repo.rs
//! Repository management commands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum RepoCommands {
    /// Add a repository
    Add {
        /// Repository address (URL of the directory holding the index)
        address: String,

        /// Signer fingerprint to pin up front (uppercase hex SHA-256)
        #[arg(long)]
        fingerprint: Option<String>,

        /// Add repository in disabled state
        #[arg(long)]
        disabled: bool,
    },

    /// List configured repositories
    List,

    /// Enable a repository
    Enable {
        /// Repository ID
        id: i64,
    },

    /// Disable a repository
    Disable {
        /// Repository ID
        id: i64,
    },

    /// Remove a repository; its catalog is dropped on the next cleanup
    Remove {
        /// Repository ID
        id: i64,
    },

    /// Forget the pinned signer so the next update pins a new one
    ResetFingerprint {
        /// Repository ID
        id: i64,
    },
}
