//! Command line definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Download, install and pick offline speech recognition models.
#[derive(Parser, Debug)]
#[command(name = "vosk-models", author, version)]
pub struct Cli {
    /// Directory holding installed models (overrides VOSK_MODELS_ROOT)
    #[arg(long, global = true)]
    pub models_root: Option<PathBuf>,

    /// Base URL of the model catalog (overrides VOSK_CATALOG_URL)
    #[arg(long, global = true)]
    pub catalog_url: Option<String>,

    /// Skip MD5 verification of downloaded archives
    #[arg(long, global = true)]
    pub no_verify: bool,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List models offered by the catalog
    List {
        /// Include every tier and obsolete models
        #[arg(long)]
        all: bool,
    },

    /// List models installed on this machine
    Installed,

    /// Download and install a model
    Install { name: String },

    /// Make a model active, downloading it first if needed
    Select { name: String },

    /// Delete an installed model
    Remove { name: String },

    /// Show the active model and any pending download
    Status,

    /// Forget a pending download and delete its partial archive
    Cancel,

    /// Restart a download interrupted by a crash or network loss
    Recover,

    /// Wait for connectivity and finish a pending download
    Watch {
        /// Seconds between reachability probes
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
}
