//! # Lineage CLI Module
//!
//! This module implements the CLI interface for Lineage.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show registry metrics
//! - `init` - Initialize a new database
//! - `era` - Era code of a date
//! - `resolve` - Resolve (or allocate) a classification code
//! - `codes` - List the known codes of a dimension
//! - `register` - Register persons from a JSON file
//! - `sync` - Replay registrations queued in the outbox
//! - `show` / `children` / `ancestors` / `descendants` - Lineage lookups
//! - `login` - Check a living person's secret
//! - `catalog` - Browse the geography catalog
//! - `export` / `import` - Registry snapshots
//! - `hash` - BLAKE3 checksum of the registry snapshot

mod commands;

use crate::config::{CliOverrides, FileConfig, Settings};
use clap::{Parser, Subcommand};
use lineage_core::LineageError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Lineage - identity codes and genealogical registry
///
/// Derives era and origin codes, mints `PREFIX SEQ` identifiers and keeps
/// parent/child links between registered persons.
#[derive(Parser, Debug)]
#[command(name = "lineage")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (default: ./lineage.toml when present)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the registry database [default: lineage.db]
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend: "redb" (ACID database) or "file" (snapshot file) [default: redb]
    #[arg(short = 'B', long, global = true)]
    pub backend: Option<String>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to [default: 127.0.0.1]
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to [default: 8080]
        #[arg(short, long)]
        port: Option<u16>,

        /// Queue registrations here while the store is unavailable
        #[arg(long)]
        outbox: Option<PathBuf>,
    },

    /// Show registry status
    Status,

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Compute the era code of a date
    Era {
        /// Date (YYYY-MM-DD, signed year allowed, or a bare year)
        date: Option<String>,

        /// Era kind (generation, decet)
        #[arg(short, long, default_value = "generation")]
        kind: String,

        /// List the first N codes of the kind instead
        #[arg(long)]
        list: Option<u16>,
    },

    /// Resolve a label to its classification code, allocating one if needed
    Resolve {
        /// Dimension (continent, country, region, ethnicity, family)
        dimension: String,

        /// Free-form label
        label: String,
    },

    /// List the known codes of a dimension
    Codes {
        /// Dimension (continent, country, region, ethnicity, family)
        dimension: String,
    },

    /// Register persons from a JSON file (one object or an array)
    Register {
        /// Path to the input file
        #[arg(short, long)]
        file: PathBuf,

        /// Queue registrations here if the store is unavailable
        #[arg(long)]
        outbox: Option<PathBuf>,
    },

    /// Replay registrations queued in the outbox
    Sync {
        /// Outbox file (defaults to [storage] outbox)
        #[arg(long)]
        outbox: Option<PathBuf>,
    },

    /// Show one person
    Show {
        /// Display identifier, e.g. "G96C1P2R1E3F2 4"
        id: String,
    },

    /// List a person's registered children
    Children {
        /// Display identifier
        id: String,
    },

    /// List a person's ancestors
    Ancestors {
        /// Display identifier
        id: String,

        /// Generations to walk
        #[arg(short, long, default_value = "3")]
        depth: usize,
    },

    /// List a person's descendants
    Descendants {
        /// Display identifier
        id: String,

        /// Generations to walk
        #[arg(short, long, default_value = "3")]
        depth: usize,
    },

    /// Check a living person's secret
    Login {
        /// Display identifier
        id: String,

        /// Secret (read from stdin when omitted)
        #[arg(long)]
        secret: Option<String>,
    },

    /// Browse the geography catalog
    Catalog {
        /// Node path such as "C1/P1"; omit for the continents
        path: Option<String>,
    },

    /// Export the registry snapshot
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Export format (snapshot, json)
        #[arg(short = 't', long, default_value = "snapshot")]
        format: String,
    },

    /// Import a registry snapshot
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compute BLAKE3 checksum of the registry snapshot
    Hash,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Resolve settings from flags, environment and the config file.
pub fn settings(cli: &Cli) -> Result<Settings, LineageError> {
    let mut overrides = CliOverrides {
        backend: cli.backend.clone(),
        database: cli.database.clone(),
        ..CliOverrides::default()
    };
    match &cli.command {
        Some(Commands::Server { host, port, outbox }) => {
            overrides.host = host.clone();
            overrides.port = *port;
            overrides.outbox = outbox.clone();
        }
        Some(Commands::Register { outbox, .. } | Commands::Sync { outbox }) => {
            overrides.outbox = outbox.clone();
        }
        _ => {}
    }
    Settings::resolve(overrides, FileConfig::load(cli.config.as_deref())?)
}

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), LineageError> {
    let settings = settings(&cli)?;
    let json_mode = cli.json_mode;
    if cli.verbose {
        tracing::info!(
            ?settings.backend,
            database = %settings.database.display(),
            "settings resolved"
        );
    }

    match cli.command {
        Some(Commands::Server { .. }) => cmd_server(&settings).await,
        Some(Commands::Status) => cmd_status(&settings, json_mode),
        Some(Commands::Init { force }) => cmd_init(&settings, force),
        Some(Commands::Era { date, kind, list }) => {
            cmd_era(date.as_deref(), &kind, list, json_mode)
        }
        Some(Commands::Resolve { dimension, label }) => {
            cmd_resolve(&settings, json_mode, &dimension, &label)
        }
        Some(Commands::Codes { dimension }) => cmd_codes(&settings, json_mode, &dimension),
        Some(Commands::Register { file, .. }) => cmd_register(&settings, json_mode, &file),
        Some(Commands::Sync { .. }) => cmd_sync(&settings, json_mode),
        Some(Commands::Show { id }) => cmd_show(&settings, json_mode, &id),
        Some(Commands::Children { id }) => cmd_relatives(&settings, json_mode, &id, Walk::Children),
        Some(Commands::Ancestors { id, depth }) => {
            cmd_relatives(&settings, json_mode, &id, Walk::Ancestors(depth))
        }
        Some(Commands::Descendants { id, depth }) => {
            cmd_relatives(&settings, json_mode, &id, Walk::Descendants(depth))
        }
        Some(Commands::Login { id, secret }) => cmd_login(&settings, json_mode, &id, secret),
        Some(Commands::Catalog { path }) => cmd_catalog(json_mode, path.as_deref().unwrap_or("")),
        Some(Commands::Export { output, format }) => cmd_export(&settings, &output, &format),
        Some(Commands::Import { input }) => cmd_import(&settings, &input),
        Some(Commands::Hash) => cmd_hash(&settings, json_mode),
        None => {
            // No subcommand - show status by default
            cmd_status(&settings, json_mode)
        }
    }
}
