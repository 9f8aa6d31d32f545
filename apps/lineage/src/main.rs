//! # Lineage - Identity Code Registry
//!
//! The main binary for the Lineage genealogical registry.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for registrations, lookups and snapshots
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │             apps/lineage (THE BINARY)        │
//! │                                              │
//! │   ┌─────────────┐        ┌─────────────┐     │
//! │   │    CLI      │        │  HTTP API   │     │
//! │   │   (clap)    │        │   (axum)    │     │
//! │   └──────┬──────┘        └──────┬──────┘     │
//! │          └───────────┬──────────┘            │
//! │                      ▼                       │
//! │              ┌───────────────┐               │
//! │              │ lineage-core  │               │
//! │              │  (registry)   │               │
//! │              └───────────────┘               │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! lineage server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! lineage era 1987-06-14
//! lineage register -f people.json
//! lineage ancestors "G96C1P2R2E1F2 1" --depth 4
//! ```

use clap::Parser;
use lineage::{cli, config::ENV_LOG_FORMAT};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // LINEAGE_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var(ENV_LOG_FORMAT).unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lineage=info,lineage_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
  Lineage v{}
  identity codes & genealogical registry
"#,
        env!("CARGO_PKG_VERSION")
    );
}
