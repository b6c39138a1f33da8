//! # Stitchboard CLI (`stitch`)
//!
//! The `stitch` binary runs the storefront collector and dashboard API and
//! gives shop owners a terminal view of their analytics.
//!
//! ## Usage
//!
//! ```bash
//! stitch --config ./config/stitch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `stitch init` | Create the SQLite database and run schema migrations |
//! | `stitch serve` | Start the HTTP collector and dashboard API |
//! | `stitch stats` | Print one analytics snapshot |
//! | `stitch watch` | Reprint the snapshot on a fixed interval |
//! | `stitch classify "<ua>"` | Show how a user-agent would be classified |
//!
//! ## Examples
//!
//! ```bash
//! stitch init --config ./config/stitch.toml
//! stitch serve --config ./config/stitch.toml
//! stitch stats --json
//! stitch watch --interval 10
//! stitch classify "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) Safari/604.1"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stitchboard::{config, logging, migrate, server, stats};
use stitchboard_core::classify::{Classifier, DevicePolicy};

/// Stitchboard CLI: visit tracking, order intake, and an analytics
/// dashboard for a small storefront.
///
/// All commands except `classify` read a TOML configuration file. See
/// `config/stitch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "stitch",
    about = "Stitchboard: visit tracking, order intake, and analytics for a small storefront",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/stitch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `records` table. Running
    /// it multiple times is safe.
    Init,

    /// Start the HTTP collector and dashboard API.
    ///
    /// Binds to `[server].bind` and serves until Ctrl+C or SIGTERM.
    Serve,

    /// Print one analytics snapshot.
    Stats {
        /// Print the snapshot as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Reprint the analytics snapshot on a fixed interval.
    Watch {
        /// Seconds between refreshes (defaults to `[analytics].refresh_interval_secs`).
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Classify a user-agent string without touching the database.
    Classify {
        /// The user-agent string.
        user_agent: String,

        /// Viewport width in CSS pixels, used by the `viewport_width` policy.
        #[arg(long, default_value_t = 0)]
        width: u32,

        /// Device policy: `user_agent` or `viewport_width`.
        #[arg(long, default_value = "user_agent", value_parser = ["user_agent", "viewport_width"])]
        policy: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Classify {
        user_agent,
        width,
        policy,
    } = &cli.command
    {
        let policy = match policy.as_str() {
            "viewport_width" => DevicePolicy::ViewportWidth,
            _ => DevicePolicy::UserAgent,
        };
        let result = Classifier::with_policy(policy).classify(user_agent, *width);
        println!("device:  {}", result.device_type.as_str());
        println!("browser: {}", result.browser.display_name());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Watch { interval } => {
            stats::run_watch(&cfg, interval).await?;
        }
        Commands::Classify { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}
