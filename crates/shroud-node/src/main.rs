// ============================================
// File: crates/shroud-node/src/main.rs
// ============================================
//! # Shroud Node Entry Point
//!
//! ## Creation Reason
//! Main entry point for the shroud node binary.
//! Handles CLI parsing, logging setup, and node startup.
//!
//! ## Main Functionality
//! - CLI argument parsing with clap
//! - Logging initialization with tracing
//! - Configuration loading and validation
//! - Node execution
//!
//! ## Usage
//! ```bash
//! shroud-node start --config /etc/shroud/node.toml
//! shroud-node validate --config /etc/shroud/node.toml
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `RUST_LOG` overrides `[logging] level`
//! - A missing config file falls back to defaults
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shroud_node::{ConnectionPolicy, Node, NodeConfig};

// ============================================
// CLI Definition
// ============================================

/// Shroud peer-to-peer node with v1/v2 transport negotiation
#[derive(Parser, Debug)]
#[command(name = "shroud-node")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the node
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/shroud/node.toml")]
        config: PathBuf,
    },

    /// Validate configuration file and print the effective policy
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/shroud/node.toml")]
        config: PathBuf,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start { config } => cmd_start(&config).await,
        Commands::Validate { config } => cmd_validate(&config).await,
    };

    if let Err(e) = result {
        init_logging("info");
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Starts the node.
async fn cmd_start(config_path: &Path) -> anyhow::Result<()> {
    let config = load_or_default_config(config_path).await?;
    init_logging(&config.logging.level);

    info!("Starting shroud node...");
    let node = Node::new(config)?;
    node.run().await?;

    Ok(())
}

/// Validates configuration file.
async fn cmd_validate(config_path: &Path) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   Node will use default values.");
        return Ok(());
    }

    let config = NodeConfig::load(config_path).await?;
    let policy = ConnectionPolicy::from_config(&config)?;

    println!("✅ Configuration is valid");
    println!();
    println!("Network:");
    println!("   Listen:       {} ({})", config.network.listen_addr, on_off(config.network.listen));
    println!("   Magic:        {}", config.network.magic);
    println!("   User Agent:   {}", config.network.user_agent);
    println!("   Addnode:      {}", config.network.addnode.len());
    println!();
    println!("Transport:");
    println!("   v2:               {}", on_off(policy.v2_enabled));
    println!("   v2 only clearnet: {}", on_off(policy.v2_only_clearnet));
    println!("   Rekey Interval:   {} packets", policy.rekey_interval);
    println!("   Handshake:        {}s timeout", policy.handshake_timeout.as_secs());
    println!("   Strategy:         {}", policy.strategy_name());
    println!("   Decoys:           every {}s", config.transport.decoy_interval_secs);
    println!();
    println!("Limits:");
    println!("   Max Inbound:  {}", policy.max_inbound);
    println!("   Max Outbound: {}", policy.max_outbound);
    println!();
    println!("Proxy:");
    match policy.proxy {
        Some(addr) => {
            println!("   SOCKS5:         {}", addr);
            println!("   Route Clearnet: {}", on_off(policy.route_clearnet));
        }
        None => println!("   SOCKS5:         none (onion peers unreachable)"),
    }
    println!();

    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

/// Loads config or returns default.
async fn load_or_default_config(path: &Path) -> anyhow::Result<NodeConfig> {
    if path.exists() {
        Ok(NodeConfig::load(path).await?)
    } else {
        println!("Config file not found, using defaults");
        Ok(NodeConfig::default())
    }
}

const fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}
