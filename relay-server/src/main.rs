#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Main entry point for the ChatRelay gateway CLI.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::Config;
use std::path::PathBuf;

/// Command line interface for the ChatRelay gateway.
#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(about = "Streaming gateway over multiple hosted LLM providers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Serve {
        /// Port to bind; overrides the configuration file.
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to a YAML or JSON configuration file.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => {
            let config = Config::load_config(config, port)
                .map_err(|err| anyhow::anyhow!(err.to_string()))?;
            server::server::run(config).await
        }
    }
}
