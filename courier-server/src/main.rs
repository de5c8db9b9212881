#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]

//! Command-line entry point of the Courier delivery server.

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::server::Config;

use server::{commands::openapi::export_openapi, server::run};


#[derive(Debug, Parser)]
#[command(name = "courier-server")]
#[command(about = "Presence-aware message delivery server for Courier", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the delivery server
    Serve {
        /// Port to bind, overriding the configuration file and `COURIER_PORT`
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to a YAML, JSON or TOML configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Print or write the OpenAPI document of the REST endpoints
    Openapi {
        /// Output file, or `json` / `yaml` to stream that format to stdout
        output: Option<String>,
    },
}

/// # Errors
/// Returns an error if configuration loading or server startup fails.
pub async fn handle_serve_command(
    port: Option<u16>,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let resolved_config = Config::load_config(config, port)?;
    run(resolved_config).await
}

/// # Errors
/// Returns an error if the selected command fails.
pub async fn run_app(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
        Commands::Openapi { output } => export_openapi(output.as_deref(), &mut std::io::stdout()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    run_app(Cli::parse()).await
}
