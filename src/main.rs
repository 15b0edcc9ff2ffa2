// src/main.rs
// mcp-k8s-networking - in-cluster networking diagnostics for AI agents

use anyhow::Result;
use clap::{Parser, Subcommand};

use netmcp::config::Config;
use netmcp::{server, telemetry};

#[derive(Parser)]
#[command(name = "mcp-k8s-networking", version, about = "Kubernetes networking diagnostics over MCP")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server (default)
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let telemetry = telemetry::init(&config)?;

    match cli.command {
        None | Some(Commands::Serve) => server::run(config, telemetry).await,
    }
}
