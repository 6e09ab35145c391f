use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use toolgate_gateway::{mcp, Config, Gateway, McpServer};

#[derive(Parser)]
#[command(name = "toolgate", version, about = "Context-aware tool-routing gateway for MCP server fleets")]
struct Cli {
    /// Path to the gateway config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway as a stdio MCP server
    Run,
    /// Connect downstream servers and print the aggregate status
    Status,
    /// Delete aged-out telemetry events and idle sessions
    Cleanup,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    Ok(match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries JSON-RPC; all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Run => {
            let gateway = Gateway::new(config)?;
            gateway.initialize().await?;
            let server = McpServer::new(gateway);

            let result = mcp::run_stdio(&server).await;
            server.gateway().shutdown().await;
            result
        }
        Command::Status => {
            let gateway = Gateway::new(config)?;
            gateway.initialize().await?;
            let status = gateway.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            gateway.shutdown().await;
            Ok(())
        }
        Command::Cleanup => {
            let gateway = Gateway::new(config)?;
            let (events, sessions) = gateway.cleanup()?;
            println!("Deleted {} telemetry events, {} idle sessions", events, sessions);
            Ok(())
        }
    }
}
