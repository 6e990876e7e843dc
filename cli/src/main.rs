//! `helm` binary: `helm serve` runs the control plane, `helm gateway` the
//! API gateway. Configuration comes from env / `.env` via the config crate.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "helm", about = "Helm mission control plane", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control-plane server (mission API + WebSockets + outbox worker).
    Serve {
        /// Override HELM_BIND_ADDR, e.g. 0.0.0.0:8006.
        #[arg(long)]
        addr: Option<String>,
    },
    /// Run the API gateway in front of the control plane.
    Gateway {
        /// Override HELM_GATEWAY_BIND_ADDR, e.g. 0.0.0.0:8000.
        #[arg(long)]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = config::load_and_apply(None) {
        tracing::warn!(error = %e, "failed to load .env, continuing with process env");
    }
    let mut settings = config::Settings::from_env()?;

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { addr } => {
            if let Some(addr) = addr {
                settings.bind_addr = addr;
            }
            serve::run_serve(settings).await
        }
        Command::Gateway { addr } => {
            if let Some(addr) = addr {
                settings.gateway_bind_addr = addr;
            }
            gateway::run_gateway(settings).await
        }
    }
}
