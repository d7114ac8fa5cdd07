//! drdeploy: multi-cluster disaster-recovery deployment CLI.
//!
//! Brings up one or more clusters from declarative configuration and
//! layers the DR stack on top: storage operator, multicluster
//! orchestrator, ACM hub, Submariner mesh, managed-cluster import,
//! certificate exchange and reporting.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod ui;

use commands::deploy::DeployCommand;
use commands::destroy::DestroyCommand;

/// Multi-cluster DR deployment automation.
#[derive(Parser)]
#[command(
    name = "drdeploy",
    version,
    about = "Deploy disaster-recovery cluster fleets",
    long_about = "Deploy one or more clusters and the disaster-recovery stack.\n\n\
                  Single cluster:\n\
                  \x20 drdeploy deploy --cluster-name dr1 --cluster-path /tmp/dr1 --conf overrides.yaml\n\n\
                  Multicluster (per-cluster blocks delimited by --cluster<i> markers):\n\
                  \x20 drdeploy deploy multicluster 2 --email-ids ops@example.com \\\n\
                  \x20   --cluster1 --cluster-name dr1 --cluster-path /tmp/dr1 --conf dr1.yaml \\\n\
                  \x20   --cluster2 --cluster-name hub --cluster-path /tmp/hub --conf hub.yaml"
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a cluster fleet and its DR stack.
    Deploy(DeployCommand),

    /// Destroy previously deployed clusters.
    Destroy(DestroyCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("info,framework=debug,ops=debug,deploy=debug")
    } else {
        EnvFilter::new("warn,framework=info,ops=info,deploy=info,drdeploy=info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let exit_code = match cli.command {
        Commands::Deploy(cmd) => cmd.run().await?,
        Commands::Destroy(cmd) => cmd.run().await?,
    };
    std::process::exit(exit_code);
}
