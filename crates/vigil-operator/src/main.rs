//! vigil - scheduled security and hygiene scans for Kubernetes fleets

use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::Client;

use vigil_common::telemetry::init_logging;
use vigil_operator::controller_runner::{build_cluster_controllers, build_scan_controllers};
use vigil_operator::{crds, OperatorConfig};

/// vigil - registers clusters and schedules plugin scans against them
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Cluster and ClusterScan controllers (default mode)
    Run,

    /// Print the CRD manifests and exit
    Crd,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Crd) => {
            let yaml = crds::render()
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRDs: {}", e))?;
            print!("{yaml}");
            Ok(())
        }
        Some(Commands::Run) | None => run_controllers(cli.config).await,
    }
}

async fn run_controllers(config: OperatorConfig) -> anyhow::Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("failed to install crypto provider: {:?}", e))?;

    init_logging(config.log_format)?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if config.install_crds {
        crds::install(&client).await?;
    }

    let cluster_ctx = Arc::new(
        vigil_cluster::Context::builder(client.clone())
            .intervals(config.intervals())
            .build()?,
    );
    let scan_ctx = Arc::new(
        vigil_scan::Context::builder(client.clone())
            .config(config.scan_config())
            .build(),
    );

    tracing::info!("Starting vigil controllers:");
    let mut controllers = build_cluster_controllers(client.clone(), cluster_ctx);
    controllers.extend(build_scan_controllers(client, scan_ctx));

    futures::future::join_all(controllers).await;

    tracing::info!("vigil controllers shutting down");
    Ok(())
}
