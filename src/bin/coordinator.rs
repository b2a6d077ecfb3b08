// Coordinator server entry point.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use rusty_ledger::config::{parse_node_map, CoordinatorConfig};
use rusty_ledger::coordinator::Coordinator;
use rusty_ledger::VERSION;

#[derive(Parser, Debug)]
#[command(
    name = "ledger-coordinator",
    version,
    about = "Two-phase commit coordinator for the distributed ledger"
)]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind.
    #[arg(long, default_value_t = 7400)]
    port: u16,

    /// Participant map, e.g. "N1:127.0.0.1:7401,N2:127.0.0.1:7402".
    #[arg(long)]
    nodes: String,

    /// Directory for the decision log.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Seconds to wait for each PREPARE vote.
    #[arg(long, default_value_t = 5)]
    prepare_timeout: u64,

    /// Seconds to wait for each COMMIT/ABORT acknowledgement.
    #[arg(long, default_value_t = 15)]
    commit_timeout: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let args = Args::parse();

    let nodes = match parse_node_map(&args.nodes) {
        Ok(nodes) => nodes,
        Err(e) => {
            error!("invalid node map: {}", e);
            std::process::exit(1);
        }
    };

    let config = CoordinatorConfig {
        host: args.host,
        port: args.port,
        nodes,
        data_dir: args.data_dir,
        prepare_timeout: Duration::from_secs(args.prepare_timeout),
        commit_timeout: Duration::from_secs(args.commit_timeout),
    };

    info!("ledger-coordinator v{} starting", VERSION);
    info!(
        "participants: {}",
        config
            .nodes
            .iter()
            .map(|(id, addr)| format!("{}={}", id, addr.endpoint()))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let coordinator = match Coordinator::bind(config).await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("startup failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = coordinator.recover().await {
        error!("recovery failed: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = coordinator.run().await {
        error!("server error: {}", e);
        std::process::exit(1);
    }
}
