// Participant node entry point.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use rusty_ledger::config::NodeConfig;
use rusty_ledger::node::NodeServer;
use rusty_ledger::VERSION;

#[derive(Parser, Debug)]
#[command(
    name = "ledger-node",
    version,
    about = "Participant data node holding a partition of ledger accounts"
)]
struct Args {
    /// Participant id, as named in the coordinator's node map.
    #[arg(long)]
    node_id: String,

    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind.
    #[arg(long)]
    port: u16,

    /// Directory for the state snapshot and write-ahead log.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let args = Args::parse();
    let config = NodeConfig {
        node_id: args.node_id,
        host: args.host,
        port: args.port,
        data_dir: args.data_dir,
    };

    info!("ledger-node v{} starting as {}", VERSION, config.node_id);

    let server = match NodeServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("startup failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("server error: {}", e);
        std::process::exit(1);
    }
}
