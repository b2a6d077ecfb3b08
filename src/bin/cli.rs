// Thin command-line client.
//
// One TCP connection, one request, one response: TRANSFER against the
// coordinator or READ against a participant node. Exits 0 when the
// operation succeeded, 1 otherwise.

use clap::{Parser, Subcommand};
use tokio::net::TcpStream;

use rusty_ledger::protocol::framing;
use rusty_ledger::protocol::Message;
use rusty_ledger::{LedgerError, Result};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli", version, about = "Ledger client")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transfer an amount between two accounts via the coordinator.
    Transfer {
        /// Coordinator address, host:port.
        #[arg(long, default_value = "127.0.0.1:7400")]
        coordinator: String,
        from_node: String,
        from_account: String,
        to_node: String,
        to_account: String,
        amount: i64,
    },
    /// Read one account's balance directly from its participant node.
    Read {
        /// Node address, host:port.
        #[arg(long)]
        node: String,
        account_id: String,
    },
}

async fn exchange(addr: &str, request: &Message) -> Result<Message> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| LedgerError::Network(format!("connect to {}: {}", addr, e)))?;
    framing::write_message(&mut stream, request).await?;
    framing::read_message(&mut stream).await
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let outcome = match args.command {
        Command::Transfer {
            coordinator,
            from_node,
            from_account,
            to_node,
            to_account,
            amount,
        } => {
            let request = Message::Transfer {
                from_node,
                from_account,
                to_node,
                to_account,
                amount,
            };
            match exchange(&coordinator, &request).await {
                Ok(Message::TransferResult {
                    success,
                    txid,
                    reason,
                }) => {
                    if success {
                        println!("committed txid={}", txid);
                        true
                    } else {
                        println!(
                            "failed txid={} reason={}",
                            txid,
                            reason.unwrap_or_else(|| "unknown".to_string())
                        );
                        false
                    }
                }
                Ok(other) => {
                    eprintln!("unexpected response: {:?}", other);
                    false
                }
                Err(e) => {
                    eprintln!("error: {}", e);
                    false
                }
            }
        }
        Command::Read { node, account_id } => {
            let request = Message::Read { account_id };
            match exchange(&node, &request).await {
                Ok(Message::ReadResult {
                    account_id,
                    balance,
                }) => {
                    println!("{} = {}", account_id, balance);
                    true
                }
                Ok(other) => {
                    eprintln!("unexpected response: {:?}", other);
                    false
                }
                Err(e) => {
                    eprintln!("error: {}", e);
                    false
                }
            }
        }
    };

    if !outcome {
        std::process::exit(1);
    }
}
