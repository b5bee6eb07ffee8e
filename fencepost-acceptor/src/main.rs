//! Fencepost acceptor server
//!
//! Runs one Paxos acceptor of a fencepost cluster.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fencepost_acceptor::{FjallKvStore, KvAcceptorHandler, KvAcceptorStore, serve};
use fencepost_core::{KvStore, MemoryKvStore};
use fencepost_paxos::acceptor::AcceptorHandler;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Fencepost acceptor server
#[derive(Parser, Debug)]
#[command(name = "fencepost-acceptor")]
#[command(about = "Run a fencepost Paxos acceptor")]
struct Args {
    /// Path to the database directory
    #[arg(short, long, default_value = "./acceptor-db")]
    database: PathBuf,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:7400")]
    bind: String,

    /// Name of this acceptor in logs
    #[arg(short, long, default_value = "acceptor")]
    node_id: String,

    /// Keep state in memory only (nothing survives a restart)
    #[arg(long)]
    in_memory: bool,
}

async fn run<S: KvStore>(store: S, listener: TcpListener) {
    let handler: Arc<KvAcceptorHandler<S>> =
        Arc::new(AcceptorHandler::new(KvAcceptorStore::new(store)));

    tokio::select! {
        result = serve(listener, handler) => {
            if let Err(report) = result {
                error!(?report, "acceptor stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let listener = TcpListener::bind(&args.bind).await?;
    let addr = listener.local_addr()?;
    info!(node_id = %args.node_id, %addr, "acceptor listening");

    if args.in_memory {
        warn!("running with in-memory state, promises are lost on restart");
        run(MemoryKvStore::new(), listener).await;
    } else {
        info!(path = ?args.database, "opening database");
        let store = FjallKvStore::open(&args.database)
            .await
            .map_err(|report| format!("{report:?}"))?;
        run(store, listener).await;
    }

    Ok(())
}
