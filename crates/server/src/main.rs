use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use waddledb_core::{config, Dispatcher, StoreConfig, SyncMode, VectorStore};

mod net;

#[derive(Parser)]
#[command(name = "waddledb", about = "Embedded vector database server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Data directory for shard files, indexes, and the WAL
    #[arg(short, long, default_value = config::DEFAULT_DATA_DIR)]
    data_dir: String,

    /// Durability policy for shard appends: strict (fsync per append) or async
    #[arg(long, default_value = "strict")]
    sync_mode: String,

    /// Log only errors
    #[arg(short, long, default_value_t = false)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_level = if args.quiet { "error" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let sync_mode = match args.sync_mode.as_str() {
        "strict" => SyncMode::Strict,
        "async" => SyncMode::Async,
        other => {
            eprintln!("Error: sync-mode must be \"strict\" or \"async\", got {other:?}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %args.data_dir,
        sync_mode = %args.sync_mode,
        "waddledb initializing"
    );

    let store_config = StoreConfig {
        payload_size: 1024,
        data_path: args.data_dir.clone(),
        sync_mode,
    };
    let store = match VectorStore::open(store_config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Error: failed to open storage at {:?}: {e}", args.data_dir);
            std::process::exit(1);
        }
    };

    let dispatcher = Dispatcher::start(Arc::clone(&store));

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error: failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    let collections = store.list_collections().len();
    tracing::info!(port = args.port, collections, "waddledb ready");

    tokio::select! {
        () = net::serve(listener, dispatcher) => {}
        () = wait_for_signal() => {}
    }

    tracing::info!("flushing state before exit");
    if let Err(e) = store.close() {
        tracing::error!(error = %e, "shutdown flush failed — WAL preserved for recovery");
        std::process::exit(1);
    }
    tracing::info!("shutdown complete");
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
