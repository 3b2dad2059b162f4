//! kvgate server
//!
//! HTTP service for typed string, hash and list collections.

use clap::Parser;
use kvgate_server::config::{Args, BackendKind};
use kvgate_server::{app, AppState};
use kvgate_store::{Backend, MemoryBackend, RedisBackend, TypedStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting kvgate server on {}", args.bind);

    let backend: Arc<dyn Backend> = match args.backend {
        BackendKind::Redis => {
            info!("Connecting to Redis at {}", args.redis_url);
            Arc::new(RedisBackend::new(args.redis_config()).await?)
        }
        BackendKind::Memory => {
            warn!("Using in-memory backend - data is lost on exit");
            Arc::new(MemoryBackend::new().with_max_watch_retries(args.max_watch_retries))
        }
    };

    let store = TypedStore::new(backend, args.store_config());
    store.ping().await?;
    info!(
        "Backend ready: ttl unit={}, tagged keys={}, lenient values={}",
        args.ttl_unit, args.tag_keys, args.lenient_values
    );

    let state = AppState::new(store).with_lenient_values(args.lenient_values);
    let listener = TcpListener::bind(args.bind).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => error!("Unable to listen for shutdown signal: {}", err),
    }
}
