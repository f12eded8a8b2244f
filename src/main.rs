use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use log::{error, info};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::watcher::LibraryWatcher;

mod api;
mod broadcast;
mod config;
mod error;
mod library;
mod logger;
mod metadata;
mod scanner;
mod stream;
mod watcher;

#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(Config::from_env());
    logger::init(config.log_level)?;

    let (watcher, changes) = LibraryWatcher::start(Arc::clone(&config))
        .await
        .context("failed to start library watcher")?;
    let library = watcher.library();

    let shutdown = CancellationToken::new();
    let broadcaster = Broadcaster::new(library.clone(), config.heartbeat);
    let broadcast_task = tokio::spawn(broadcaster.clone().run(changes, shutdown.clone()));

    let app = api::create_router(AppState {
        library,
        broadcaster,
        config: Arc::clone(&config),
        shutdown: shutdown.clone(),
    });

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;

    shutdown.cancel();
    watcher.stop().await;
    if let Err(e) = broadcast_task.await {
        error!("Broadcaster ended abnormally: {}", e);
    }
    info!("Shut down");

    served.context("server error")
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => {
                error!("Cannot listen for ctrl-c: {}", e);
                shutdown.cancelled().await;
            }
        },
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
