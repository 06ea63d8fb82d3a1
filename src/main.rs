mod api;
mod config;
mod error;
mod fetcher;
mod notify;
mod parser;
mod state;
mod types;
mod watcher;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::config::{Config, NOTIFY_CHANNEL_CAPACITY};
use crate::error::Result;
use crate::notify::NotificationDispatcher;
use crate::state::FilterStore;
use crate::watcher::{OfferWatcher, PollTiming, WatcherContext};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let client = fetcher::build_client();
    let store = FilterStore::new(&cfg.filters_path);

    if cfg.channels.is_empty() {
        info!("CHANNELS not set — notifications will be dropped. Example: CHANNELS=general=https://discord.com/api/webhooks/...");
    } else {
        info!(
            "Notification channels configured: {}",
            cfg.channels.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
        );
    }

    // --- Notification dispatcher ---
    let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_CHANNEL_CAPACITY);
    let dispatcher = NotificationDispatcher::new(client.clone(), cfg.channels.clone(), notify_rx);
    tokio::spawn(async move { dispatcher.run().await });

    let ctx = WatcherContext {
        store: Arc::clone(&store),
        client,
        notify_tx,
        fallback_channels: cfg.channels.iter().map(|c| c.name.clone()).collect(),
    };

    // --- Restore persisted filters and restart their watchers ---
    // Dedup state is loop-local and starts empty: everything currently on a
    // watched page gets re-announced once after a restart.
    let restored = store.restore();
    for (owner, id) in restored {
        let task = OfferWatcher::new(ctx.clone(), owner, id, PollTiming::default()).spawn();
        store.attach_task(owner, id, task);
    }

    // --- Filter command API ---
    let app = router(ApiState { ctx });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Command API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
