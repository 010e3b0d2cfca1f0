//! Tipcast daemon entry point
//!
//! Wires the stores, feed hub, dispatcher, and supervisor together, then
//! serves the admin API until a shutdown signal arrives.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tipcast::accuracy::AccuracyTracker;
use tipcast::api::{self, AppContext};
use tipcast::config::{self, Args, Config};
use tipcast::db;
use tipcast::dispatch::{Dispatcher, HttpPushSink, NotificationSink};
use tipcast::events::EventBus;
use tipcast::feed::{FeedHub, FeedSource, HttpFeedClient};
use tipcast::history::SessionHistory;
use tipcast::licensing::LicenseStore;
use tipcast::registry::SubscriberRegistry;
use tipcast::supervisor::{Supervisor, SupervisorConfig, TaskContext};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tipcast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::resolve(&args).context("Failed to resolve configuration")?;

    info!("Starting tipcast");
    info!("Database: {}", config.db_path.display());
    info!("Feed source: {}", config.feed_base_url);
    info!("Push gateway: {}", config.push_url);

    let pool = db::init_database(&config.db_path)
        .await
        .context("Failed to initialize database")?;
    let timings = config::load_timings(&pool, &config)
        .await
        .context("Failed to load timing settings")?;

    let licenses = Arc::new(
        LicenseStore::load(pool.clone())
            .await
            .context("Failed to load licenses")?,
    );
    let registry = Arc::new(
        SubscriberRegistry::load(pool.clone(), Arc::clone(&licenses))
            .await
            .context("Failed to load subscriptions")?,
    );
    let accuracy = Arc::new(
        AccuracyTracker::load(pool.clone())
            .await
            .context("Failed to load accuracy counters")?,
    );
    let history = Arc::new(SessionHistory::new());

    let client = HttpFeedClient::new(&config.feed_base_url)
        .context("Failed to build feed client")?;
    let hub = Arc::new(FeedHub::new(
        Arc::new(client) as Arc<dyn FeedSource>,
        timings.feed_freshness,
    ));

    let sink: Arc<dyn NotificationSink> = Arc::new(
        HttpPushSink::new(&config.push_url, timings.send_spacing)
            .context("Failed to build push sink")?,
    );

    let bus = EventBus::new(256);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&sink),
        bus.clone(),
    ));

    let supervisor = Arc::new(Supervisor::new(
        TaskContext {
            licenses: Arc::clone(&licenses),
            registry: Arc::clone(&registry),
            hub,
            history: Arc::clone(&history),
            accuracy: Arc::clone(&accuracy),
            dispatcher,
            sink,
            bus: bus.clone(),
        },
        SupervisorConfig {
            poll_interval: timings.poll_interval,
            error_backoff: timings.error_backoff,
            max_consecutive_errors: timings.max_consecutive_errors,
        },
    ));

    let app = api::create_router(AppContext {
        licenses,
        supervisor: Arc::clone(&supervisor),
        accuracy,
        history,
        bus,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("Admin API listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    supervisor.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
