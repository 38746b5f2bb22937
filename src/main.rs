// Fund tracker entry point.
//
// Startup sequence:
// 1. Initialize tracing
// 2. Load config
// 3. Open the quote cache database
// 4. Build the HTTP client and source adapters
// 5. Assemble the reconciler and refresh orchestrator
// 6. Spawn the broadcast hub, WebSocket listener, and keepalive task
// 7. Run the periodic refresh loop until Ctrl+C

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use fund_tracker::cache::SqliteCache;
use fund_tracker::clock::SystemClock;
use fund_tracker::config;
use fund_tracker::hub;
use fund_tracker::reconcile::Reconciler;
use fund_tracker::refresh::RefreshOrchestrator;
use fund_tracker::sources::{
    build_client, ConfirmedAdapter, EstimateAdapter, RealtimeAdapter,
};

/// Cache rows are keyed per owner; the standalone binary serves one.
const DEFAULT_OWNER_ID: i64 = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Fund tracker starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: {} holdings, {} watched, refresh every {:?}",
        config.holdings.len(),
        config.watchlist.len(),
        config.refresh_interval
    );

    // 3. Open the quote cache database
    let cache = Arc::new(
        SqliteCache::open(&config.db_path).context("failed to open quote cache")?,
    );
    info!("Quote cache opened at {}", config.db_path);

    // 4. Build the HTTP client and source adapters
    let http = build_client(config.fetch_timeout).context("failed to build HTTP client")?;
    let realtime = Arc::new(RealtimeAdapter::new(
        http.clone(),
        config.endpoints.realtime_base.clone(),
    ));
    let estimate = Arc::new(EstimateAdapter::new(
        http.clone(),
        config.endpoints.estimate_base.clone(),
    ));
    let confirmed = Arc::new(ConfirmedAdapter::new(
        http.clone(),
        config.endpoints.confirmed_base.clone(),
    ));

    // 5. Assemble the reconciler and refresh orchestrator
    let reconciler = Arc::new(Reconciler::new(
        realtime,
        estimate,
        confirmed,
        Arc::new(SystemClock),
    ));
    let orchestrator =
        RefreshOrchestrator::new(reconciler, cache, config.max_concurrent);

    // 6. Spawn the broadcast hub, WebSocket listener, and keepalive task
    let hub = hub::spawn();

    let ws_addr = format!("127.0.0.1:{}", config.ws_port);
    let listener = TcpListener::bind(&ws_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {ws_addr}"))?;
    info!("WebSocket server listening on {ws_addr}");

    let listener_hub = hub.clone();
    let listener_handle = tokio::spawn(async move {
        if let Err(e) = hub::run_ws_listener(listener, listener_hub).await {
            error!("WebSocket listener error: {}", e);
        }
    });

    let keepalive_handle = tokio::spawn(hub::run_keepalive(hub.clone(), config.keepalive));

    // 7. Run the periodic refresh loop until Ctrl+C
    let mut ticker = tokio::time::interval(config.refresh_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                refresh_and_broadcast(&orchestrator, &hub, &config).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    keepalive_handle.abort();
    listener_handle.abort();
    info!("Fund tracker shut down cleanly");
    Ok(())
}

/// Run one refresh cycle and push the resolved quotes to every subscriber.
async fn refresh_and_broadcast(
    orchestrator: &RefreshOrchestrator,
    hub: &hub::HubHandle,
    config: &config::Config,
) {
    let quotes = orchestrator
        .refresh_all(DEFAULT_OWNER_ID, &config.holdings, &config.watchlist)
        .await;
    if quotes.is_empty() {
        warn!("refresh cycle resolved no quotes");
        return;
    }

    let messages: Vec<_> = quotes.iter().map(|q| q.to_message()).collect();
    match serde_json::to_vec(&messages) {
        Ok(payload) => {
            info!(quotes = messages.len(), "broadcasting refresh cycle");
            hub.broadcast(payload).await;
        }
        Err(e) => error!("failed to serialize quote batch: {}", e),
    }
}

/// Initialize tracing to a log file so terminal output stays clean.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("fund-tracker.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fund_tracker=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
