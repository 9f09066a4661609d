// Auction host entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not terminal)
// 2. Load config
// 3. Open database, resolve the session ID
// 4. Import the item/tier pool
// 5. Bootstrap the session (restore a live snapshot or start fresh)
// 6. Spawn the WebSocket server task
// 7. Run the engine event loop until Ctrl+C

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

use auction_desk::app;
use auction_desk::auction::bootstrap::bootstrap_session;
use auction_desk::auction::item::Pool;
use auction_desk::auction::round::RoundController;
use auction_desk::broadcast::BroadcastHub;
use auction_desk::config;
use auction_desk::db::Database;
use auction_desk::protocol::auctioneer_only;
use auction_desk::store::SnapshotStore;
use auction_desk::ws_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing (log to file, not terminal)
    init_tracing()?;
    info!("Auction host starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: auction={}, {} teams, budget {} per team",
        config.auction.name,
        config.auction.teams.len(),
        config.auction.budget_per_team
    );

    // 3. Open database, resolve the session ID
    let db = Arc::new(Database::open(&config.db_path).context("failed to open database")?);
    info!("Database opened at {}", config.db_path);

    let session_id = match db.get_session_id()? {
        Some(id) => id,
        None => {
            let id = Database::generate_session_id();
            db.set_session_id(&id)?;
            id
        }
    };
    info!("Session ID: {}", session_id);

    // 4. Import the item/tier pool
    let pool = Pool::from_csv_files(&config.data_paths.items, &config.data_paths.tiers)
        .context("failed to import item pool")?;
    info!(
        "Imported {} items across {} tiers",
        pool.len(),
        pool.tiers().len()
    );

    // 5. Bootstrap the session
    let store: Arc<dyn SnapshotStore> = db.clone();
    let rounds = RoundController::new(store.clone(), session_id.clone());
    let session = bootstrap_session(store.as_ref(), &rounds, &pool, &session_id, &config)
        .await
        .context("session bootstrap failed")?;
    if session.started {
        info!("Resumed live session at item {}/{}", session.cursor, session.queue.len());
    } else {
        info!("Fresh session ready, waiting for start");
    }

    let hub = Arc::new(BroadcastHub::default());
    let state = app::AppState::new(
        config.clone(),
        pool,
        session,
        store,
        hub.clone(),
        auctioneer_only(),
    );

    // 6. Spawn the WebSocket server task
    let ws_port = config.ws_port;
    let (ws_tx, ws_rx) = mpsc::channel(256);
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(ws_port, ws_tx, hub).await {
            error!("WebSocket server error: {}", e);
        }
    });

    // 7. Run the engine event loop until Ctrl+C
    let engine_handle = tokio::spawn(async move {
        if let Err(e) = app::run(ws_rx, state).await {
            error!("Engine loop error: {}", e);
        }
    });

    info!("Auction host ready on 127.0.0.1:{}", ws_port);
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    // Stop accepting work, then give the engine a moment to drain.
    ws_handle.abort();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), engine_handle).await;

    info!("Auction host shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file (the terminal stays free for the
/// operator's shell).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("auctiondesk.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("auction_desk=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
