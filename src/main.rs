// Raffle watcher entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Open the settings store
// 4. Build collaborators (broadcaster, entitlement check)
// 5. Create mpsc channels
// 6. Hydrate application state
// 7. Spawn the surface WebSocket server task
// 8. Spawn the app event loop task
// 9. Wait for Ctrl+C
// 10. Cleanup on exit

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

use rafflewatch::app;
use rafflewatch::broadcast::Broadcaster;
use rafflewatch::config;
use rafflewatch::entitlement;
use rafflewatch::router::Router;
use rafflewatch::server;
use rafflewatch::store::SettingsStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("raffle watcher starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: poll every {}m, min interval {}m, {} probe slots",
        config.watcher.poll_period_minutes,
        config.watcher.min_interval_minutes,
        config.watcher.probe_concurrency
    );

    // 3. Open the settings store
    let db_path = resolve_db_path(&config.db_path)?;
    let store = SettingsStore::open(&db_path).context("failed to open settings store")?;
    info!("Settings store opened at {}", db_path);

    // 4. Collaborators
    let broadcaster = Broadcaster::new(256);
    let checker = entitlement::build_checker(&config.entitlement);
    if config.entitlement.enabled {
        info!("entitlement check enabled against {}", config.entitlement.rpc_url);
    } else {
        info!("entitlement check disabled, all wallets treated as entitled");
    }

    // 5. Channels
    let (server_tx, server_rx) = mpsc::channel(256);
    let (poll_tx, poll_rx) = mpsc::channel(256);

    // 6. Hydrate application state
    let ws_port = config.ws_port;
    let settle = Duration::from_secs(config.watcher.auto_register_settle_secs);
    let state = app::AppState::new(config, store, broadcaster.clone(), checker, poll_tx)
        .context("failed to hydrate settings")?;
    info!(
        "Settings hydrated: {} wallets, {} raffle buckets",
        state.settings.wallets.len(),
        state.settings.raffles.len()
    );

    let router = Router::new(settle);

    // 7. Spawn the surface server task
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run(ws_port, server_tx, broadcaster).await {
            error!("surface server error: {}", e);
        }
    });

    // 8. Spawn the app event loop task
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(server_rx, poll_rx, state, router).await {
            error!("application loop error: {}", e);
        }
    });

    // 9. Wait for shutdown
    info!("Application ready. Surface server listening on 127.0.0.1:{ws_port}");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    // 10. Cleanup: stop accepting surfaces, then let the app loop drain.
    server_handle.abort();
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = app_handle.await;
    })
    .await;

    info!("raffle watcher shut down cleanly");
    Ok(())
}

/// Resolve the configured database path. Absolute paths (and `:memory:`)
/// are used as-is; relative paths land under the platform data directory.
fn resolve_db_path(configured: &str) -> anyhow::Result<String> {
    if configured == ":memory:" || Path::new(configured).is_absolute() {
        return Ok(configured.to_string());
    }
    let dirs = directories::ProjectDirs::from("", "", "rafflewatch")
        .context("could not determine a platform data directory")?;
    let data_dir = dirs.data_dir();
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    Ok(data_dir.join(configured).to_string_lossy().into_owned())
}

/// Initialize tracing to log to a file (the terminal stays clean for
/// operators running the watcher under a supervisor).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("rafflewatch.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rafflewatch=info,warn")),
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
