// Application state and orchestration logic.
//
// The central event loop that coordinates surface requests from the
// WebSocket server, poll-result batches from spawned probe tasks, and
// the poll-scheduler tick. Owns the canonical Settings copy; every
// write funnels through `commit` so persistence, the in-memory copy,
// and the surface broadcast never diverge.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::entitlement::EntitlementCheck;
use crate::poller::{self, PollEvent, StatusProber};
use crate::reconcile;
use crate::router::Router;
use crate::server::ServerEvent;
use crate::settings::{now_millis, Settings, SCHEMA_VERSION};
use crate::store::{SettingsStore, StoreError};

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// The complete application state.
pub struct AppState {
    pub config: Config,
    /// Canonical settings copy, hydrated once from the store at startup
    /// and replaced on every commit. Everything handed out to other
    /// components is a clone of this.
    pub settings: Settings,
    pub store: SettingsStore,
    pub broadcaster: Broadcaster,
    pub entitlement: Arc<dyn EntitlementCheck>,
    pub prober: Arc<StatusProber>,
    /// Sender for poll events; spawned probe tasks use a clone of this
    /// to report their batches back to the event loop.
    pub poll_tx: mpsc::Sender<PollEvent>,
}

impl AppState {
    /// Build the application state, hydrating settings from the store.
    pub fn new(
        config: Config,
        store: SettingsStore,
        broadcaster: Broadcaster,
        entitlement: Arc<dyn EntitlementCheck>,
        poll_tx: mpsc::Sender<PollEvent>,
    ) -> Result<Self, StoreError> {
        let settings = store.read()?;
        let prober = Arc::new(StatusProber::new(
            config.watcher.probe_concurrency,
            config.markers.clone(),
        ));

        Ok(AppState {
            config,
            settings,
            store,
            broadcaster,
            entitlement,
            prober,
            poll_tx,
        })
    }

    /// Persist a new snapshot, swap the canonical copy, and notify the
    /// surfaces. On a store failure the canonical copy is left alone so
    /// memory never diverges from what is actually persisted.
    pub fn commit(&mut self, mut next: Settings) -> Result<(), StoreError> {
        next.schema_version = SCHEMA_VERSION;
        self.store.write(&next)?;
        self.settings = next;
        self.broadcaster.notify_settings(&self.settings);
        self.broadcaster.update_badge(&self.settings);
        Ok(())
    }

    /// Reset to the default settings. Surfaces observe a well-formed
    /// default object, not an absence.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.store.clear()?;
        let mut next = Settings::default();
        next.is_loading = false;
        self.settings = next;
        self.broadcaster.notify_settings(&self.settings);
        self.broadcaster.update_badge(&self.settings);
        Ok(())
    }

    /// Spawn probe tasks for every wallet that has stale records.
    /// Running tasks are not cancelled by the next tick; overlapping
    /// batches are serialized when they land back in the event loop.
    pub fn start_poll_cycle(&self, now: i64) {
        let stale = poller::select_stale(&self.settings, now);
        if stale.is_empty() {
            debug!("poll tick: nothing stale");
            return;
        }
        for (wallet, urls) in stale {
            debug!(%wallet, count = urls.len(), "spawning poll task");
            tokio::spawn(poller::poll_wallet(
                Arc::clone(&self.prober),
                Arc::clone(&self.entitlement),
                wallet,
                urls,
                self.poll_tx.clone(),
            ));
        }
    }

    /// Fold a poll event into the canonical settings.
    pub fn handle_poll_event(&mut self, event: PollEvent) {
        let now = now_millis();
        match event {
            PollEvent::Batch { wallet, results } => {
                let next = match reconcile::apply_poll_results(
                    &self.settings,
                    &wallet,
                    &results,
                    now,
                ) {
                    Cow::Borrowed(_) => {
                        debug!(%wallet, "poll batch changed nothing, skipping write");
                        None
                    }
                    Cow::Owned(next) => Some(next),
                };
                if let Some(next) = next {
                    info!(%wallet, count = results.len(), "applying poll batch");
                    if let Err(e) = self.commit(next) {
                        warn!(%wallet, "failed to persist poll batch: {e}");
                    }
                }
            }
            PollEvent::EntitlementRevoked { wallet } => {
                let Some(pos) = self.settings.wallets.iter().position(|w| w == &wallet)
                else {
                    return;
                };
                let mut next = self.settings.clone();
                next.wallets.remove(pos);
                // Keep the selection index valid; raffle data for the
                // dropped wallet stays where it is.
                if next.selected_wallet >= next.wallets.len() {
                    next.selected_wallet = next.wallets.len().saturating_sub(1);
                }
                info!(%wallet, "removing wallet after entitlement revocation");
                if let Err(e) = self.commit(next) {
                    warn!(%wallet, "failed to persist wallet removal: {e}");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the main application event loop.
///
/// Listens on two channels plus a timer using `tokio::select!`:
/// 1. Surface events from the WebSocket server
/// 2. Poll events from spawned probe tasks
/// 3. The poll-scheduler tick
pub async fn run(
    mut server_rx: mpsc::Receiver<ServerEvent>,
    mut poll_rx: mpsc::Receiver<PollEvent>,
    mut state: AppState,
    router: Router,
) -> anyhow::Result<()> {
    info!("application event loop started");

    let mut tick = tokio::time::interval(Duration::from_secs(
        state.config.watcher.poll_period_minutes * 60,
    ));
    // The first tick completes immediately; consume it so the first
    // real poll happens after one full period.
    tick.tick().await;

    loop {
        tokio::select! {
            event = server_rx.recv() => {
                match event {
                    Some(ServerEvent::Connected { conn_id, addr }) => {
                        info!(conn_id, %addr, "surface connected");
                    }
                    Some(ServerEvent::Request { conn_id, text, reply }) => {
                        debug!(conn_id, "surface request");
                        router.handle(&mut state, &text, &reply).await;
                    }
                    Some(ServerEvent::Disconnected { conn_id }) => {
                        info!(conn_id, "surface disconnected");
                    }
                    None => {
                        info!("server channel closed, shutting down");
                        break;
                    }
                }
            }

            event = poll_rx.recv() => {
                match event {
                    Some(event) => state.handle_poll_event(event),
                    None => {
                        info!("poll channel closed, shutting down");
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                state.start_poll_cycle(now_millis());
            }
        }
    }

    info!("application event loop exiting");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
