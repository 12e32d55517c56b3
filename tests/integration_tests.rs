// Integration tests for the raffle watcher.
//
// These tests exercise the system end-to-end through the library
// crate's public API: store hydration, the router request/response
// cycle, poll classification feeding the reconciler, and the
// documented last-write-wins behavior of whole-object writes.

use std::sync::Arc;
use std::time::Duration;

use rafflewatch::app::{self, AppState};
use rafflewatch::broadcast::Broadcaster;
use rafflewatch::config::{Config, EntitlementConfig, MarkerConfig, MarkerRule, WatcherConfig};
use rafflewatch::entitlement::AllowAll;
use rafflewatch::poller::{self, PollEvent};
use rafflewatch::protocol::{PollResult, ServerNotice};
use rafflewatch::router::Router;
use rafflewatch::server::ServerEvent;
use rafflewatch::settings::{RaffleRecord, RaffleStatus, Settings, WalletBucket};
use rafflewatch::store::SettingsStore;

use serde_json::Value;
use tokio::sync::mpsc;

// ===========================================================================
// Test helpers
// ===========================================================================

const WALLET: &str = "0xabc";
const URL: &str = "https://x.example/collectors/entries/";
const NOW: i64 = 1_700_000_000_000;

/// Build a test-ready Config with inline settings (no files).
fn inline_config() -> Config {
    Config {
        watcher: WatcherConfig {
            poll_period_minutes: 1,
            min_interval_minutes: 5,
            probe_concurrency: 2,
            auto_register_settle_secs: 30,
        },
        entitlement: EntitlementConfig {
            enabled: false,
            rpc_url: String::new(),
            contract_address: String::new(),
            token_ids: vec![],
        },
        markers: inline_markers(),
        ws_port: 9004,
        db_path: ":memory:".into(),
    }
}

/// The production marker table, inline.
fn inline_markers() -> MarkerConfig {
    MarkerConfig {
        unregistered: MarkerRule {
            marker: "You aren't registered.".into(),
            status: RaffleStatus::Register,
        },
        markers: vec![
            MarkerRule {
                marker: "😢".into(),
                status: RaffleStatus::Lost,
            },
            MarkerRule {
                marker: "🏆".into(),
                status: RaffleStatus::Won,
            },
            MarkerRule {
                marker: "👍".into(),
                status: RaffleStatus::Registered,
            },
        ],
    }
}

fn fresh_state() -> (AppState, mpsc::Receiver<PollEvent>) {
    let (poll_tx, poll_rx) = mpsc::channel(64);
    let state = AppState::new(
        inline_config(),
        SettingsStore::open(":memory:").unwrap(),
        Broadcaster::new(64),
        Arc::new(AllowAll),
        poll_tx,
    )
    .unwrap();
    (state, poll_rx)
}

/// Send one raw request through the router and return the parsed response.
async fn roundtrip(router: &Router, state: &mut AppState, request: &str) -> Value {
    let (reply_tx, mut reply_rx) = mpsc::channel(8);
    router.handle(state, request, &reply_tx).await;
    let json = reply_rx.recv().await.expect("a response must arrive");
    serde_json::from_str(&json).unwrap()
}

// ===========================================================================
// Scenario 1: fresh install
// ===========================================================================

#[tokio::test]
async fn fresh_install_yields_default_settings() {
    // The default value reports loading until the store hydrates it.
    assert!(Settings::default().is_loading);

    let store = SettingsStore::open(":memory:").unwrap();
    let settings = store.read().unwrap();

    assert!(!settings.is_loading);
    assert!(settings.raffles.is_empty());
    assert!(settings.wallets.is_empty());
    assert_eq!(settings.interval, 60);
}

// ===========================================================================
// Scenario 2: scrape -> setSettings -> read
// ===========================================================================

#[tokio::test]
async fn scraped_raffle_survives_a_settings_round_trip() {
    let router = Router::new(Duration::from_secs(30));
    let (mut state, _poll_rx) = fresh_state();

    // The surface read a snapshot, merged its scrape locally, and wrote
    // the whole object back.
    let mut snapshot = state.settings.clone();
    snapshot.wallets.push(WALLET.into());
    let mut bucket = WalletBucket::new();
    bucket.insert(
        URL.into(),
        RaffleRecord::new("X Drop", RaffleStatus::Register, NOW),
    );
    snapshot.raffles.insert(WALLET.into(), bucket);

    let request = serde_json::json!({
        "setSettings": true,
        "settings": snapshot,
    })
    .to_string();
    roundtrip(&router, &mut state, &request).await;

    // A later read observes the scraped record.
    let response = roundtrip(&router, &mut state, r#"{"getSettings": true}"#).await;
    let record = &response["settings"]["raffles"][WALLET][URL];
    assert_eq!(record["status"], Value::from("register"));
    assert_eq!(record["name"], Value::from("X Drop"));
    assert_eq!(record["created_at"], Value::from(NOW));

    // And it is durably persisted, not just cached.
    let stored = state.store.read().unwrap();
    assert_eq!(stored.raffles[WALLET][URL].status, RaffleStatus::Register);
}

// ===========================================================================
// Scenario 3: poll tick refreshes a stale record
// ===========================================================================

#[tokio::test]
async fn stale_record_is_selected_probed_and_refreshed() {
    let (mut state, _poll_rx) = fresh_state();

    // One tracked raffle, last updated more than one interval ago.
    let mut settings = state.settings.clone();
    settings.interval = 5;
    settings.wallets.push(WALLET.into());
    let mut bucket = WalletBucket::new();
    let mut record = RaffleRecord::new("X Drop", RaffleStatus::Unknown, NOW - 5 * 60_000);
    record.updated_at = NOW - 5 * 60_000;
    bucket.insert(URL.into(), record);
    settings.raffles.insert(WALLET.into(), bucket);
    state.commit(settings).unwrap();

    // The scheduler selects it (boundary is inclusive).
    let stale = poller::select_stale(&state.settings, NOW);
    assert_eq!(stale, vec![(WALLET.to_string(), vec![URL.to_string()])]);

    // The probe body says we're not registered yet.
    let body = r#"<div class="card-body"><div>🤔</div><div>You aren't registered.</div></div>"#;
    let status = poller::classify(body, &state.config.markers);
    assert_eq!(status, RaffleStatus::Register);

    // The batch lands back in the event loop and is applied in one write.
    state.handle_poll_event(PollEvent::Batch {
        wallet: WALLET.into(),
        results: vec![PollResult {
            url: URL.into(),
            status,
        }],
    });

    let stored = state.store.read().unwrap();
    let record = &stored.raffles[WALLET][URL];
    assert_eq!(record.status, RaffleStatus::Register);
    assert!(record.updated_at > NOW - 5 * 60_000);

    // Refreshed means no longer stale.
    let restale = poller::select_stale(&state.settings, record.updated_at);
    assert!(restale.is_empty());
}

// ===========================================================================
// Scenario 4: concurrent setSettings, last writer wins
// ===========================================================================

#[tokio::test]
async fn concurrent_writes_resolve_to_the_second_payload() {
    let router = Router::new(Duration::from_secs(30));
    let (mut state, _poll_rx) = fresh_state();
    let base = state.settings.clone();

    // Two surfaces each edited a *different* field of the same snapshot.
    let mut from_popup = base.clone();
    from_popup.wallets.push(WALLET.into());

    let mut from_options = base.clone();
    from_options.auto_delete_lost = true;

    let first = serde_json::json!({"setSettings": true, "settings": from_popup}).to_string();
    let second = serde_json::json!({"setSettings": true, "settings": from_options}).to_string();
    roundtrip(&router, &mut state, &first).await;
    roundtrip(&router, &mut state, &second).await;

    // Whole-object replacement: the second write wins in full. The
    // popup's wallet is gone even though the edits were disjoint.
    let stored = state.store.read().unwrap();
    assert!(stored.auto_delete_lost);
    assert!(stored.wallets.is_empty());
    assert_eq!(stored, state.settings);
}

// ===========================================================================
// Event loop: requests flow through channels end to end
// ===========================================================================

#[tokio::test]
async fn event_loop_serves_requests_over_channels() {
    let (server_tx, server_rx) = mpsc::channel(16);
    let (poll_tx, poll_rx) = mpsc::channel(16);
    let state = AppState::new(
        inline_config(),
        SettingsStore::open(":memory:").unwrap(),
        Broadcaster::new(64),
        Arc::new(AllowAll),
        poll_tx,
    )
    .unwrap();
    let router = Router::new(Duration::from_secs(30));

    let app_handle = tokio::spawn(app::run(server_rx, poll_rx, state, router));

    let (reply_tx, mut reply_rx) = mpsc::channel(8);
    server_tx
        .send(ServerEvent::Request {
            conn_id: 1,
            text: r#"{"id": 9, "getSettings": true}"#.to_string(),
            reply: reply_tx,
        })
        .await
        .unwrap();

    let response: Value = serde_json::from_str(&reply_rx.recv().await.unwrap()).unwrap();
    assert_eq!(response["id"], Value::from(9));
    assert_eq!(response["settings"]["isLoading"], Value::Bool(false));

    // Closing the server channel shuts the loop down cleanly.
    drop(server_tx);
    app_handle.await.unwrap().unwrap();
}

// ===========================================================================
// Poll pipeline: revocation flows from poller to settings
// ===========================================================================

#[tokio::test]
async fn revoked_wallet_is_dropped_but_its_raffles_survive() {
    let (mut state, _poll_rx) = fresh_state();
    let mut notices = state.broadcaster.subscribe();

    let mut settings = state.settings.clone();
    settings.wallets = vec![WALLET.into()];
    let mut bucket = WalletBucket::new();
    bucket.insert(URL.into(), RaffleRecord::new("X Drop", RaffleStatus::Won, NOW));
    settings.raffles.insert(WALLET.into(), bucket);
    state.commit(settings).unwrap();

    // Drain the commit's own notices.
    while notices.try_recv().is_ok() {}

    state.handle_poll_event(PollEvent::EntitlementRevoked {
        wallet: WALLET.into(),
    });

    assert!(state.settings.wallets.is_empty());
    assert!(state.settings.raffles.contains_key(WALLET));

    // Surfaces heard about it.
    assert!(matches!(
        notices.recv().await.unwrap(),
        ServerNotice::SettingsUpdated { .. }
    ));

    // And the dropped wallet is no longer eligible for polling.
    assert!(poller::select_stale(&state.settings, NOW + 60 * 60_000).is_empty());
}
