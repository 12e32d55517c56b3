// Status poller: finds stale raffle records, probes the raffle host's
// verification endpoint, classifies the body, and hands the app loop
// one batch of results per wallet.
//
// Probe failures are contained here: a failed fetch leaves its record
// stale and it is retried on the next tick. Nothing in this module
// writes to the store.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::config::MarkerConfig;
use crate::entitlement::EntitlementCheck;
use crate::protocol::PollResult;
use crate::settings::{RaffleRecord, RaffleStatus, Settings};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What a poll task reports back to the application loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// All of one wallet's probe results, delivered together so a
    /// single persistence write covers the whole batch.
    Batch {
        wallet: String,
        results: Vec<PollResult>,
    },
    /// The wallet no longer holds the entitlement credential. It is
    /// removed from future polling; its raffle data is retained.
    EntitlementRevoked { wallet: String },
}

// ---------------------------------------------------------------------------
// Staleness
// ---------------------------------------------------------------------------

/// A record is due for re-probe once a full interval has elapsed.
/// The boundary is inclusive.
pub fn is_stale(record: &RaffleRecord, interval_minutes: u32, now: i64) -> bool {
    now - record.updated_at >= i64::from(interval_minutes) * 60_000
}

/// Stale raffle URLs grouped per wallet, in `wallets` order. Buckets of
/// wallets that are no longer listed (e.g. dropped after an entitlement
/// revocation) are retained in the settings but not polled.
pub fn select_stale(settings: &Settings, now: i64) -> Vec<(String, Vec<String>)> {
    let mut out = Vec::new();
    for wallet in &settings.wallets {
        let Some(bucket) = settings.raffles.get(wallet) else {
            continue;
        };
        let urls: Vec<String> = bucket
            .iter()
            .filter(|(_, record)| is_stale(record, settings.interval, now))
            .map(|(url, _)| url.clone())
            .collect();
        if !urls.is_empty() {
            out.push((wallet.clone(), urls));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classify a probe response body against the configured marker table.
///
/// The "not registered" marker always wins; after that the ordered
/// table applies first-match-wins; a body matching nothing is
/// `unknown`, which is not an error.
pub fn classify(body: &str, markers: &MarkerConfig) -> RaffleStatus {
    if body.contains(&markers.unregistered.marker) {
        return markers.unregistered.status;
    }
    for rule in &markers.markers {
        if body.contains(&rule.marker) {
            return rule.status;
        }
    }
    RaffleStatus::Unknown
}

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

/// HTTP prober shared by all poll tasks. The semaphore is the global
/// rate limit: raffle hosts answer a burst of verification requests
/// with anti-bot pages, so probes trickle instead.
pub struct StatusProber {
    http: reqwest::Client,
    limiter: Semaphore,
    markers: MarkerConfig,
}

impl StatusProber {
    pub fn new(concurrency: usize, markers: MarkerConfig) -> Self {
        StatusProber {
            http: reqwest::Client::new(),
            limiter: Semaphore::new(concurrency),
            markers,
        }
    }

    /// Probe one raffle's verification endpoint and classify the body.
    pub async fn probe(&self, url: &str, wallet: &str) -> anyhow::Result<RaffleStatus> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .expect("probe limiter never closes");

        let endpoint = format!("{url}/verify/?wallet={wallet}");
        let body = self
            .http
            .get(&endpoint)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(classify(&body, &self.markers))
    }
}

/// Poll one wallet's stale raffles and report a single batch.
///
/// The entitlement prerequisite runs first: a definitive `false`
/// reports a revocation instead of polling; a check error skips the
/// wallet for this tick (dropping a wallet over a transient RPC
/// failure would be unrecoverable). Individual probe failures are
/// logged and omitted from the batch.
pub async fn poll_wallet(
    prober: Arc<StatusProber>,
    entitlement: Arc<dyn EntitlementCheck>,
    wallet: String,
    urls: Vec<String>,
    tx: mpsc::Sender<PollEvent>,
) {
    match entitlement.has_credential(&wallet).await {
        Ok(true) => {}
        Ok(false) => {
            info!(%wallet, "entitlement revoked, dropping wallet from polling");
            let _ = tx.send(PollEvent::EntitlementRevoked { wallet }).await;
            return;
        }
        Err(e) => {
            warn!(%wallet, "entitlement check failed, skipping this tick: {e}");
            return;
        }
    }

    let probes = urls.iter().map(|url| {
        let prober = Arc::clone(&prober);
        let wallet = wallet.clone();
        async move {
            match prober.probe(url, &wallet).await {
                Ok(status) => {
                    debug!(%url, ?status, "probe classified");
                    Some(PollResult {
                        url: url.clone(),
                        status,
                    })
                }
                Err(e) => {
                    // Stale until next tick; never surfaced to the user.
                    warn!(%url, "probe failed: {e}");
                    None
                }
            }
        }
    });

    let results: Vec<PollResult> = join_all(probes).await.into_iter().flatten().collect();
    if results.is_empty() {
        debug!(%wallet, "no probe results this tick");
        return;
    }

    let _ = tx.send(PollEvent::Batch { wallet, results }).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarkerRule;
    use crate::settings::WalletBucket;
    use async_trait::async_trait;

    const NOW: i64 = 1_700_000_000_000;

    fn test_markers() -> MarkerConfig {
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

    fn record_updated_at(updated_at: i64) -> RaffleRecord {
        RaffleRecord {
            updated_at,
            ..RaffleRecord::new("r", RaffleStatus::Register, updated_at)
        }
    }

    // -----------------------------------------------------------------
    // Staleness
    // -----------------------------------------------------------------

    #[test]
    fn staleness_boundary_is_inclusive() {
        let interval = 60u32;
        let span = i64::from(interval) * 60_000;

        // Exactly one interval old: selected.
        assert!(is_stale(&record_updated_at(NOW - span), interval, NOW));
        // One millisecond younger: not selected.
        assert!(!is_stale(&record_updated_at(NOW - span + 1), interval, NOW));
        // Older: selected.
        assert!(is_stale(&record_updated_at(NOW - span - 1), interval, NOW));
    }

    #[test]
    fn select_stale_groups_per_wallet() {
        let mut settings = Settings::default();
        settings.interval = 1;
        settings.wallets = vec!["0xaaa".into(), "0xbbb".into()];

        let mut bucket_a = WalletBucket::new();
        bucket_a.insert("https://stale.example".into(), record_updated_at(NOW - 60_000));
        bucket_a.insert("https://fresh.example".into(), record_updated_at(NOW));
        settings.raffles.insert("0xaaa".into(), bucket_a);

        let mut bucket_b = WalletBucket::new();
        bucket_b.insert("https://old.example".into(), record_updated_at(NOW - 120_000));
        settings.raffles.insert("0xbbb".into(), bucket_b);

        let stale = select_stale(&settings, NOW);
        assert_eq!(stale.len(), 2);
        assert_eq!(stale[0].0, "0xaaa");
        assert_eq!(stale[0].1, vec!["https://stale.example".to_string()]);
        assert_eq!(stale[1].0, "0xbbb");
        assert_eq!(stale[1].1, vec!["https://old.example".to_string()]);
    }

    #[test]
    fn select_stale_skips_unlisted_wallets() {
        let mut settings = Settings::default();
        settings.interval = 1;
        // Bucket exists but the wallet is not in the polling list.
        let mut bucket = WalletBucket::new();
        bucket.insert("https://stale.example".into(), record_updated_at(NOW - 60_000));
        settings.raffles.insert("0xdropped".into(), bucket);

        assert!(select_stale(&settings, NOW).is_empty());
    }

    #[test]
    fn select_stale_skips_wallets_with_nothing_due() {
        let mut settings = Settings::default();
        settings.interval = 60;
        settings.wallets = vec!["0xaaa".into()];
        let mut bucket = WalletBucket::new();
        bucket.insert("https://fresh.example".into(), record_updated_at(NOW));
        settings.raffles.insert("0xaaa".into(), bucket);

        assert!(select_stale(&settings, NOW).is_empty());
    }

    // -----------------------------------------------------------------
    // Classification
    // -----------------------------------------------------------------

    #[test]
    fn classify_unregistered_marker_wins_over_table() {
        let markers = test_markers();
        let body = "<div>🏆</div><div>You aren't registered.</div>";
        assert_eq!(classify(body, &markers), RaffleStatus::Register);
    }

    #[test]
    fn classify_table_is_first_match_wins() {
        let markers = test_markers();
        // Both lost and won markers present: lost comes first.
        let body = "<div>😢</div><div>🏆</div>";
        assert_eq!(classify(body, &markers), RaffleStatus::Lost);
    }

    #[test]
    fn classify_individual_markers() {
        let markers = test_markers();
        assert_eq!(classify("results: 😢", &markers), RaffleStatus::Lost);
        assert_eq!(classify("results: 🏆", &markers), RaffleStatus::Won);
        assert_eq!(classify("status 👍 ok", &markers), RaffleStatus::Registered);
    }

    #[test]
    fn classify_no_match_resolves_to_unknown() {
        let markers = test_markers();
        assert_eq!(
            classify("<html>maintenance page</html>", &markers),
            RaffleStatus::Unknown
        );
    }

    // -----------------------------------------------------------------
    // poll_wallet entitlement handling (no HTTP involved)
    // -----------------------------------------------------------------

    struct Deny;

    #[async_trait]
    impl EntitlementCheck for Deny {
        async fn has_credential(&self, _wallet: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    struct Broken;

    #[async_trait]
    impl EntitlementCheck for Broken {
        async fn has_credential(&self, _wallet: &str) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("rpc unreachable"))
        }
    }

    #[tokio::test]
    async fn revoked_entitlement_reports_and_skips_probes() {
        let prober = Arc::new(StatusProber::new(2, test_markers()));
        let (tx, mut rx) = mpsc::channel(8);

        poll_wallet(
            prober,
            Arc::new(Deny),
            "0xabc".into(),
            vec!["https://x.example".into()],
            tx,
        )
        .await;

        assert_eq!(
            rx.recv().await,
            Some(PollEvent::EntitlementRevoked {
                wallet: "0xabc".into()
            })
        );
    }

    #[tokio::test]
    async fn entitlement_error_skips_wallet_silently() {
        let prober = Arc::new(StatusProber::new(2, test_markers()));
        let (tx, mut rx) = mpsc::channel(8);

        poll_wallet(
            prober,
            Arc::new(Broken),
            "0xabc".into(),
            vec!["https://x.example".into()],
            tx,
        )
        .await;

        // No event of any kind: the wallet is retried next tick.
        assert!(rx.try_recv().is_err());
    }
}
