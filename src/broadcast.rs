// Fan-out of settings snapshots and badge updates to connected surfaces.
//
// Delivery is best-effort and fire-and-forget: a surface that is not
// connected never sees the notice and re-reads from the store the next
// time it initializes, so send failures and lagging receivers are
// ignored.

use tokio::sync::broadcast;
use tracing::debug;

use crate::protocol::{Badge, ServerNotice};
use crate::settings::{RaffleStatus, Settings, WalletBucket};

/// Badge background when the selected wallet has at least one won raffle.
pub const BADGE_WON_COLOR: &str = "#AF8700";
/// Badge background otherwise.
pub const BADGE_DEFAULT_COLOR: &str = "#707070";

/// Badge summary for one wallet's bucket. The label is the 1-based
/// index of the selected wallet; the color signals a win.
pub fn compute_badge(bucket: Option<&WalletBucket>, selected_wallet: usize) -> Badge {
    let has_won = bucket.is_some_and(|b| b.values().any(|r| r.status == RaffleStatus::Won));
    Badge {
        text: format!("#{}", selected_wallet + 1),
        color: if has_won {
            BADGE_WON_COLOR.to_string()
        } else {
            BADGE_DEFAULT_COLOR.to_string()
        },
    }
}

/// Publisher side of the surface notification channel.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<ServerNotice>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Broadcaster { tx }
    }

    /// Subscribe a surface connection to future notices.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerNotice> {
        self.tx.subscribe()
    }

    /// Number of currently subscribed surfaces.
    pub fn surface_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn publish(&self, notice: ServerNotice) {
        // A send error only means no surface is connected right now.
        if self.tx.send(notice).is_err() {
            debug!("no surfaces connected, notice dropped");
        }
    }

    /// Push a fresh settings snapshot to every connected surface.
    pub fn notify_settings(&self, settings: &Settings) {
        self.publish(ServerNotice::settings_updated(settings.clone()));
    }

    /// Recompute and push the badge for the selected wallet.
    pub fn update_badge(&self, settings: &Settings) {
        let bucket = settings
            .selected_wallet_address()
            .and_then(|wallet| settings.bucket(wallet));
        self.update_badge_for(bucket, settings.selected_wallet);
    }

    /// Push a badge computed from an explicit bucket (the reportRaffles
    /// path, where the surface supplies the data directly).
    pub fn update_badge_for(&self, bucket: Option<&WalletBucket>, selected_wallet: usize) {
        let badge = compute_badge(bucket, selected_wallet);
        self.publish(ServerNotice::Badge { badge });
    }

    /// Tell raffle-page surfaces to run their one-shot registration flow.
    pub fn auto_register(&self, twitter_handle: Option<String>, discord_link: Option<String>) {
        self.publish(ServerNotice::AutoRegister {
            auto_register: true,
            twitter_handle,
            discord_link,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
