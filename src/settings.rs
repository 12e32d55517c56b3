// The persisted settings model: the root Settings object, per-wallet
// raffle buckets, and the status enum used by the poller and reconciler.
//
// Wire/persisted layout: Settings keys are camelCase, RaffleRecord keys
// are snake_case. Both map levels use BTreeMap so serialization is
// deterministic (keys are unique and order carries no meaning).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Current persisted schema version. Payloads written before versioning
/// was introduced deserialize with version 0 and are upgraded on read.
pub const SCHEMA_VERSION: u32 = 1;

/// Default re-poll interval in minutes.
pub const DEFAULT_INTERVAL_MINUTES: u32 = 60;

// ---------------------------------------------------------------------------
// Raffle records
// ---------------------------------------------------------------------------

/// Registration status of a tracked raffle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RaffleStatus {
    #[default]
    Unknown,
    /// Seen but not yet registered.
    Register,
    Registered,
    Lost,
    Won,
}

/// One tracked raffle entry. The raffle page URL is the map key, not a
/// field, so inserting the same URL twice overwrites rather than appends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RaffleRecord {
    pub name: String,
    #[serde(default)]
    pub status: RaffleStatus,
    /// Epoch milliseconds of the last status refresh.
    #[serde(default)]
    pub updated_at: i64,
    /// Epoch milliseconds of first discovery. Set once, never refreshed.
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub official_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_closes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mint_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mint_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raffle_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_link: Option<String>,
    /// One-shot guard: this raffle was already forwarded to the dapp.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub published: bool,
    /// One-shot guard: auto-registration already ran for this raffle.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_registered: bool,
}

impl RaffleRecord {
    /// Build a fresh record discovered at `now`.
    pub fn new(name: impl Into<String>, status: RaffleStatus, now: i64) -> Self {
        RaffleRecord {
            name: name.into(),
            status,
            updated_at: now,
            created_at: now,
            ..RaffleRecord::default()
        }
    }
}

/// All raffles tracked for one wallet, keyed by raffle page root URL.
pub type WalletBucket = BTreeMap<String, RaffleRecord>;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// UI color scheme. Carried for the surfaces; the core never reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    #[default]
    Dark,
    Light,
}

/// The root persisted object. The settings store owns the canonical
/// copy; every other component holds a read-only snapshot until the
/// broadcaster hands it a newer one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Absent in legacy payloads; serde fills 0 and the store migrates.
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub color_scheme: ColorScheme,
    /// Minutes between re-polls of a given raffle. The configured
    /// minimum is clamped at the router edge, not here.
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Ordered wallet addresses. Order matters only for display and for
    /// `selected_wallet` indexing.
    #[serde(default)]
    pub wallets: Vec<String>,
    /// Index into `wallets` of the wallet the UI is focused on.
    #[serde(default)]
    pub selected_wallet: usize,
    #[serde(default)]
    pub auto_delete_lost: bool,
    #[serde(default)]
    pub auto_watch_on_register: bool,
    #[serde(default)]
    pub auto_open_registration_links: bool,
    #[serde(default)]
    pub send_premint_raffles_to_dapp: bool,
    /// wallet address -> raffle URL -> record.
    #[serde(default)]
    pub raffles: BTreeMap<String, WalletBucket>,
    /// Transient: true only until the store first hydrates.
    #[serde(default)]
    pub is_loading: bool,
}

fn default_interval() -> u32 {
    DEFAULT_INTERVAL_MINUTES
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            schema_version: SCHEMA_VERSION,
            color_scheme: ColorScheme::Dark,
            interval: DEFAULT_INTERVAL_MINUTES,
            wallets: Vec::new(),
            selected_wallet: 0,
            auto_delete_lost: false,
            auto_watch_on_register: false,
            auto_open_registration_links: false,
            send_premint_raffles_to_dapp: false,
            raffles: BTreeMap::new(),
            is_loading: true,
        }
    }
}

impl Settings {
    /// The raffle bucket for `wallet`, if any raffles are tracked for it.
    pub fn bucket(&self, wallet: &str) -> Option<&WalletBucket> {
        self.raffles.get(wallet)
    }

    /// The address of the currently selected wallet, if the index is valid.
    pub fn selected_wallet_address(&self) -> Option<&str> {
        self.wallets.get(self.selected_wallet).map(String::as_str)
    }
}

/// Epoch milliseconds now. Pure functions take `now` as a parameter so
/// tests stay deterministic; this is the single production clock source.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
