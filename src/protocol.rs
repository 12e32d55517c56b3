// Typed messages between the surfaces (popup, options page, content
// scripts) and the application loop.
//
// The wire shape is a flat JSON object tagged by which marker field is
// present -- the shape the surfaces have always sent. `RawRequest`
// captures that shape; `Request` is the exhaustive sum type the router
// actually dispatches on, so an unhandled request kind is a compile
// error rather than a silently dead branch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settings::{RaffleStatus, Settings, WalletBucket};

// ---------------------------------------------------------------------------
// Poller / extractor payloads
// ---------------------------------------------------------------------------

/// Outcome of one status probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub url: String,
    pub status: RaffleStatus,
}

/// What a surface's extractor produced for one raffle page. The
/// extractor's heuristics are its own business; this is the whole
/// contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScrapeResult {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RaffleStatus>,
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
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// The flat request object as it arrives from a surface.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RawRequest {
    /// Optional correlation id, echoed in the response.
    pub id: Option<Value>,
    pub get_settings: Option<bool>,
    pub set_settings: Option<bool>,
    pub settings: Option<Settings>,
    pub clear_settings: Option<bool>,
    pub report_scrape: Option<bool>,
    pub scrape: Option<ScrapeResult>,
    pub raffles: Option<WalletBucket>,
    pub wallet: Option<String>,
    pub selected_wallet: Option<usize>,
    pub verify_address: Option<String>,
    pub auto_register: Option<bool>,
    pub twitter_handle: Option<String>,
    pub discord_link: Option<String>,
}

/// A surface request, one variant per operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    GetSettings,
    SetSettings(Box<Settings>),
    ClearSettings,
    /// Badge refresh only; nothing is persisted.
    ReportRaffles {
        raffles: WalletBucket,
        selected_wallet: usize,
    },
    VerifyWallet {
        address: String,
    },
    AutoRegister {
        twitter_handle: Option<String>,
        discord_link: Option<String>,
    },
    /// A content script discovered (or re-scraped) a raffle page.
    ReportScrape {
        wallet: String,
        scrape: ScrapeResult,
    },
    /// None of the marker fields matched. Gets an explicit error
    /// response; never silently dropped.
    Unknown,
}

fn flag(value: &Option<bool>) -> bool {
    *value == Some(true)
}

impl From<RawRequest> for Request {
    /// Conversion precedence is fixed: the first matching marker wins,
    /// so a malformed request carrying several markers still resolves
    /// deterministically.
    fn from(raw: RawRequest) -> Self {
        if flag(&raw.get_settings) {
            Request::GetSettings
        } else if flag(&raw.set_settings) {
            match raw.settings {
                Some(settings) => Request::SetSettings(Box::new(settings)),
                None => Request::Unknown,
            }
        } else if flag(&raw.clear_settings) {
            Request::ClearSettings
        } else if flag(&raw.report_scrape) {
            match (raw.wallet, raw.scrape) {
                (Some(wallet), Some(scrape)) if !scrape.url.is_empty() => {
                    Request::ReportScrape { wallet, scrape }
                }
                _ => Request::Unknown,
            }
        } else if let Some(raffles) = raw.raffles {
            Request::ReportRaffles {
                raffles,
                selected_wallet: raw.selected_wallet.unwrap_or(0),
            }
        } else if let Some(address) = raw.verify_address {
            Request::VerifyWallet { address }
        } else if flag(&raw.auto_register) {
            Request::AutoRegister {
                twitter_handle: raw.twitter_handle,
                discord_link: raw.discord_link,
            }
        } else {
            Request::Unknown
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Exactly one of these goes back per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    #[serde(rename_all = "camelCase")]
    Settings { settings: Box<Settings> },
    #[serde(rename_all = "camelCase")]
    Cleared { cleared: bool },
    #[serde(rename_all = "camelCase")]
    BadgeUpdated { badge_updated: bool },
    #[serde(rename_all = "camelCase")]
    Authenticated { authenticated: bool },
    #[serde(rename_all = "camelCase")]
    AutoRegister { auto_register_started: bool },
    #[serde(rename_all = "camelCase")]
    Error { error: String },
}

impl Response {
    pub fn settings(settings: Settings) -> Self {
        Response::Settings {
            settings: Box::new(settings),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }

    pub fn unknown_request() -> Self {
        Response::error("unknown request")
    }
}

/// Response plus the echoed correlation id.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub body: Response,
}

impl ResponseEnvelope {
    pub fn new(id: Option<Value>, body: Response) -> Self {
        ResponseEnvelope { id, body }
    }

    pub fn to_json(&self) -> String {
        // Serialization of these shapes cannot fail; fall back to a
        // bare error object rather than panicking mid-connection.
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"error":"serialization failure"}"#.to_string())
    }
}

// ---------------------------------------------------------------------------
// Broadcast notices
// ---------------------------------------------------------------------------

/// Badge summary shown on the browser action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub text: String,
    pub color: String,
}

/// Fire-and-forget notices pushed to every connected surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerNotice {
    #[serde(rename_all = "camelCase")]
    SettingsUpdated {
        settings_updated: bool,
        settings: Box<Settings>,
    },
    #[serde(rename_all = "camelCase")]
    Badge { badge: Badge },
    #[serde(rename_all = "camelCase")]
    AutoRegister {
        auto_register: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        twitter_handle: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        discord_link: Option<String>,
    },
}

impl ServerNotice {
    pub fn settings_updated(settings: Settings) -> Self {
        ServerNotice::SettingsUpdated {
            settings_updated: true,
            settings: Box::new(settings),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"error":"serialization failure"}"#.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
