// Request dispatch: the single entry point for surface requests.
//
// Every request gets exactly one response. Slow collaborator calls
// (entitlement check, automation driver) are spawned so the event loop
// never blocks on I/O; their responses are sent from the spawned task
// through the same per-connection reply channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::app::AppState;
use crate::protocol::{RawRequest, Request, Response, ResponseEnvelope};
use crate::reconcile;
use crate::settings::now_millis;

/// The message router. Owns the auto-register in-flight guard: a single
/// permit, so concurrent auto-register requests coalesce into one (later
/// requests are dropped, not queued).
pub struct Router {
    auto_register_guard: Arc<Semaphore>,
    auto_register_settle: Duration,
}

impl Router {
    pub fn new(auto_register_settle: Duration) -> Self {
        Router {
            auto_register_guard: Arc::new(Semaphore::new(1)),
            auto_register_settle,
        }
    }

    /// Parse and dispatch one raw request, sending the response (or
    /// arranging for a spawned task to send it) through `reply`.
    pub async fn handle(&self, state: &mut AppState, text: &str, reply: &Sender<String>) {
        let raw: RawRequest = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("malformed request: {e}");
                respond(reply, None, Response::error("malformed request")).await;
                return;
            }
        };
        let id = raw.id.clone();

        match Request::from(raw) {
            Request::GetSettings => {
                respond(reply, id, Response::settings(state.settings.clone())).await;
            }

            Request::SetSettings(next) => {
                let mut next = *next;
                let min = state.config.watcher.min_interval_minutes;
                if next.interval < min {
                    info!(
                        requested = next.interval,
                        min, "clamping interval to configured minimum"
                    );
                    next.interval = min;
                }
                next.is_loading = false;

                match state.commit(next) {
                    Ok(()) => {
                        respond(reply, id, Response::settings(state.settings.clone())).await;
                    }
                    Err(e) => {
                        warn!("setSettings write failed: {e}");
                        respond(reply, id, Response::error(format!("storage unavailable: {e}")))
                            .await;
                    }
                }
            }

            Request::ClearSettings => match state.clear() {
                Ok(()) => respond(reply, id, Response::Cleared { cleared: true }).await,
                Err(e) => {
                    warn!("clearSettings failed: {e}");
                    respond(reply, id, Response::error(format!("storage unavailable: {e}")))
                        .await;
                }
            },

            Request::ReportRaffles {
                raffles,
                selected_wallet,
            } => {
                // Informational only: badge refresh, no persistence.
                state
                    .broadcaster
                    .update_badge_for(Some(&raffles), selected_wallet);
                respond(reply, id, Response::BadgeUpdated { badge_updated: true }).await;
            }

            Request::VerifyWallet { address } => {
                let entitlement = Arc::clone(&state.entitlement);
                let reply = reply.clone();
                tokio::spawn(async move {
                    let authenticated = match entitlement.has_credential(&address).await {
                        Ok(held) => held,
                        Err(e) => {
                            // The surface owns user-visible messaging;
                            // a check failure is just "not authenticated".
                            warn!(%address, "entitlement check failed: {e}");
                            false
                        }
                    };
                    let envelope =
                        ResponseEnvelope::new(id, Response::Authenticated { authenticated });
                    let _ = reply.send(envelope.to_json()).await;
                });
            }

            Request::AutoRegister {
                twitter_handle,
                discord_link,
            } => match Arc::clone(&self.auto_register_guard).try_acquire_owned() {
                Ok(permit) => {
                    state.broadcaster.auto_register(twitter_handle, discord_link);
                    let settle = self.auto_register_settle;
                    // The permit rides along with the settle timer;
                    // until it drops, repeat requests coalesce.
                    tokio::spawn(async move {
                        tokio::time::sleep(settle).await;
                        drop(permit);
                    });
                    respond(
                        reply,
                        id,
                        Response::AutoRegister {
                            auto_register_started: true,
                        },
                    )
                    .await;
                }
                Err(_) => {
                    info!("auto-register already in flight, dropping request");
                    respond(
                        reply,
                        id,
                        Response::AutoRegister {
                            auto_register_started: false,
                        },
                    )
                    .await;
                }
            },

            Request::ReportScrape { wallet, scrape } => {
                let next =
                    reconcile::apply_scrape(&state.settings, &wallet, &scrape, now_millis())
                        .into_owned();
                match state.commit(next) {
                    Ok(()) => {
                        respond(reply, id, Response::settings(state.settings.clone())).await;
                    }
                    Err(e) => {
                        warn!("reportScrape write failed: {e}");
                        respond(reply, id, Response::error(format!("storage unavailable: {e}")))
                            .await;
                    }
                }
            }

            Request::Unknown => {
                respond(reply, id, Response::unknown_request()).await;
            }
        }
    }
}

async fn respond(reply: &Sender<String>, id: Option<serde_json::Value>, body: Response) {
    let envelope = ResponseEnvelope::new(id, body);
    let _ = reply.send(envelope.to_json()).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
