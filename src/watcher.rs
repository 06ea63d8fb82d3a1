use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{
    ERROR_BACKOFF_SECS, MAX_CONSECUTIVE_ERRORS, PAUSE_CHECK_SECS, POLL_INTERVAL_MAX_SECS,
    POLL_INTERVAL_MIN_SECS,
};
use crate::error::Result;
use crate::fetcher;
use crate::notify::{disabled_notification, offer_notification};
use crate::parser;
use crate::state::FilterStore;
use crate::types::{offer_fingerprint, FilterSpec, Notification, Offer, OwnerId};

// ---------------------------------------------------------------------------
// Shared context + timing
// ---------------------------------------------------------------------------

/// Handles every watcher needs; cheap to clone per spawn.
#[derive(Clone)]
pub struct WatcherContext {
    pub store: Arc<FilterStore>,
    pub client: reqwest::Client,
    pub notify_tx: mpsc::Sender<Notification>,
    /// Configured channel names in priority order; first is the fallback
    /// target for filters with no channel of their own.
    pub fallback_channels: Vec<String>,
}

/// Sleep knobs for the polling loop. Tests compress these to keep runtime
/// short; production uses the config defaults.
#[derive(Debug, Clone)]
pub struct PollTiming {
    pub poll_min: Duration,
    pub poll_max: Duration,
    pub pause_check: Duration,
    pub error_backoff: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            poll_min: Duration::from_secs_f64(POLL_INTERVAL_MIN_SECS),
            poll_max: Duration::from_secs_f64(POLL_INTERVAL_MAX_SECS),
            pause_check: Duration::from_secs(PAUSE_CHECK_SECS),
            error_backoff: Duration::from_secs(ERROR_BACKOFF_SECS),
        }
    }
}

// ---------------------------------------------------------------------------
// OfferWatcher
// ---------------------------------------------------------------------------

/// One polling loop per active filter. Fetches the filter's listing page,
/// emits a notification for every new in-range offer, and deactivates the
/// filter after too many consecutive failures.
///
/// The dedup set lives and dies with the loop: a restarted filter notifies
/// everything currently on the page again.
pub struct OfferWatcher {
    ctx: WatcherContext,
    timing: PollTiming,
    owner: OwnerId,
    filter_id: u64,
    /// Channel this loop delivers to, resolved lazily on first need and
    /// fixed afterwards.
    channel: Option<String>,
    seen: HashSet<String>,
    consecutive_errors: u32,
}

impl OfferWatcher {
    pub fn new(ctx: WatcherContext, owner: OwnerId, filter_id: u64, timing: PollTiming) -> Self {
        Self {
            ctx,
            timing,
            owner,
            filter_id,
            channel: None,
            seen: HashSet::new(),
            consecutive_errors: 0,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        loop {
            // Re-read our own entry every cycle: the pause flag and price
            // bounds are mutated by command handlers while we run.
            let Some(spec) = self.ctx.store.filter_state(self.owner, self.filter_id) else {
                debug!(
                    owner = self.owner,
                    filter_id = self.filter_id,
                    "Filter entry gone, watcher exiting"
                );
                return;
            };

            if spec.paused {
                tokio::time::sleep(self.timing.pause_check).await;
                continue;
            }

            match self.poll_once(&spec).await {
                Ok(matched) => {
                    self.consecutive_errors = 0;
                    if matched > 0 {
                        info!(
                            owner = self.owner,
                            filter = %spec.name,
                            matched,
                            "Matched {matched} new offers",
                        );
                    }
                    tokio::time::sleep(self.poll_interval()).await;
                }
                Err(e) => {
                    self.consecutive_errors += 1;
                    warn!(
                        owner = self.owner,
                        filter = %spec.name,
                        attempt = self.consecutive_errors,
                        "Poll failed: {e}"
                    );
                    if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        self.deactivate(&spec).await;
                        return;
                    }
                    tokio::time::sleep(self.timing.error_backoff).await;
                }
            }
        }
    }

    /// One fetch-parse-match cycle. Returns how many new offers matched.
    async fn poll_once(&mut self, spec: &FilterSpec) -> Result<usize> {
        let html = fetcher::fetch_listing_page(&self.ctx.client, &spec.url).await?;
        let offers = parser::parse_offers(&html);
        let fresh = select_new_offers(&offers, spec.min_price, spec.max_price, &mut self.seen);
        let matched = fresh.len();

        for offer in fresh {
            let channel = self.resolve_channel(spec);
            let note = offer_notification(channel, &spec.url, &offer);
            if self.ctx.notify_tx.send(note).await.is_err() {
                warn!("Notification queue closed, dropping offer alert");
            }
        }
        Ok(matched)
    }

    /// Bind the loop to its delivery channel: the filter's own channel if it
    /// was created with one, otherwise the first configured channel. Cached —
    /// the binding never changes for the loop's lifetime.
    fn resolve_channel(&mut self, spec: &FilterSpec) -> Option<String> {
        if self.channel.is_none() {
            self.channel = spec
                .channel
                .clone()
                .or_else(|| self.ctx.fallback_channels.first().cloned());
        }
        self.channel.clone()
    }

    /// Error-threshold exit: tell the user once, remove our own entry (which
    /// persists the registry), and let the loop return.
    async fn deactivate(&mut self, spec: &FilterSpec) {
        warn!(
            owner = self.owner,
            url = %spec.url,
            "Disabling filter after {MAX_CONSECUTIVE_ERRORS} consecutive errors"
        );
        let channel = self.resolve_channel(spec);
        let note = disabled_notification(channel, spec);
        let _ = self.ctx.notify_tx.send(note).await;
        self.ctx.store.remove_by_id(self.owner, self.filter_id);
    }

    fn poll_interval(&self) -> Duration {
        let lo = self.timing.poll_min.as_secs_f64();
        let hi = self.timing.poll_max.as_secs_f64();
        if hi <= lo {
            return self.timing.poll_min;
        }
        let secs = rand::rng().random_range(lo..hi);
        Duration::from_secs_f64(secs)
    }
}

/// Apply the price-range predicate (inclusive on both ends) and the
/// loop-local dedup filter. Fingerprints of returned offers are recorded in
/// `seen` so later cycles skip them.
pub fn select_new_offers(
    offers: &[Offer],
    min_price: f64,
    max_price: f64,
    seen: &mut HashSet<String>,
) -> Vec<Offer> {
    let mut fresh = Vec::new();
    for offer in offers {
        if offer.price < min_price || offer.price > max_price {
            continue;
        }
        if !seen.insert(offer_fingerprint(offer)) {
            continue;
        }
        fresh.push(offer.clone());
    }
    fresh
}
