// Pure merge of poll and scrape results onto a settings snapshot.
//
// Nothing here touches the network or the store: callers pass the
// current snapshot and a timestamp, and get back either the borrowed
// input (nothing changed, skip the write) or a new owned snapshot.
// The input is never mutated.

use std::borrow::Cow;

use crate::protocol::{PollResult, ScrapeResult};
use crate::settings::{RaffleRecord, RaffleStatus, Settings};

/// Apply one wallet's batch of poll results.
///
/// For each result whose record still exists: set `status` and refresh
/// `updated_at` (the refresh is what resets the staleness clock, so it
/// happens even when the status is unchanged). When `autoDeleteLost` is
/// set and the incoming status is `lost`, the record is removed instead
/// of updated. Results for a wallet or URL that vanished since the poll
/// started are dropped -- a concurrent delete is never resurrected.
pub fn apply_poll_results<'a>(
    current: &'a Settings,
    wallet: &str,
    results: &[PollResult],
    now: i64,
) -> Cow<'a, Settings> {
    let Some(bucket) = current.raffles.get(wallet) else {
        return Cow::Borrowed(current);
    };
    if !results.iter().any(|r| bucket.contains_key(&r.url)) {
        return Cow::Borrowed(current);
    }

    let auto_delete_lost = current.auto_delete_lost;
    let mut next = current.clone();
    let bucket = next
        .raffles
        .get_mut(wallet)
        .expect("bucket existed in the source snapshot");

    for result in results {
        if !bucket.contains_key(&result.url) {
            continue;
        }
        if auto_delete_lost && result.status == RaffleStatus::Lost {
            bucket.remove(&result.url);
        } else if let Some(record) = bucket.get_mut(&result.url) {
            record.status = result.status;
            record.updated_at = now;
        }
    }

    Cow::Owned(next)
}

/// Insert or merge a scraped raffle into a wallet's bucket.
///
/// `created_at` is set only on first discovery; `updated_at` always
/// refreshes. Fields the extractor produced overwrite, fields it
/// omitted are preserved. A missing name falls back to the URL.
pub fn apply_scrape<'a>(
    current: &'a Settings,
    wallet: &str,
    scrape: &ScrapeResult,
    now: i64,
) -> Cow<'a, Settings> {
    let mut next = current.clone();
    let bucket = next.raffles.entry(wallet.to_string()).or_default();

    let record = bucket.entry(scrape.url.clone()).or_insert_with(|| {
        RaffleRecord::new(
            scrape.name.clone().unwrap_or_else(|| scrape.url.clone()),
            scrape.status.unwrap_or(RaffleStatus::Unknown),
            now,
        )
    });

    if let Some(name) = &scrape.name {
        record.name = name.clone();
    }
    if let Some(status) = scrape.status {
        record.status = status;
    }
    record.updated_at = now;

    if let Some(v) = &scrape.official_link {
        record.official_link = Some(v.clone());
    }
    if let Some(v) = &scrape.registration_closes {
        record.registration_closes = Some(v.clone());
    }
    if let Some(v) = &scrape.mint_date {
        record.mint_date = Some(v.clone());
    }
    if let Some(v) = &scrape.mint_price {
        record.mint_price = Some(v.clone());
    }
    if let Some(v) = &scrape.raffle_time {
        record.raffle_time = Some(v.clone());
    }
    if let Some(v) = &scrape.twitter_link {
        record.twitter_link = Some(v.clone());
    }
    if let Some(v) = &scrape.discord_link {
        record.discord_link = Some(v.clone());
    }

    Cow::Owned(next)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
