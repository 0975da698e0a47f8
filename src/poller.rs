//! One poll cycle of one channel: fetch the head, walk the archive chain,
//! and produce a delta the manager applies atomically on its main loop.
//!
//! The poller never sees the manager's shared state directly. It works
//! off a value snapshot and returns a [`PollOutcome`], so there is no cycle
//! between poller and manager and no shared mutable state to race on.

use std::collections::HashMap;
use std::time::Instant;

use crate::channel::{self, merge_events};
use crate::feed_parser;
use crate::http::HttpFetcher;

/// The slice of channel state a poll cycle needs to start.
///
/// `precision`/`lifetime` are `None` exactly when no poll has yet
/// confirmed them for this channel (mirrors `Channel`; see its doc
/// comment for why that distinction has to survive into the snapshot).
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    pub uri: String,
    pub precision: Option<i64>,
    pub lifetime: Option<i64>,
    pub events: HashMap<String, i64>,
    pub last_archive_seen: Option<String>,
}

/// What a successful poll cycle changes about its channel. Applied to the
/// channel atomically by the manager; never partially applied.
#[derive(Debug)]
pub struct PollDelta {
    pub precision: i64,
    pub lifetime: i64,
    pub events: HashMap<String, i64>,
    pub last_archive_seen: Option<String>,
    pub elapsed_secs: f64,
}

#[derive(Debug)]
pub struct PollFailure {
    pub message: String,
    /// `precision` to fall back on when scheduling the retry, if it was
    /// already known before this (failed) cycle.
    pub precision_hint: Option<i64>,
}

pub type PollOutcome = Result<PollDelta, PollFailure>;

/// Run one poll cycle for `snapshot`, fetching its head and walking as much
/// of its archive chain as succeeds.
///
/// Only a head-fetch failure fails the whole cycle (`Err`). A failure
/// partway through the archive walk stops the walk but still commits
/// everything gathered so far, preserving the "last archive seen only
/// advances forward" invariant under partial archive failures.
pub async fn poll_once(fetcher: &HttpFetcher, snapshot: ChannelSnapshot) -> PollOutcome {
    let start = Instant::now();
    // `None` here means this channel's precision has never been confirmed
    // by a successful poll, so a failure falls back to `ERROR_CHECK_SECS`
    // rather than a made-up precision (§4.4.2).
    let known_precision = snapshot.precision;
    let max_age = snapshot.precision.unwrap_or(channel::DEFAULT_PRECISION);

    let head_bytes = fetcher
        .get(
            &snapshot.uri,
            &[("Cache-Control", format!("max-age={}", max_age))],
        )
        .await
        .map_err(|e| PollFailure {
            message: format!("head fetch failed: {}", e),
            precision_hint: known_precision,
        })?;

    let head_doc = feed_parser::parse(&head_bytes, &snapshot.uri).map_err(|e| PollFailure {
        message: format!("head parse failed: {}", e),
        precision_hint: known_precision,
    })?;

    let precision = head_doc.metadata.precision.unwrap_or(channel::DEFAULT_PRECISION);
    let lifetime = head_doc.metadata.lifetime.unwrap_or(channel::DEFAULT_LIFETIME);

    let mut events = snapshot.events.clone();
    apply_events(&mut events, head_doc.events);

    // Walk the archive chain, newest first, recording both what we asked
    // for and what we actually got back.
    let mut archives_requested = Vec::new();
    let mut archives_seen = Vec::new();
    let mut next_prev = head_doc.head_links.get("prev-archive").cloned();

    while let Some(prev_uri) = next_prev {
        if Some(&prev_uri) == snapshot.last_archive_seen.as_ref() {
            break;
        }
        archives_requested.push(prev_uri.clone());

        let archive_bytes = fetcher
            .get(
                &prev_uri,
                &[("Cache-Control", format!("max-stale={}", lifetime))],
            )
            .await;

        let archive_bytes = match archive_bytes {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("archive_fetch_error <{}> {}", prev_uri, e);
                break;
            }
        };

        let archive_doc = match feed_parser::parse(&archive_bytes, &prev_uri) {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("archive_fetch_error <{}> {}", prev_uri, e);
                break;
            }
        };

        apply_events(&mut events, archive_doc.events);
        archives_seen.push(prev_uri.clone());
        next_prev = archive_doc.head_links.get("prev-archive").cloned();
    }

    // §4.4 step 5: oldest-first, longest successfully-fetched prefix wins.
    let mut last_archive_seen = snapshot.last_archive_seen.clone();
    for archive_uri in archives_requested.iter().rev() {
        if archives_seen.contains(archive_uri) {
            last_archive_seen = Some(archive_uri.clone());
        } else {
            break;
        }
    }

    Ok(PollDelta {
        precision,
        lifetime,
        events,
        last_archive_seen,
        elapsed_secs: start.elapsed().as_secs_f64(),
    })
}

fn apply_events(events: &mut HashMap<String, i64>, parsed: Vec<(String, Option<i64>)>) {
    let now = chrono::Utc::now().timestamp();
    let resolved: Vec<(String, i64)> = parsed
        .into_iter()
        .map(|(uri, ts)| {
            let ts = ts.unwrap_or_else(|| {
                log::warn!("bad_event_date <{}>", uri);
                now
            });
            (uri, ts)
        })
        .collect();
    merge_events(events, &resolved);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_events_substitutes_now_for_missing_timestamp() {
        let mut events = HashMap::new();
        apply_events(&mut events, vec![("u".into(), None)]);
        assert!(events.contains_key("u"));
        assert!(*events.get("u").unwrap() > 0);
    }

    #[test]
    fn apply_events_keeps_monotone_rule() {
        let mut events = HashMap::new();
        events.insert("u".into(), 1_000);
        apply_events(&mut events, vec![("u".into(), Some(500))]);
        assert_eq!(events["u"], 1_000);
        apply_events(&mut events, vec![("u".into(), Some(2_000))]);
        assert_eq!(events["u"], 2_000);
    }
}
