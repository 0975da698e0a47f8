//! The [`Channel`] data model: a monitored invalidation feed and its
//! in-memory event index, plus the constants governing defaults,
//! scheduling floors, and garbage collection.

use std::collections::HashMap;

/// §3: default `precision` when a channel's feed head has not yet
/// advertised one.
pub const DEFAULT_PRECISION: i64 = 60;
/// §3: default `lifetime` when a channel's feed head has not yet
/// advertised one.
pub const DEFAULT_LIFETIME: i64 = 604_800;
/// §4.4.2: floor under which the reschedule interval is never allowed to
/// fall.
pub const MIN_CHECK_TIME: f64 = 5.0;
/// §4.4.2: fallback reschedule interval on failure when `precision` is not
/// yet known.
pub const ERROR_CHECK_SECS: i64 = 30;
/// §4.5: how often the garbage-collection sweep runs.
pub const GC_PERIOD_SECS: u64 = 60 * 60 * 24;
/// §4.6: clock-fuzz slack applied when comparing event timestamps against
/// the cached response's store time.
pub const CLOCK_FUZZ: i64 = 5;

/// A monitored invalidation feed and everything known about it.
///
/// `precision`/`lifetime` are `None` until a poll has actually completed
/// and confirmed them; callers that need a value regardless (the max-age
/// request header, the decision engine's freshness/lifetime checks) fall
/// back to `DEFAULT_PRECISION`/`DEFAULT_LIFETIME` explicitly at the point
/// of use. Nothing should default them implicitly, since "unconfirmed" is
/// itself meaningful: it's what distinguishes a brand-new channel's first
/// failed poll (retry after `ERROR_CHECK_SECS`) from a channel whose
/// `precision` is already known (retry after that `precision`), and what
/// distinguishes "skip GC, lifetime unknown" from "GC against a real
/// lifetime".
///
/// Mutated only by its owning poller (on poll completion) and by the GC
/// sweep (§3 Lifecycle); never destroyed within a process.
#[derive(Debug, Clone)]
pub struct Channel {
    pub uri: String,
    pub precision: Option<i64>,
    pub lifetime: Option<i64>,
    /// Event URI to the UTC unix-seconds timestamp of its most recent
    /// stale-event. Monotone non-decreasing per key (invariant #1).
    pub events: HashMap<String, i64>,
    pub last_check: Option<i64>,
    pub last_check_elapsed: f64,
    pub last_archive_seen: Option<String>,
}

impl Channel {
    /// A freshly registered channel: no poll has completed yet, so every
    /// query against it is `channel_startup`-STALE until its first commit.
    pub fn new(uri: String) -> Self {
        Self {
            uri,
            precision: None,
            lifetime: None,
            events: HashMap::new(),
            last_check: None,
            last_check_elapsed: 0.0,
            last_archive_seen: None,
        }
    }

    /// Remove every event older than `lifetime` relative to `now`
    /// (invariant #2). GC only ever tightens the event index, never
    /// invents data in it. Callers must not call this for a channel whose
    /// `lifetime` is still unknown; see `ChannelManager::gc`.
    pub fn gc(&mut self, now: i64, lifetime: i64) -> usize {
        let cutoff = now - lifetime;
        let before = self.events.len();
        self.events.retain(|_, &mut ts| ts >= cutoff);
        before - self.events.len()
    }
}

/// Apply the §4.4.1 monotone event-merge rule to `events` in place,
/// returning the URIs whose timestamp had no prior value (`ts is None`
/// substitution already applied by the caller).
pub fn merge_events(events: &mut HashMap<String, i64>, new_events: &[(String, i64)]) {
    for (uri, ts) in new_events {
        let keep = events.get(uri).map(|&prev| *ts > prev).unwrap_or(true);
        if keep {
            events.insert(uri.clone(), *ts);
        }
    }
}
