//! The channel registry (§4.5): owns `channels`, the channel-URI
//! persistence, the GC timer, and the single main event loop the whole
//! process runs on.
//!
//! Everything that touches `channels` (proxy queries, poll completions,
//! GC) happens inside [`ChannelManager::run`]'s `tokio::select!` loop, so
//! there is never more than one reader/writer of it (§5).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::time::sleep;

use crate::channel::{Channel, ERROR_CHECK_SECS, GC_PERIOD_SECS, MIN_CHECK_TIME};
use crate::decision;
use crate::http::HttpFetcher;
use crate::poller::{self, ChannelSnapshot, PollOutcome};
use crate::protocol::ProxyProtocol;

type PollFuture = BoxFuture<'static, (String, PollOutcome)>;

/// §4.4.2 reschedule interval for a successful poll: the remaining time
/// until `precision` elapses, shortened by `extend_pct`, never below
/// `MIN_CHECK_TIME`.
fn reschedule_wait(precision: i64, elapsed: f64, extend_pct: u32) -> f64 {
    let extend_frac = extend_pct as f64 / 100.0;
    ((precision as f64 - elapsed) * (1.0 - extend_frac)).max(MIN_CHECK_TIME)
}

/// §4.4.2 reschedule interval for a failed poll: retry after the
/// channel's last confirmed `precision` if one exists, otherwise after
/// `ERROR_CHECK_SECS` (never after a made-up default).
fn error_retry_wait(precision_hint: Option<i64>) -> u64 {
    precision_hint.unwrap_or(ERROR_CHECK_SECS).max(0) as u64
}

pub struct ChannelManager {
    channels: HashMap<String, Channel>,
    fetcher: HttpFetcher,
    dbfile: PathBuf,
    extend_pct: u32,
    pending: FuturesUnordered<PollFuture>,
}

impl ChannelManager {
    pub fn new(dbfile: PathBuf, fetcher: HttpFetcher, extend_pct: u32) -> Self {
        Self {
            channels: HashMap::new(),
            fetcher,
            dbfile,
            extend_pct,
            pending: FuturesUnordered::new(),
        }
    }

    /// §4.5 `start()`: load the channel-URI set from `dbfile` and register
    /// each, which schedules its first poll immediately.
    pub fn load(&mut self) {
        match fs::read_to_string(&self.dbfile) {
            Ok(contents) => {
                for line in contents.lines() {
                    let uri = line.trim();
                    if !uri.is_empty() {
                        self.add_channel(uri.to_string());
                    }
                }
            }
            Err(e) => log::info!("db_read_error ({})", e),
        }
    }

    /// §3 Lifecycle / §4.5 `add_channel`: idempotent. A second call for an
    /// already-known URI changes nothing; channels are never re-created or
    /// rescheduled just because they were queried again.
    pub fn add_channel(&mut self, uri: String) -> bool {
        if self.channels.contains_key(&uri) {
            return false;
        }
        self.channels.insert(uri.clone(), Channel::new(uri.clone()));
        log::info!("new_channel_added <{}>", uri);
        self.schedule_poll(uri, Duration::ZERO);
        true
    }

    fn schedule_poll(&mut self, uri: String, delay: Duration) {
        let Some(channel) = self.channels.get(&uri) else {
            return;
        };
        let snapshot = ChannelSnapshot {
            uri: channel.uri.clone(),
            precision: channel.precision,
            lifetime: channel.lifetime,
            events: channel.events.clone(),
            last_archive_seen: channel.last_archive_seen.clone(),
        };
        let fetcher = self.fetcher.clone();
        log::debug!("schedule_check <{}> {:.2}", uri, delay.as_secs_f64());

        self.pending.push(Box::pin(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            let outcome = poller::poll_once(&fetcher, snapshot).await;
            (uri, outcome)
        }));
    }

    /// §4.4.2 reschedule rule, applied on poll completion.
    fn handle_poll_result(&mut self, uri: String, outcome: PollOutcome) {
        match outcome {
            Ok(delta) => {
                let precision = delta.precision;
                let elapsed = delta.elapsed_secs;
                if let Some(channel) = self.channels.get_mut(&uri) {
                    channel.precision = Some(delta.precision);
                    channel.lifetime = Some(delta.lifetime);
                    channel.events = delta.events;
                    channel.last_archive_seen = delta.last_archive_seen;
                    channel.last_check = Some(Utc::now().timestamp());
                    channel.last_check_elapsed = elapsed;
                }
                log::debug!("check_done <{}> {:.2}", uri, elapsed);

                let wait = reschedule_wait(precision, elapsed, self.extend_pct);
                if wait <= MIN_CHECK_TIME {
                    log::warn!("check_delay <{}>; using min_check_time", uri);
                }
                self.schedule_poll(uri, Duration::from_secs_f64(wait));
            }
            Err(failure) => {
                log::warn!("check_error <{}> {}", uri, failure.message);
                let wait = error_retry_wait(failure.precision_hint);
                self.schedule_poll(uri, Duration::from_secs(wait));
            }
        }
    }

    /// Decide one proxy request line, applying the one side effect the
    /// decision table can trigger (registering an unmonitored channel),
    /// and render the wire response.
    pub fn query(&mut self, line: &str) -> String {
        let now = Utc::now();
        let decision = decision::decide_line(line, &self.channels, now, self.extend_pct);
        if let Some(uri) = decision.register_channel.clone() {
            self.add_channel(uri);
        }
        decision::format_response(&decision, now)
    }

    /// §4.5 garbage collection: for each channel with a known `lifetime`,
    /// drop events older than it (invariant #2). Channels whose `lifetime`
    /// has never been confirmed by a poll are skipped and logged, since
    /// there's no value to GC against yet.
    pub fn gc(&mut self) {
        log::info!("garbage_collection");
        let now = Utc::now().timestamp();
        for channel in self.channels.values_mut() {
            match channel.lifetime {
                Some(lifetime) => {
                    let removed = channel.gc(now, lifetime);
                    if removed > 0 {
                        log::debug!("gc_event <{}> removed {}", channel.uri, removed);
                    }
                }
                None => log::info!("no_lifetime <{}>", channel.uri),
            }
        }
    }

    /// §4.5 `shutdown()`: rewrite `dbfile` with exactly the current channel
    /// URI set, one per line. Event indices are never persisted.
    pub fn persist(&self) -> std::io::Result<()> {
        let mut out = String::new();
        for uri in self.channels.keys() {
            out.push_str(uri);
            out.push('\n');
        }
        fs::write(&self.dbfile, out)
    }

    #[cfg(test)]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// The single main event loop (§5): every mutation of `channels`
    /// happens here, whether it comes from a proxy query, a poll
    /// completion, or the GC timer.
    pub async fn run(mut self, mut protocol: ProxyProtocol) -> std::io::Result<()> {
        let mut gc_interval = tokio::time::interval(Duration::from_secs(GC_PERIOD_SECS));
        gc_interval.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                line = protocol.next_request() => {
                    match line? {
                        Some(line) => {
                            log::debug!("handler_request {}", line);
                            let response = self.query(&line);
                            protocol.respond(&response).await?;
                            log::debug!("handler_response {}", response.trim_end());
                        }
                        None => break, // EOF: connectionLost
                    }
                }
                Some((uri, outcome)) = self.pending.next(), if !self.pending.is_empty() => {
                    self.handle_poll_result(uri, outcome);
                }
                _ = gc_interval.tick() => {
                    self.gc();
                }
                _ = tokio::signal::ctrl_c() => {
                    break;
                }
            }
        }

        log::info!("stop_manager");
        if let Err(e) = self.persist() {
            log::error!("db_write_error ({})", e);
        }
        Ok(())
    }
}
