//! The freshness decision engine (§4.6): a pure, O(1)-per-query function
//! from a proxy request line and the current channel index to a FRESH or
//! STALE verdict. Never performs I/O and never panics on malformed input;
//! every uncertainty resolves to STALE.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use url::Url;

use crate::channel::{Channel, CLOCK_FUZZ, DEFAULT_LIFETIME, DEFAULT_PRECISION};
use crate::header::{self, CcValue};

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Fresh { freshness_secs: f64 },
    Stale,
}

/// One decision, fully resolved: what to tell the proxy, why, and whether
/// the queried channel needs to be registered as a side effect.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub req_id: String,
    pub verdict: Verdict,
    pub reason: String,
    pub register_channel: Option<String>,
}

/// Parse one proxy request line and decide its verdict against `channels`.
///
/// This is the entry point described in §4.7 step 3; it owns rule 0
/// (line framing) and then delegates to [`decide`] for everything else.
pub fn decide_line(
    line: &str,
    channels: &HashMap<String, Channel>,
    now: DateTime<Utc>,
    extend_pct: u32,
) -> Decision {
    let tokens: Vec<&str> = line.trim_end().split_whitespace().collect();
    let fallback_req_id = tokens.first().copied().unwrap_or("").to_string();

    let (req_id, request_uri, age_str, cc_raw, link_raw) = match tokens.as_slice() {
        [a, b, c, d, e] => (*a, *b, *c, *d, *e),
        _ => {
            return Decision {
                req_id: fallback_req_id,
                verdict: Verdict::Stale,
                reason: "malformed_line_error".to_string(),
                register_channel: None,
            }
        }
    };

    let Ok(age) = age_str.parse::<i64>() else {
        return Decision {
            req_id: req_id.to_string(),
            verdict: Verdict::Stale,
            reason: "malformed_line_error".to_string(),
            register_channel: None,
        };
    };

    let cc_decoded = percent_decode_str(cc_raw).decode_utf8_lossy().into_owned();
    let link_decoded = percent_decode_str(link_raw).decode_utf8_lossy().into_owned();
    let cc = header::parse_cache_control(&cc_decoded);
    let links = header::parse_link(&link_decoded);

    let mut decision = decide(request_uri, age, &cc, &links, channels, now, extend_pct);
    decision.req_id = req_id.to_string();
    decision
}

/// The rules-1-through-10 table of §4.6, in strict first-match-wins order.
pub fn decide(
    request_uri: &str,
    age: i64,
    cc: &header::CacheControlMap,
    links: &header::LinkMap,
    channels: &HashMap<String, Channel>,
    now: DateTime<Utc>,
    extend_pct: u32,
) -> Decision {
    let stale = |reason: &str, register: Option<String>| Decision {
        req_id: String::new(),
        verdict: Verdict::Stale,
        reason: reason.to_string(),
        register_channel: register,
    };

    // Rule 1: no channel-maxage advertised at all.
    let Some(channel_maxage) = cc.get("channel-maxage") else {
        return stale("no_channel_maxage", None);
    };

    // Rule 2: no channel advertised.
    let Some(channel_ref) = cc.get("channel").and_then(CcValue::as_text) else {
        return stale("no_channel_advertised", None);
    };

    let channel_uri = resolve(request_uri, channel_ref);

    // Rule 3: channel unknown to the manager, register it.
    let Some(channel) = channels.get(&channel_uri) else {
        return stale("channel_not_monitored", Some(channel_uri));
    };

    // Rule 4: no poll has completed yet.
    let Some(last_check) = channel.last_check else {
        return stale("channel_startup", None);
    };

    let now_ts = now.timestamp();
    let precision = channel.precision.unwrap_or(DEFAULT_PRECISION);
    let lifetime = channel.lifetime.unwrap_or(DEFAULT_LIFETIME);

    // Rule 5: poller hasn't kept up with its own precision promise.
    if now_ts > last_check + precision {
        return stale("channel_dead", None);
    }

    let response_cached = now_ts - age - CLOCK_FUZZ;

    // Rule 6: the cached request URI itself was invalidated.
    if let Some(&ts) = channel.events.get(request_uri) {
        if ts > response_cached {
            return stale("invalidated_request_uri", None);
        }
    }

    // Rule 7: any invalidation group (Link rev=invalidates) was invalidated.
    for (group_ref, params) in links {
        let is_invalidates = params
            .get("rev")
            .and_then(|v| v.as_deref())
            .map(|v| v.eq_ignore_ascii_case("invalidates"))
            .unwrap_or(false);
        if !is_invalidates {
            continue;
        }
        let group_uri = resolve(request_uri, group_ref);
        if let Some(&ts) = channel.events.get(&group_uri) {
            if ts > response_cached {
                return stale("invalidated_group_uri", None);
            }
        }
    }

    // Rules 8-9: channel-maxage, unless it's the bare "any age OK" sentinel.
    let mut parsed_maxage = None;
    if !channel_maxage.is_bare_token() {
        let Some(text) = channel_maxage.as_text() else {
            return stale("invalid_channel_maxage", None);
        };
        match text.parse::<i64>() {
            Ok(v) => parsed_maxage = Some(v),
            Err(_) => return stale("invalid_channel_maxage", None),
        }
    }
    if let Some(maxage) = parsed_maxage {
        if age > maxage {
            return stale("channel_maxage", None);
        }
    }

    // Rule 10: lifetime ceiling.
    if age > lifetime {
        return stale("channel_lifetime", None);
    }

    // Otherwise: FRESH, extended by precision * extend_pct / 100.
    let freshness_secs = precision as f64 * (extend_pct as f64 / 100.0);
    Decision {
        req_id: String::new(),
        verdict: Verdict::Fresh { freshness_secs },
        reason: format!("extended_{:.2}", freshness_secs),
        register_channel: None,
    }
}

/// Render a [`Decision`] as the single wire response line §6 specifies,
/// including the trailing newline.
pub fn format_response(decision: &Decision, now: DateTime<Utc>) -> String {
    match decision.verdict {
        Verdict::Fresh { freshness_secs } => format!(
            "{} FRESH freshness={:.2} res{{Date}}=\"{}\" log={}\n",
            decision.req_id,
            freshness_secs,
            now.format("%a, %d %b %Y %H:%M:%S GMT"),
            decision.reason
        ),
        Verdict::Stale => format!("{} STALE log={}\n", decision.req_id, decision.reason),
    }
}

/// Resolve a (possibly relative) channel/group reference against the
/// request URI, mirroring `urljoin` in the original implementation.
/// Falls back to the reference verbatim if either side fails to parse.
/// An unresolvable reference simply won't match any registered channel,
/// which the strict-STALE policy already treats safely.
fn resolve(base: &str, reference: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(reference)) {
        Ok(url) => url.to_string(),
        Err(_) => reference.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn channels_with(uri: &str, c: Channel) -> HashMap<String, Channel> {
        let mut m = Map::new();
        m.insert(uri.to_string(), c);
        m
    }

    #[test]
    fn malformed_line_has_too_few_fields() {
        let channels = HashMap::new();
        let d = decide_line("42 http://ex/obj 10", &channels, Utc::now(), 33);
        assert_eq!(d.reason, "malformed_line_error");
        assert_eq!(d.verdict, Verdict::Stale);
    }

    #[test]
    fn malformed_line_has_non_integer_age() {
        let channels = HashMap::new();
        let d = decide_line("42 http://ex/obj notanumber %22%22 %22%22", &channels, Utc::now(), 33);
        assert_eq!(d.reason, "malformed_line_error");
    }

    #[test]
    fn unknown_channel_registers_and_is_stale() {
        use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
        let channels = HashMap::new();
        let cc = utf8_percent_encode(r#"channel="http://ex/feed", channel-maxage"#, NON_ALPHANUMERIC)
            .to_string();
        let link = utf8_percent_encode("", NON_ALPHANUMERIC).to_string();
        let line = format!("42 http://example.com/obj 10 {} {}", cc, link);
        let d = decide_line(&line, &channels, Utc::now(), 33);
        assert_eq!(d.reason, "channel_not_monitored");
        assert_eq!(d.register_channel, Some("http://ex/feed".to_string()));
    }

    #[test]
    fn healthy_channel_extends_freshness() {
        let now = Utc::now();
        let mut c = Channel::new("http://ex/feed".into());
        c.precision = Some(60);
        c.lifetime = Some(3600);
        c.last_check = Some(now.timestamp() - 10);
        let channels = channels_with("http://ex/feed", c);

        let mut cc = header::CacheControlMap::new();
        cc.insert("channel".into(), CcValue::Text("http://ex/feed".into()));
        cc.insert("channel-maxage".into(), CcValue::Text("300".into()));
        let links = header::LinkMap::new();

        let d = decide("http://example.com/obj", 20, &cc, &links, &channels, now, 33);
        assert_eq!(
            d.verdict,
            Verdict::Fresh {
                freshness_secs: 19.8
            }
        );
        assert_eq!(d.reason, "extended_19.80");
    }

    #[test]
    fn invalidated_request_uri_is_stale() {
        let now = Utc::now();
        let mut c = Channel::new("http://ex/feed".into());
        c.precision = Some(60);
        c.lifetime = Some(3600);
        c.last_check = Some(now.timestamp() - 10);
        c.events
            .insert("http://example.com/obj".into(), now.timestamp() - 3);
        let channels = channels_with("http://ex/feed", c);

        let mut cc = header::CacheControlMap::new();
        cc.insert("channel".into(), CcValue::Text("http://ex/feed".into()));
        cc.insert("channel-maxage".into(), CcValue::Text("300".into()));
        let links = header::LinkMap::new();

        let d = decide("http://example.com/obj", 20, &cc, &links, &channels, now, 33);
        assert_eq!(d.verdict, Verdict::Stale);
        assert_eq!(d.reason, "invalidated_request_uri");
    }

    #[test]
    fn invalidated_group_via_link_rev() {
        let now = Utc::now();
        let mut c = Channel::new("http://ex/feed".into());
        c.precision = Some(60);
        c.lifetime = Some(3600);
        c.last_check = Some(now.timestamp() - 10);
        c.events.insert("http://ex/group".into(), now.timestamp() - 1);
        let channels = channels_with("http://ex/feed", c);

        let mut cc = header::CacheControlMap::new();
        cc.insert("channel".into(), CcValue::Text("http://ex/feed".into()));
        cc.insert("channel-maxage".into(), CcValue::Text("300".into()));
        let links = header::parse_link(r#"<http://ex/group>; rev="invalidates""#);

        let d = decide("http://example.com/obj", 30, &cc, &links, &channels, now, 33);
        assert_eq!(d.reason, "invalidated_group_uri");
    }

    #[test]
    fn channel_fell_behind_is_dead() {
        let now = Utc::now();
        let mut c = Channel::new("http://ex/feed".into());
        c.precision = Some(60);
        c.last_check = Some(now.timestamp() - 120);
        let channels = channels_with("http://ex/feed", c);

        let mut cc = header::CacheControlMap::new();
        cc.insert("channel".into(), CcValue::Text("http://ex/feed".into()));
        cc.insert("channel-maxage".into(), CcValue::Text("300".into()));
        let links = header::LinkMap::new();

        let d = decide("http://example.com/obj", 1, &cc, &links, &channels, now, 33);
        assert_eq!(d.reason, "channel_dead");
    }

    #[test]
    fn bare_channel_maxage_falls_through_to_lifetime() {
        let now = Utc::now();
        let mut c = Channel::new("http://ex/feed".into());
        c.precision = Some(60);
        c.lifetime = Some(3600);
        c.last_check = Some(now.timestamp() - 1);
        let channels = channels_with("http://ex/feed", c);

        let mut cc = header::CacheControlMap::new();
        cc.insert("channel".into(), CcValue::Text("http://ex/feed".into()));
        cc.insert("channel-maxage".into(), CcValue::Bool(true));
        let links = header::LinkMap::new();

        let fresh = decide("http://example.com/obj", 500, &cc, &links, &channels, now, 33);
        assert_eq!(fresh.verdict, Verdict::Fresh { freshness_secs: 19.8 });

        let stale = decide("http://example.com/obj", 4000, &cc, &links, &channels, now, 33);
        assert_eq!(stale.reason, "channel_lifetime");
    }

    #[test]
    fn maxage_boundary_is_inclusive() {
        let now = Utc::now();
        let mut c = Channel::new("http://ex/feed".into());
        c.precision = Some(60);
        c.lifetime = Some(3600);
        c.last_check = Some(now.timestamp() - 1);
        let channels = channels_with("http://ex/feed", c);

        let mut cc = header::CacheControlMap::new();
        cc.insert("channel".into(), CcValue::Text("http://ex/feed".into()));
        cc.insert("channel-maxage".into(), CcValue::Text("300".into()));
        let links = header::LinkMap::new();

        let ok = decide("http://example.com/obj", 300, &cc, &links, &channels, now, 33);
        assert!(matches!(ok.verdict, Verdict::Fresh { .. }));

        let over = decide("http://example.com/obj", 301, &cc, &links, &channels, now, 33);
        assert_eq!(over.reason, "channel_maxage");
    }

    #[test]
    fn format_response_fresh_and_stale() {
        let now = Utc::now();
        let fresh = Decision {
            req_id: "42".into(),
            verdict: Verdict::Fresh { freshness_secs: 19.8 },
            reason: "extended_19.80".into(),
            register_channel: None,
        };
        let line = format_response(&fresh, now);
        assert!(line.starts_with("42 FRESH freshness=19.80 res{Date}=\""));
        assert!(line.ends_with("log=extended_19.80\n"));

        let stale = Decision {
            req_id: "42".into(),
            verdict: Verdict::Stale,
            reason: "channel_dead".into(),
            register_channel: None,
        };
        assert_eq!(format_response(&stale, now), "42 STALE log=channel_dead\n");
    }
}
