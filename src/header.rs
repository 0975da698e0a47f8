//! Parsing for the two header grammars the proxy hands us: `Cache-Control`
//! (RFC 7234) and `Link` (RFC 5988, simplified). Both parsers are
//! best-effort: a malformed individual parameter is skipped rather than
//! aborting the whole parse, and a wholly unparsable input yields an empty
//! map. Neither parser performs I/O or percent-decoding; callers decode the
//! wire encoding first (see `protocol.rs`).

use std::collections::HashMap;

/// A `Cache-Control` directive value. Bare names (no `=value`) map to
/// `Bool(true)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CcValue {
    Bool(bool),
    Text(String),
}

impl CcValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CcValue::Text(s) => Some(s.as_str()),
            CcValue::Bool(_) => None,
        }
    }

    /// True for the bare-token sentinel (present without `=value`).
    pub fn is_bare_token(&self) -> bool {
        matches!(self, CcValue::Bool(true))
    }
}

pub type CacheControlMap = HashMap<String, CcValue>;

/// `Link` target parameters: lowercased attribute name to its value. A
/// parameter without a value maps to `None`.
pub type LinkParams = HashMap<String, Option<String>>;
pub type LinkMap = HashMap<String, LinkParams>;

/// Parse a `Cache-Control` header value into a case-folded directive map.
///
/// Empty input yields an empty map. Directives are comma-separated; each is
/// either a bare token or `token=value`, where `value` may be a
/// backslash-escaped quoted string.
pub fn parse_cache_control(input: &str) -> CacheControlMap {
    let mut out = HashMap::new();
    for raw in split_top_level(input, ',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        match raw.split_once('=') {
            Some((attr, value)) => {
                out.insert(attr.trim().to_lowercase(), CcValue::Text(unquote(value.trim())));
            }
            None => {
                out.insert(raw.to_lowercase(), CcValue::Bool(true));
            }
        }
    }
    out
}

/// Parse a `Link` header value into a URI to parameter-map table.
///
/// Each entry has the form `<URI-Reference>; param[=value]; ...`. Unparsable
/// entries (missing `<...>` delimiters) are skipped.
pub fn parse_link(input: &str) -> LinkMap {
    let mut out = HashMap::new();
    for raw in split_top_level(input, ',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let Some(rest) = raw.strip_prefix('<') else {
            continue;
        };
        let Some(close) = rest.find('>') else {
            continue;
        };
        let uri = &rest[..close];
        let params_str = &rest[close + 1..];

        let mut params = LinkParams::new();
        for param in params_str.split(';') {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            match param.split_once('=') {
                Some((k, v)) => {
                    params.insert(k.trim().to_lowercase(), Some(unquote(v.trim())));
                }
                None => {
                    params.insert(param.to_lowercase(), None);
                }
            }
        }
        out.insert(uri.to_string(), params);
    }
    out
}

/// Split on `sep`, but not inside a double-quoted run (so commas inside
/// quoted `Cache-Control`/`Link` parameter values don't get split on).
fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    if input.is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Strip a surrounding quoted-string and undo backslash-escapes. Leaves
/// unquoted input untouched.
fn unquote(input: &str) -> String {
    let bytes = input.as_bytes();
    if bytes.len() >= 2 && bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"' {
        let inner = &input[1..input.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                    continue;
                }
            }
            out.push(c);
        }
        out
    } else {
        input.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_parse_to_empty_maps() {
        assert!(parse_cache_control("").is_empty());
        assert!(parse_link("").is_empty());
    }

    #[test]
    fn cache_control_bare_and_valued_tokens() {
        let cc = parse_cache_control(r#"channel-maxage, channel="http://ex/feed""#);
        assert_eq!(cc.get("channel-maxage"), Some(&CcValue::Bool(true)));
        assert!(cc.get("channel-maxage").unwrap().is_bare_token());
        assert_eq!(
            cc.get("channel").and_then(CcValue::as_text),
            Some("http://ex/feed")
        );
    }

    #[test]
    fn cache_control_is_case_folded_on_name() {
        let cc = parse_cache_control("Max-Age=120");
        assert_eq!(cc.get("max-age").and_then(CcValue::as_text), Some("120"));
    }

    #[test]
    fn link_with_rev_invalidates() {
        let links = parse_link(r#"<http://ex/group>; rev="invalidates""#);
        let params = links.get("http://ex/group").unwrap();
        assert_eq!(params.get("rev").unwrap().as_deref(), Some("invalidates"));
    }

    #[test]
    fn link_param_without_value() {
        let links = parse_link("<http://ex/a>; noval");
        let params = links.get("http://ex/a").unwrap();
        assert_eq!(params.get("noval"), Some(&None));
    }

    #[test]
    fn malformed_link_entry_is_skipped_not_fatal() {
        let links = parse_link("not-a-link, <http://ex/b>; rev=invalidates");
        assert_eq!(links.len(), 1);
        assert!(links.contains_key("http://ex/b"));
    }

    #[test]
    fn quoted_value_with_escaped_quote() {
        let cc = parse_cache_control(r#"channel="http://ex/a\"b""#);
        assert_eq!(
            cc.get("channel").and_then(CcValue::as_text),
            Some(r#"http://ex/a"b"#)
        );
    }
}
