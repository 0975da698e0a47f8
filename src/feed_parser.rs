//! Parses a single channel feed document (Atom 1.0 plus the cache-channel
//! extension namespace) into the transient [`FeedDoc`] the poller merges
//! into its channel's index.
//!
//! Only the `cc:stale` entry operation is defined; any other entry content
//! is ignored, matching the one invalidation operation the wire format
//! currently carries.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use url::Url;

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const CC_NS: &str = "http://purl.org/syndication/cache-channel";

#[derive(Debug)]
pub enum Error {
    UnsupportedFeedFormat,
    Xml(roxmltree::Error),
    InvalidBaseUri(url::ParseError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedFeedFormat => write!(f, "feed format not recognized"),
            Self::Xml(e) => write!(f, "error parsing feed: {}", e),
            Self::InvalidBaseUri(e) => write!(f, "invalid base uri: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<roxmltree::Error> for Error {
    fn from(e: roxmltree::Error) -> Self {
        Self::Xml(e)
    }
}

/// Feed-head metadata in the cache-channel namespace. Each field is `None`
/// when the feed head has no such element; the poller substitutes its own
/// defaults.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FeedMetadata {
    pub precision: Option<i64>,
    pub lifetime: Option<i64>,
    pub archive_num: Option<i64>,
}

/// One `cc:stale` entry: the invalidated URI and the entry's `atom:updated`
/// as a UTC unix timestamp, or `None` if it failed to parse.
pub type StaleEvent = (String, Option<i64>);

/// Parsed result of a single feed fetch.
#[derive(Debug, Default, Clone)]
pub struct FeedDoc {
    /// `rel` (absent defaults to `"alternate"`) to absolute target URI.
    pub head_links: HashMap<String, String>,
    pub metadata: FeedMetadata,
    pub events: Vec<StaleEvent>,
}

/// Parse a feed document fetched from `base_uri`.
///
/// `base_uri` resolves every relative link (`atom:link/@href`) to an
/// absolute URI, since the protocol and decision engine deal only in
/// absolute URIs.
pub fn parse(bytes: &[u8], base_uri: &str) -> Result<FeedDoc, Error> {
    let base = Url::parse(base_uri).map_err(Error::InvalidBaseUri)?;
    let text = String::from_utf8_lossy(bytes);
    let doc = roxmltree::Document::parse(&text)?;

    let root = doc.root_element();
    if root.tag_name().namespace() != Some(ATOM_NS) || root.tag_name().name() != "feed" {
        return Err(Error::UnsupportedFeedFormat);
    }

    let head_children: Vec<_> = root
        .children()
        .filter(|n| n.is_element() && !is_atom(n, "entry"))
        .collect();
    let entries: Vec<_> = root
        .children()
        .filter(|n| n.is_element() && is_atom(n, "entry"))
        .collect();

    let head_links = collect_links(&base, head_children.iter().copied());

    let metadata = FeedMetadata {
        precision: first_cc_int(&head_children, "precision"),
        lifetime: first_cc_int(&head_children, "lifetime"),
        archive_num: first_cc_int(&head_children, "archive_num"),
    };

    let mut events = Vec::new();
    for entry in entries {
        let has_stale = entry
            .descendants()
            .any(|n| n.is_element() && is_cc(&n, "stale"));
        if !has_stale {
            continue;
        }

        let entry_children: Vec<_> = entry.children().filter(|n| n.is_element()).collect();
        let entry_links = collect_links(&base, entry_children.iter().copied());
        let Some(entry_uri) = entry_links.get("alternate").cloned() else {
            // No alternate link to invalidate; nothing to record.
            continue;
        };

        let updated = entry_children
            .iter()
            .find(|n| is_atom(n, "updated"))
            .and_then(|n| n.text())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(parse_updated);

        events.push((entry_uri, updated));
    }

    Ok(FeedDoc {
        head_links,
        metadata,
        events,
    })
}

fn is_atom(node: &roxmltree::Node, name: &str) -> bool {
    node.tag_name().namespace() == Some(ATOM_NS) && node.tag_name().name() == name
}

fn is_cc(node: &roxmltree::Node, name: &str) -> bool {
    node.tag_name().namespace() == Some(CC_NS) && node.tag_name().name() == name
}

/// Collect `atom:link` children into a rel-to-absolute-URI map; links with
/// no `rel` attribute default to `"alternate"` per the Atom spec.
fn collect_links<'a>(
    base: &Url,
    nodes: impl Iterator<Item = roxmltree::Node<'a, 'a>>,
) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for node in nodes {
        if !is_atom(&node, "link") {
            continue;
        }
        let Some(href) = node.attribute("href") else {
            continue;
        };
        let rel = node.attribute("rel").unwrap_or("alternate").to_string();
        if let Ok(resolved) = base.join(href) {
            out.insert(rel, resolved.to_string());
        }
    }
    out
}

fn first_cc_int(nodes: &[roxmltree::Node], local_name: &str) -> Option<i64> {
    nodes
        .iter()
        .find(|n| is_cc(n, local_name))
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<i64>().ok())
}

/// Parse an `atom:updated` value (RFC 3339) into a UTC unix timestamp.
fn parse_updated(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc).timestamp())
        .ok()
}
