//! Non-blocking HTTP GET wrapper used by the channel poller.
//!
//! Deliberately thin: it does not retain persistent connections (by design,
//! see the module doc on [`HttpFetcher`]), and classifies failures into a
//! small set of kinds the poller logs and reschedules on.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

#[derive(Debug)]
pub enum FetchKind {
    /// DNS resolution failed.
    Dns,
    /// TCP connect was refused or otherwise failed.
    Connect,
    /// The fetch exceeded `fetch_timeout`.
    Timeout,
    /// The origin (or configured proxy) returned a non-2xx status.
    Status(reqwest::StatusCode),
    /// Anything else (body read failure, TLS error, etc).
    Other,
}

#[derive(Debug)]
pub struct FetchError {
    pub kind: FetchKind,
    pub message: String,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            FetchKind::Timeout
        } else if e.is_connect() {
            if is_dns_error(&e) {
                FetchKind::Dns
            } else {
                FetchKind::Connect
            }
        } else if let Some(status) = e.status() {
            FetchKind::Status(status)
        } else {
            FetchKind::Other
        };
        let message = e.to_string();
        Self { kind, message }
    }
}

fn is_dns_error(e: &reqwest::Error) -> bool {
    let mut source = e.source();
    while let Some(err) = source {
        if err.to_string().to_lowercase().contains("dns") {
            return true;
        }
        source = err.source();
    }
    false
}

/// Non-blocking GET with a total fetch timeout, optional forward proxy, and
/// caller-supplied request headers.
///
/// When a forward proxy is configured, `reqwest` issues an absolute-form
/// request-URI and connects to the proxy rather than the origin; DNS
/// resolution for the origin is then offloaded to the proxy.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(fetch_timeout: Duration, http_proxy: Option<&str>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(fetch_timeout)
            // No persistent connections: a nearby caching proxy is expected
            // to front these requests, so we don't need our own pool.
            .pool_max_idle_per_host(0);

        if let Some(proxy) = http_proxy {
            let proxy_url = format!("http://{}", proxy);
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// GET `uri` with the given request headers, returning the response
    /// body on any 2xx status.
    pub async fn get(
        &self,
        uri: &str,
        headers: &[(&str, String)],
    ) -> Result<Vec<u8>, FetchError> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                header_map.insert(name, value);
            }
        }

        let resp = self
            .client
            .get(uri)
            .headers(header_map)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let resp = resp.error_for_status().map_err(FetchError::from_reqwest)?;

        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(FetchError::from_reqwest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetcher_builds_without_proxy() {
        HttpFetcher::new(Duration::from_secs(10), None).unwrap();
    }

    #[test]
    fn fetcher_builds_with_proxy() {
        HttpFetcher::new(Duration::from_secs(10), Some("localhost:3128")).unwrap();
    }
}
