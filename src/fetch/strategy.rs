// src/fetch/strategy.rs

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use std::{fmt, time::Duration};
use tracing::debug;
use url::Url;

use crate::config::SourceConfig;
use crate::error::{FetchError, TransportError};

/// The two ways of reaching the dataset. `Fallback` is tried once per
/// logical fetch, and only after `Primary` has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStrategy {
    /// Verified TLS against the primary base URL.
    Primary,
    /// Relaxed transport (no certificate checks, HTTP/1 only, no connection
    /// reuse) against the alternate base URL.
    Fallback,
}

impl FetchStrategy {
    /// Order in which strategies are attempted.
    pub const ORDER: [FetchStrategy; 2] = [FetchStrategy::Primary, FetchStrategy::Fallback];

    pub fn base_url<'a>(&self, source: &'a SourceConfig) -> &'a str {
        match self {
            FetchStrategy::Primary => &source.base_url,
            FetchStrategy::Fallback => &source.fallback_base_url,
        }
    }
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchStrategy::Primary => "primary",
            FetchStrategy::Fallback => "fallback",
        })
    }
}

/// One blocking GET returning the response body.
///
/// The seam between pagination/retry logic and the network.
pub trait Transport {
    fn get_text(&self, strategy: FetchStrategy, url: &Url) -> Result<String, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get_text(&self, strategy: FetchStrategy, url: &Url) -> Result<String, TransportError> {
        (**self).get_text(strategy, url)
    }
}

/// reqwest-backed transport holding one client per strategy.
pub struct HttpTransport {
    primary: Client,
    fallback: Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            primary: build_client(FetchStrategy::Primary, user_agent, timeout)?,
            fallback: build_client(FetchStrategy::Fallback, user_agent, timeout)?,
        })
    }

    fn client(&self, strategy: FetchStrategy) -> &Client {
        match strategy {
            FetchStrategy::Primary => &self.primary,
            FetchStrategy::Fallback => &self.fallback,
        }
    }
}

fn build_client(
    strategy: FetchStrategy,
    user_agent: &str,
    timeout: Duration,
) -> Result<Client, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let builder = Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(30)));

    let builder = match strategy {
        FetchStrategy::Primary => builder,
        FetchStrategy::Fallback => builder
            .danger_accept_invalid_certs(true)
            .http1_only()
            .pool_max_idle_per_host(0),
    };

    builder
        .build()
        .map_err(|source| FetchError::Client { strategy, source })
}

impl Transport for HttpTransport {
    fn get_text(&self, strategy: FetchStrategy, url: &Url) -> Result<String, TransportError> {
        debug!(%url, %strategy, "GET");
        let resp = self
            .client(strategy)
            .get(url.clone())
            .send()
            .map_err(|e| TransportError::from_reqwest(url.as_str(), e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.text()
            .map_err(|e| TransportError::from_reqwest(url.as_str(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_pick_their_base_url() {
        let source = SourceConfig::default();
        assert!(FetchStrategy::Primary
            .base_url(&source)
            .starts_with("https://"));
        assert!(FetchStrategy::Fallback
            .base_url(&source)
            .starts_with("http://"));
        assert_eq!(
            FetchStrategy::ORDER,
            [FetchStrategy::Primary, FetchStrategy::Fallback]
        );
    }

    #[test]
    fn http_transport_builds_both_clients() {
        let transport = HttpTransport::new("renewscraper-test", Duration::from_secs(5));
        assert!(transport.is_ok());
    }
}
