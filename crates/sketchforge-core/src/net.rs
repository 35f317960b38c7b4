//! Network seams: archive/index downloads and the connectivity probe.
//!
//! Both are traits so the installer and catalog can be exercised in tests
//! without touching the network.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Downloads remote documents. One implementation backed by reqwest; tests
/// substitute canned bytes.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a URL fully into memory. Non-2xx statuses are errors.
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// Answers "do we currently have connectivity?". The installer short-circuits
/// to an empty result when offline instead of failing every download.
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// reqwest-backed fetcher with a per-request deadline.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| Error::Timeout(format!("download of {url}")))??;

        if !response.status().is_success() {
            return Err(Error::NotFound(format!(
                "{url} returned HTTP {}",
                response.status()
            )));
        }

        let bytes = tokio::time::timeout(self.timeout, response.bytes())
            .await
            .map_err(|_| Error::Timeout(format!("download of {url}")))??;
        Ok(bytes.to_vec())
    }
}

/// Probes connectivity with a short TCP connect against the index host.
pub struct TcpProbe {
    host: String,
    timeout: Duration,
}

impl TcpProbe {
    /// Probe the host of the given index URL on port 443.
    pub fn for_index_url(index_url: &str) -> Self {
        let host = index_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .split('/')
            .next()
            .unwrap_or("downloads.arduino.cc")
            .to_string();
        Self {
            host,
            timeout: Duration::from_secs(3),
        }
    }
}

#[async_trait]
impl Connectivity for TcpProbe {
    async fn is_online(&self) -> bool {
        let addr = format!("{}:443", self.host);
        matches!(
            tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        )
    }
}
