//! Breach-database lookup with k-anonymity.
//!
//! Only the first five hex characters of the password digest ever leave
//! the process; the returned suffix list is compared locally. An
//! unreachable service degrades to "unknown" so the login/register paths
//! never hang on a third party.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::BreachConfig;

/// Length of the digest prefix disclosed to the lookup service.
pub const RANGE_PREFIX_LEN: usize = 5;

/// Outcome of a breach lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreachStatus {
    /// Not present in the breach corpus.
    Clear,
    /// Present, with the number of known occurrences.
    Breached { count: u64 },
    /// The lookup service could not answer in time.
    Unknown,
}

/// Range query against a breach corpus: given a digest prefix, return all
/// known (suffix, occurrence count) pairs sharing it.
#[async_trait]
pub trait BreachRangeClient: Send + Sync {
    async fn fetch_range(&self, prefix: &str) -> Result<Vec<(String, u64)>, anyhow::Error>;
}

/// HTTP range client. Expects `GET {base}/range/{prefix}` to answer with
/// one `SUFFIX:COUNT` pair per line.
pub struct HttpBreachClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBreachClient {
    pub fn new(config: &BreachConfig) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build breach lookup client: {}", e))?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BreachRangeClient for HttpBreachClient {
    async fn fetch_range(&self, prefix: &str) -> Result<Vec<(String, u64)>, anyhow::Error> {
        let url = format!("{}/range/{}", self.base_url, prefix);
        let body = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Breach range request failed: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow::anyhow!("Breach range request failed: {}", e))?
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Breach range response unreadable: {}", e))?;

        Ok(parse_range_body(&body))
    }
}

fn parse_range_body(body: &str) -> Vec<(String, u64)> {
    body.lines()
        .filter_map(|line| {
            let (suffix, count) = line.trim().split_once(':')?;
            Some((suffix.to_uppercase(), count.trim().parse().ok()?))
        })
        .collect()
}

/// Breach checker: digests locally, queries by prefix, compares locally.
#[derive(Clone)]
pub struct BreachChecker {
    client: Arc<dyn BreachRangeClient>,
    enabled: bool,
}

impl BreachChecker {
    pub fn new(client: Arc<dyn BreachRangeClient>, config: &BreachConfig) -> Self {
        Self {
            client,
            enabled: config.enabled,
        }
    }

    /// Check a password against the breach corpus.
    ///
    /// Never fails: service errors map to [`BreachStatus::Unknown`]. The
    /// caller decides whether unknown blocks the flow (strict mode).
    pub async fn check(&self, password: &str) -> BreachStatus {
        if !self.enabled {
            return BreachStatus::Unknown;
        }

        let digest = hex::encode_upper(Sha256::digest(password.as_bytes()));
        let (prefix, suffix) = digest.split_at(RANGE_PREFIX_LEN);

        match self.client.fetch_range(prefix).await {
            Ok(range) => {
                let count = range
                    .iter()
                    .find(|(candidate, _)| candidate.eq_ignore_ascii_case(suffix))
                    .map(|(_, count)| *count);
                match count {
                    Some(count) => BreachStatus::Breached { count },
                    None => BreachStatus::Clear,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Breach lookup unavailable, degrading to unknown");
                BreachStatus::Unknown
            }
        }
    }
}
