//! Upstream proxy sources
//!
//! A source pulls candidate proxies from one upstream provider. Candidates
//! carry descriptive fields only; health fields are never trusted from a
//! source and every candidate goes through the validator before it reaches
//! the store.

pub mod api;
pub mod scrape;

pub use api::ApiSource;
pub use scrape::TableScrapeSource;

use crate::config::FetchConfig;
use crate::error::Result;
use crate::models::ProxyCandidate;
use async_trait::async_trait;
use std::time::Duration;

/// Fixed per-request timeout for all source adapters
pub const SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Capability exposed by every upstream adapter
#[async_trait]
pub trait Source: Send + Sync {
    /// Adapter name, recorded on every candidate it produces
    fn name(&self) -> &str;

    /// Pull the current candidate list from the upstream
    async fn fetch(&self) -> Result<Vec<ProxyCandidate>>;
}

/// Build the paid source set from configuration
pub fn paid_sources(config: &FetchConfig) -> Vec<Box<dyn Source>> {
    config
        .paid_urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            Box::new(ApiSource::new(format!("paid_{}", i + 1), url.clone())) as Box<dyn Source>
        })
        .collect()
}

/// Build the free source set; empty unless free sources are enabled
pub fn free_sources(config: &FetchConfig) -> Vec<Box<dyn Source>> {
    if !config.use_free_api {
        return Vec::new();
    }

    vec![Box::new(TableScrapeSource::ip3366()) as Box<dyn Source>]
}
