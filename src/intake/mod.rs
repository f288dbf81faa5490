// src/intake/mod.rs
//! Source fetcher capability and fetch-boundary helpers

pub mod dates;
pub mod external;
pub mod script_fetcher;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::RawJob;

pub use external::ExternalProcessor;
pub use script_fetcher::ScriptFetcher;

/// Pulls raw postings for one keyword from one named source.
///
/// An empty result means "no postings"; `Err` is reserved for transport or
/// parse failures of the source itself.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, keyword: &str, source: &str, limit: Option<usize>)
        -> Result<Vec<RawJob>>;
}
