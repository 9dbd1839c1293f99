use anyhow::Result;
use async_trait::async_trait;
use common::MatchRecord;
use std::path::PathBuf;

pub mod catalog;
pub mod json;

pub use catalog::{CatalogedHighlight, CatalogedMatch, MatchCatalog};
pub use json::JsonFileStore;

/// Durable home for match records.
///
/// Saving the same match again overwrites the earlier copy.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Persist `record` and return where it was written.
    async fn save(&self, record: &MatchRecord) -> Result<PathBuf>;
}
