use anyhow::Result;
use async_trait::async_trait;
use common::HighlightRange;

pub mod gemini;

pub use gemini::GeminiSelector;

/// Picks clip-worthy ranges out of one round's transcript.
///
/// Implementations return ranges as proposed; filtering by shape and
/// priority happens downstream.
#[async_trait]
pub trait HighlightSelector: Send + Sync {
    async fn select(&self, round: u32, transcript: &str) -> Result<Vec<HighlightRange>>;
}
