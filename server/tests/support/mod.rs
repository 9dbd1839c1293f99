#![allow(dead_code)]

pub mod mock_recorder;
pub mod mock_pipeline;
pub mod mock_store;
pub mod snapshots;

pub use mock_pipeline::{MockRenderer, MockSelector};
pub use mock_recorder::MockRecorder;
pub use mock_store::FlakyStore;
pub use snapshots::GsiBuilder;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use server::store::JsonFileStore;
use server::synchronizer::{MatchSynchronizer, SynchronizerConfig};

/// Wraps a test body with a timeout so a stuck task fails instead of hanging.
#[macro_export]
macro_rules! timeout_test {
    ($duration:expr, $body:expr) => {
        tokio::time::timeout($duration, $body)
            .await
            .map_err(|_| anyhow::anyhow!("Test timed out after {:?}", $duration))?
    };
}

/// Synchronizer settings that never sleep between recording retries.
pub fn fast_config() -> SynchronizerConfig {
    SynchronizerConfig {
        recording_retries: 2,
        recording_retry_delay: Duration::from_millis(0),
        ..SynchronizerConfig::default()
    }
}

pub fn synchronizer(config: SynchronizerConfig, recorder: Arc<MockRecorder>, log_dir: &Path) -> MatchSynchronizer {
    MatchSynchronizer::new(config, recorder, Arc::new(JsonFileStore::new(log_dir)))
}

/// Match records written to `dir`, sorted by name.
pub fn record_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}
