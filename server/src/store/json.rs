use anyhow::{Context, Result};
use async_trait::async_trait;
use common::MatchRecord;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use super::MatchStore;

/// Writes each match to `<dir>/match_<id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonFileStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, match_id: Uuid) -> PathBuf {
        self.dir.join(format!("match_{}.json", match_id))
    }

    pub async fn load(path: &Path) -> Result<MatchRecord> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read match record {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse match record {}", path.display()))
    }
}

#[async_trait]
impl MatchStore for JsonFileStore {
    async fn save(&self, record: &MatchRecord) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create log directory {}", self.dir.display()))?;

        let path = self.path_for(record.match_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record).context("Failed to serialize match record")?;

        // Readers only ever see a complete file.
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move match record into place at {}", path.display()))?;

        debug!("Wrote {} events for match {} to {}", record.event_count, record.match_id, path.display());
        Ok(path)
    }
}
