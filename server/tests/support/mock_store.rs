use anyhow::{Result, bail};
use async_trait::async_trait;
use common::MatchRecord;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use server::store::{JsonFileStore, MatchStore};

/// JSON store that can be told to fail its next saves.
pub struct FlakyStore {
    inner: JsonFileStore,
    failing_saves: AtomicU32,
    saves: AtomicU32,
}

impl FlakyStore {
    pub fn new(dir: &Path) -> Self {
        FlakyStore {
            inner: JsonFileStore::new(dir),
            failing_saves: AtomicU32::new(0),
            saves: AtomicU32::new(0),
        }
    }

    pub fn fail_next_saves(&self, count: u32) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// Save attempts, failed ones included.
    pub fn save_calls(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatchStore for FlakyStore {
    async fn save(&self, record: &MatchRecord) -> Result<PathBuf> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_saves.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_saves.store(failing - 1, Ordering::SeqCst);
            bail!("disk is full");
        }
        self.inner.save(record).await
    }
}
