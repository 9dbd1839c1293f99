use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use server::recording::RecordingController;

/// Recording controller that counts calls and can be told to fail starts.
#[derive(Default)]
pub struct MockRecorder {
    starts: AtomicU32,
    stops: AtomicU32,
    failing_starts: AtomicU32,
    recording: AtomicBool,
    references: Mutex<Vec<DateTime<Utc>>>,
}

impl MockRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` start attempts fail.
    pub fn fail_next_starts(&self, count: u32) {
        self.failing_starts.store(count, Ordering::SeqCst);
    }

    /// Start attempts, failed ones included.
    pub fn start_calls(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Reference instants handed out by successful starts.
    pub fn references(&self) -> Vec<DateTime<Utc>> {
        self.references.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordingController for MockRecorder {
    async fn start_recording(&self) -> Result<DateTime<Utc>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_starts.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_starts.store(failing - 1, Ordering::SeqCst);
            bail!("recorder is offline");
        }

        let reference = common::util::now();
        self.recording.store(true, Ordering::SeqCst);
        self.references.lock().unwrap().push(reference);
        Ok(reference)
    }

    async fn stop_recording(&self) -> Result<Option<PathBuf>> {
        let n = self.stops.fetch_add(1, Ordering::SeqCst) + 1;
        self.recording.store(false, Ordering::SeqCst);
        Ok(Some(PathBuf::from(format!("/videos/recording_{}.mkv", n))))
    }

    async fn is_recording(&self) -> Result<bool> {
        Ok(self.recording.load(Ordering::SeqCst))
    }
}
