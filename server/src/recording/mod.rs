use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

pub mod obs;

/// Controls the recording whose timeline events are placed on.
#[async_trait]
pub trait RecordingController: Send + Sync {
    /// Start recording and return the wall-clock instant the recording began (T=0).
    async fn start_recording(&self) -> Result<DateTime<Utc>>;

    /// Stop recording and return the output file, if the recorder reports one.
    async fn stop_recording(&self) -> Result<Option<PathBuf>>;

    async fn is_recording(&self) -> Result<bool>;
}

/// Recorder for setups where something else runs the capture.
///
/// T=0 is the local clock at the moment the start was requested, so the
/// external capture has to be started at the same moment for offsets to line up.
#[derive(Debug, Default)]
pub struct ExternalRecorder {
    recording: AtomicBool,
}

impl ExternalRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordingController for ExternalRecorder {
    async fn start_recording(&self) -> Result<DateTime<Utc>> {
        let reference = common::util::now();
        self.recording.store(true, Ordering::SeqCst);
        info!("External recording marked as started at {}", reference);
        Ok(reference)
    }

    async fn stop_recording(&self) -> Result<Option<PathBuf>> {
        self.recording.store(false, Ordering::SeqCst);
        info!("External recording marked as stopped");
        Ok(None)
    }

    async fn is_recording(&self) -> Result<bool> {
        Ok(self.recording.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_external_recorder_tracks_state() {
        let recorder = ExternalRecorder::new();
        assert!(!recorder.is_recording().await.unwrap());

        let before = common::util::now();
        let reference = recorder.start_recording().await.unwrap();
        assert!(reference >= before);
        assert!(recorder.is_recording().await.unwrap());

        assert_eq!(recorder.stop_recording().await.unwrap(), None);
        assert!(!recorder.is_recording().await.unwrap());
    }
}
