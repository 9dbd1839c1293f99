use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::event::{Event, SyncStatus};
use crate::lifecycle::MatchStatus;

/// Persisted form of one match: its events plus the metadata needed to cut video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: Uuid,
    pub status: MatchStatus,
    #[serde(with = "crate::util::epoch_seconds::option")]
    pub recording_start_instant: Option<DateTime<Utc>>,
    pub video_path: Option<PathBuf>,
    pub event_count: usize,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MatchSummary {
    pub total_kills: usize,
    pub total_rounds: u32,
    pub duration_seconds: f64,
}

impl MatchRecord {
    pub fn events_for_round(&self, round: u32) -> Vec<Event> {
        self.events.iter().filter(|e| e.round == round).cloned().collect()
    }

    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            total_kills: self.events.iter().filter(|e| e.is_kill()).count(),
            total_rounds: self.events.iter().map(|e| e.round).max().unwrap_or(0),
            duration_seconds: self
                .events
                .iter()
                .filter_map(|e| e.video_offset_seconds)
                .fold(0.0, f64::max),
        }
    }
}

/// Append-only buffer of the events detected for the current match.
#[derive(Debug, Clone)]
pub struct EventLog {
    match_id: Uuid,
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        EventLog {
            match_id: Uuid::new_v4(),
            events: Vec::new(),
        }
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn append(&mut self, event: Event) {
        if event.sync == SyncStatus::Unsynchronized {
            log::debug!("Logging unsynchronized {:?} event for round {}", event.kind, event.round);
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events_for_round(&self, round: u32) -> Vec<Event> {
        self.events.iter().filter(|e| e.round == round).cloned().collect()
    }

    /// Copy of the log as it stands, for flushing a match that is still open.
    ///
    /// Repeated calls describe the same match and carry the same id.
    pub fn to_record(
        &self,
        status: MatchStatus,
        recording_start_instant: Option<DateTime<Utc>>,
        video_path: Option<PathBuf>,
    ) -> MatchRecord {
        MatchRecord {
            match_id: self.match_id,
            status,
            recording_start_instant,
            video_path,
            event_count: self.events.len(),
            events: self.events.clone(),
        }
    }

    /// Close the log into an `Ended` record and start a fresh one for the next match.
    pub fn close(
        &mut self,
        recording_start_instant: Option<DateTime<Utc>>,
        video_path: Option<PathBuf>,
    ) -> MatchRecord {
        let closed = std::mem::take(self);
        MatchRecord {
            match_id: closed.match_id,
            status: MatchStatus::Ended,
            recording_start_instant,
            video_path,
            event_count: closed.events.len(),
            events: closed.events,
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
