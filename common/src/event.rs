use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::time_base::TimeBase;

/// Which phase field of the snapshot a phase change was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseScope {
    /// `round.phase`: freezetime, live, over.
    Round,
    /// `map.phase`: warmup, live, intermission, gameover.
    Map,
}

impl fmt::Display for PhaseScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseScope::Round => write!(f, "round"),
            PhaseScope::Map => write!(f, "map"),
        }
    }
}

impl FromStr for PhaseScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round" => Ok(PhaseScope::Round),
            "map" => Ok(PhaseScope::Map),
            other => Err(format!("unknown phase scope '{}' (expected 'round' or 'map')", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Kill {
        weapon: String,
        headshot: bool,
        /// Health after the kill. 0 means the snapshot did not report it.
        health: u32,
        total_kills: u64,
    },
    PhaseChange {
        scope: PhaseScope,
        phase: String,
    },
}

/// How the event's video offset was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synchronized,
    /// Detected before the reference instant; offset pinned to zero.
    Clamped,
    /// No reference instant existed; the offset is unknown.
    Unsynchronized,
}

/// Something the differ noticed, before it is placed on the video timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub detected_at: DateTime<Utc>,
    pub round: u32,
    pub kind: EventKind,
}

impl Detection {
    pub fn phase_change(&self) -> Option<(PhaseScope, &str)> {
        match &self.kind {
            EventKind::PhaseChange { scope, phase } => Some((*scope, phase.as_str())),
            EventKind::Kill { .. } => None,
        }
    }

    /// Translate the detection instant against `time_base` and freeze it into an [`Event`].
    pub fn stamp(self, time_base: &TimeBase) -> Event {
        let (video_offset_seconds, sync) = match time_base.translate(&self.detected_at) {
            Ok(timestamp) if timestamp.clamped => (Some(timestamp.seconds), SyncStatus::Clamped),
            Ok(timestamp) => (Some(timestamp.seconds), SyncStatus::Synchronized),
            Err(_) => (None, SyncStatus::Unsynchronized),
        };

        Event {
            wall_clock: self.detected_at,
            video_offset_seconds,
            sync,
            round: self.round,
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(with = "crate::util::epoch_seconds")]
    pub wall_clock: DateTime<Utc>,
    /// Seconds since the recording's reference instant; `None` when unsynchronized.
    pub video_offset_seconds: Option<f64>,
    pub sync: SyncStatus,
    pub round: u32,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn is_kill(&self) -> bool {
        matches!(self.kind, EventKind::Kill { .. })
    }
}
