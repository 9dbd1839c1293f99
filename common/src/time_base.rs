use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::util::seconds_between;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimeBaseError {
    #[error("no recording reference instant has been recorded")]
    NotSynchronized,
}

/// A wall-clock instant placed on the recording timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoTimestamp {
    pub seconds: f64,
    /// The instant fell before the reference and was pinned to zero.
    pub clamped: bool,
}

/// Maps wall-clock instants onto the current recording's timeline.
///
/// The reference instant is the moment recording began (T=0). It is
/// supplied by whoever started the recording; this type never guesses it.
#[derive(Debug, Clone, Default)]
pub struct TimeBase {
    reference: Option<DateTime<Utc>>,
}

impl TimeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference(reference: DateTime<Utc>) -> Self {
        TimeBase { reference: Some(reference) }
    }

    pub fn set_reference(&mut self, reference: DateTime<Utc>) {
        self.reference = Some(reference);
    }

    pub fn clear(&mut self) {
        self.reference = None;
    }

    pub fn reference(&self) -> Option<DateTime<Utc>> {
        self.reference
    }

    pub fn is_synchronized(&self) -> bool {
        self.reference.is_some()
    }

    pub fn translate(&self, instant: &DateTime<Utc>) -> Result<VideoTimestamp, TimeBaseError> {
        let reference = self.reference.ok_or(TimeBaseError::NotSynchronized)?;
        let seconds = seconds_between(&reference, instant);

        if seconds < 0.0 {
            log::warn!(
                "Instant {} precedes recording reference {} by {:.3}s; clamping video offset to 0",
                instant,
                reference,
                -seconds
            );
            return Ok(VideoTimestamp { seconds: 0.0, clamped: true });
        }

        Ok(VideoTimestamp { seconds, clamped: false })
    }
}
