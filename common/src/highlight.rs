use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::event::{Event, EventKind};

pub const DEFAULT_PRIORITY: u32 = 5;

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

/// A span of the recording worth cutting, as proposed by the selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightRange {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

impl HighlightRange {
    pub fn is_well_formed(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.start < self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Drop ranges that are not well formed or fall under `min_priority`, keeping order.
pub fn retain_usable(ranges: Vec<HighlightRange>, min_priority: u32) -> Vec<HighlightRange> {
    let total = ranges.len();
    let usable: Vec<_> = ranges
        .into_iter()
        .filter(|range| {
            if !range.is_well_formed() {
                log::warn!("Discarding malformed highlight range {:?}", range);
                return false;
            }
            range.priority >= min_priority
        })
        .collect();
    log::debug!("Kept {}/{} highlight ranges (min priority {})", usable.len(), total, min_priority);
    usable
}

/// Compact per-round transcript of synchronized events, keyed by round number.
///
/// Events without a video offset are left out: a selector cannot place them
/// on the recording.
pub fn transcript_by_round(events: &[Event]) -> BTreeMap<u32, String> {
    let mut rounds: BTreeMap<u32, Vec<String>> = BTreeMap::new();

    for event in events {
        let Some(offset) = event.video_offset_seconds else {
            continue;
        };
        let line = match &event.kind {
            EventKind::Kill { weapon, headshot, health, total_kills } => {
                let hp = if *health == 0 { "?".to_string() } else { health.to_string() };
                format!(
                    "[{:.1}s] KILL weapon={} headshot={} hp={} total_kills={}",
                    offset,
                    weapon.trim_start_matches("weapon_"),
                    if *headshot { "yes" } else { "no" },
                    hp,
                    total_kills
                )
            }
            EventKind::PhaseChange { scope, phase } => {
                format!("[{:.1}s] {} PHASE {}", offset, scope.to_string().to_uppercase(), phase.to_uppercase())
            }
        };
        rounds.entry(event.round).or_default().push(line);
    }

    rounds.into_iter().map(|(round, lines)| (round, lines.join("\n"))).collect()
}

/// Pull highlight ranges out of a model response.
///
/// Accepts `{"highlights": [...]}`, `{"clips": [...]}`, a bare array, and any
/// of those wrapped in a fenced code block. Items that don't parse are skipped.
pub fn parse_highlight_response(text: &str) -> Result<Vec<HighlightRange>> {
    let body = strip_code_fence(text);
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => {
            let start = body.find(['[', '{']).context("No JSON found in highlight response")?;
            let end = body.rfind([']', '}']).context("No JSON found in highlight response")?;
            if end < start {
                bail!("No JSON found in highlight response");
            }
            serde_json::from_str(&body[start..=end]).context("Highlight response is not valid JSON")?
        }
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("highlights").or_else(|| object.remove("clips")) {
            Some(Value::Array(items)) => items,
            Some(_) => bail!("Highlight list in response is not an array"),
            None => Vec::new(),
        },
        _ => bail!("Highlight response is neither an object nor an array"),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<HighlightRange>(item.clone()) {
            Ok(range) => Some(range),
            Err(e) => {
                log::warn!("Skipping unreadable highlight {}: {}", item, e);
                None
            }
        })
        .collect())
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_open = &trimmed[open + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}
