use chrono::{DateTime, Utc};

use crate::event::{Detection, EventKind, PhaseScope};
use crate::snapshot::{Snapshot, UNKNOWN_WEAPON};

/// Compare a snapshot against the one received just before it.
///
/// `detected_at` is the instant the current snapshot arrived, captured by
/// the caller before any processing. Rules are independent, so one pair
/// can yield a round phase change, a map phase change and a kill.
///
/// A kill counter that jumps by more than one between snapshots still
/// produces a single kill: the feed does not say how many happened.
pub fn diff(previous: Option<&Snapshot>, current: &Snapshot, detected_at: DateTime<Utc>) -> Vec<Detection> {
    let round = current.round_number().unwrap_or(0);
    let mut out = Vec::new();

    if let Some(phase) = current.round_phase() {
        if previous.and_then(Snapshot::round_phase) != Some(phase) {
            out.push(phase_change(detected_at, round, PhaseScope::Round, phase));
        }
    }

    if let Some(phase) = current.map_phase() {
        if previous.and_then(Snapshot::map_phase) != Some(phase) {
            out.push(phase_change(detected_at, round, PhaseScope::Map, phase));
        }
    }

    if let Some(kills) = current.player_kills() {
        let previous_kills = previous.and_then(Snapshot::player_kills).unwrap_or(0);
        if kills > previous_kills {
            let previous_headshots = previous.and_then(Snapshot::player_headshot_kills).unwrap_or(0);
            let headshot = current.player_headshot_kills().unwrap_or(0) > previous_headshots;

            if kills - previous_kills > 1 {
                log::debug!("Kill counter jumped {} -> {}; logging a single kill", previous_kills, kills);
            }

            out.push(Detection {
                detected_at,
                round,
                kind: EventKind::Kill {
                    weapon: current.active_weapon().unwrap_or(UNKNOWN_WEAPON).to_string(),
                    headshot,
                    health: current.player_health().unwrap_or(0),
                    total_kills: kills,
                },
            });
        }
    }

    out
}

fn phase_change(detected_at: DateTime<Utc>, round: u32, scope: PhaseScope, phase: &str) -> Detection {
    Detection {
        detected_at,
        round,
        kind: EventKind::PhaseChange { scope, phase: phase.to_string() },
    }
}
