use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Phase that marks a match going live.
    pub live_phase: String,
    /// Phase that marks a match being over.
    pub terminal_phase: String,
    /// A round number dropping by more than this ends the match.
    /// Uncalibrated against overtime numbering; keep it configurable.
    pub round_regression_threshold: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            live_phase: "live".to_string(),
            terminal_phase: "gameover".to_string(),
            round_regression_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    NotStarted,
    InProgress,
    /// Closed record; the machine itself goes straight back to `NotStarted`.
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    TerminalPhase,
    RoundRegression { from: u32, to: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The match went live. `at` is the candidate T=0; the recording's real
    /// reference instant comes from whoever starts the recording.
    MatchStart { at: DateTime<Utc> },
    MatchEnd { at: DateTime<Utc>, reason: EndReason },
}

/// Decides when a match starts and ends from a stream of phase observations.
///
/// Observations repeating the last phase are ignored. An end is signalled at
/// most once per match; the machine then resets itself to `NotStarted`.
#[derive(Debug, Clone)]
pub struct LifecycleStateMachine {
    config: LifecycleConfig,
    status: MatchStatus,
    last_phase: Option<String>,
    last_round: Option<u32>,
    end_signalled: bool,
    started_at: Option<DateTime<Utc>>,
}

impl LifecycleStateMachine {
    pub fn new(config: LifecycleConfig) -> Self {
        LifecycleStateMachine {
            config,
            status: MatchStatus::NotStarted,
            last_phase: None,
            last_round: None,
            end_signalled: false,
            started_at: None,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn status(&self) -> MatchStatus {
        self.status
    }

    pub fn last_round(&self) -> Option<u32> {
        self.last_round
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Observe a phase change of the scope that drives the lifecycle.
    pub fn observe(&mut self, phase: &str, round: u32, at: DateTime<Utc>) -> Vec<LifecycleSignal> {
        if self.last_phase.as_deref() == Some(phase) {
            return Vec::new();
        }
        self.last_phase = Some(phase.to_string());

        let mut signals: Vec<_> = self.check_end(Some(phase), round, at).into_iter().collect();
        if self.status == MatchStatus::NotStarted && phase == self.config.live_phase {
            signals.push(self.start(at));
        }
        signals
    }

    /// Observe the round number carried by anything other than a driving
    /// phase change: a phase change of another scope (`phase`) or a bare
    /// snapshot (`None`).
    ///
    /// This can end a match, on the terminal phase or a round regression, but
    /// only starts one when a regression happens while the driving phase is
    /// still live.
    pub fn observe_ambient(&mut self, phase: Option<&str>, round: u32, at: DateTime<Utc>) -> Vec<LifecycleSignal> {
        let Some(end) = self.check_end(phase, round, at) else {
            return Vec::new();
        };

        let regressed = matches!(end, LifecycleSignal::MatchEnd { reason: EndReason::RoundRegression { .. }, .. });
        let mut signals = vec![end];
        if regressed && self.last_phase.as_deref() == Some(self.config.live_phase.as_str()) {
            signals.push(self.start(at));
        }
        signals
    }

    /// Roll back a start whose recording could not be started.
    ///
    /// The last observed phase is kept, so the next start attempt happens on
    /// the next change into the live phase rather than on every repeat.
    pub fn abort_start(&mut self) {
        if self.status == MatchStatus::InProgress {
            self.status = MatchStatus::NotStarted;
            self.started_at = None;
        }
    }

    fn check_end(&mut self, phase: Option<&str>, round: u32, at: DateTime<Utc>) -> Option<LifecycleSignal> {
        let previous_round = self.last_round.replace(round);
        if self.status != MatchStatus::InProgress || self.end_signalled {
            return None;
        }

        let reason = if phase == Some(self.config.terminal_phase.as_str()) {
            EndReason::TerminalPhase
        } else {
            previous_round
                .filter(|&from| from.saturating_sub(round) > self.config.round_regression_threshold)
                .map(|from| EndReason::RoundRegression { from, to: round })?
        };

        self.end_match();
        // The regressed round belongs to a match that is already running.
        if matches!(reason, EndReason::RoundRegression { .. }) {
            self.last_round = Some(round);
        }
        Some(LifecycleSignal::MatchEnd { at, reason })
    }

    fn start(&mut self, at: DateTime<Utc>) -> LifecycleSignal {
        self.status = MatchStatus::InProgress;
        self.end_signalled = false;
        self.started_at = Some(at);
        LifecycleSignal::MatchStart { at }
    }

    fn end_match(&mut self) {
        self.end_signalled = true;
        self.last_round = None;
        self.started_at = None;
        self.status = MatchStatus::NotStarted;
    }
}

impl Default for LifecycleStateMachine {
    fn default() -> Self {
        Self::new(LifecycleConfig::default())
    }
}
