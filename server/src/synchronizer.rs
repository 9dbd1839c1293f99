use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use common::{
    Detection, EndReason, Event, EventKind, EventLog, LifecycleConfig, LifecycleSignal, LifecycleStateMachine,
    MatchRecord, MatchStatus, PhaseScope, Snapshot, TimeBase,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::recording::RecordingController;
use crate::store::MatchStore;

#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
    pub lifecycle: LifecycleConfig,
    /// Phase changes of this scope drive match start and end
    pub phase_source: PhaseScope,
    /// Start and stop the recording with each match. When false the
    /// recording spans the whole session (see [`MatchSynchronizer::prepare`]).
    pub auto_recording: bool,
    /// Total start attempts before giving up on a match start
    pub recording_retries: u32,
    pub recording_retry_delay: Duration,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        SynchronizerConfig {
            lifecycle: LifecycleConfig::default(),
            phase_source: PhaseScope::Map,
            auto_recording: true,
            recording_retries: 3,
            recording_retry_delay: Duration::from_secs(2),
        }
    }
}

impl From<&Config> for SynchronizerConfig {
    fn from(config: &Config) -> Self {
        SynchronizerConfig {
            lifecycle: config.lifecycle.clone(),
            phase_source: config.phase_source,
            auto_recording: config.auto_recording,
            recording_retries: config.recording_retries,
            recording_retry_delay: config.recording_retry_delay,
        }
    }
}

/// A closed match, as handed to whoever catalogs and processes it.
#[derive(Debug, Clone)]
pub struct CompletedMatch {
    pub record_path: PathBuf,
    pub record: MatchRecord,
}

/// What one snapshot produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutcome {
    /// Events appended to a match log, in order
    pub events: Vec<Event>,
    /// Lifecycle transitions that took effect
    pub signals: Vec<LifecycleSignal>,
}

/// Owns all per-stream state: the previous snapshot, the recording time base,
/// the lifecycle machine and the open event log.
///
/// Nothing here is shared. Exactly one task drives a synchronizer, which is
/// what keeps diffing and lifecycle transitions strictly ordered.
pub struct MatchSynchronizer {
    config: SynchronizerConfig,
    previous: Option<Snapshot>,
    time_base: TimeBase,
    lifecycle: LifecycleStateMachine,
    log: EventLog,
    recorder: Arc<dyn RecordingController>,
    store: Arc<dyn MatchStore>,
    handoff: Option<mpsc::Sender<CompletedMatch>>,
    /// Closed matches whose record could not be written yet
    unsaved: Vec<MatchRecord>,
    /// Set while a session-wide recording started by `prepare` is running
    session_recording: bool,
}

impl MatchSynchronizer {
    pub fn new(
        config: SynchronizerConfig,
        recorder: Arc<dyn RecordingController>,
        store: Arc<dyn MatchStore>,
    ) -> Self {
        let lifecycle = LifecycleStateMachine::new(config.lifecycle.clone());
        MatchSynchronizer {
            config,
            previous: None,
            time_base: TimeBase::new(),
            lifecycle,
            log: EventLog::new(),
            recorder,
            store,
            handoff: None,
            unsaved: Vec::new(),
            session_recording: false,
        }
    }

    /// Send every completed match to `handoff`.
    pub fn with_handoff(mut self, handoff: mpsc::Sender<CompletedMatch>) -> Self {
        self.handoff = Some(handoff);
        self
    }

    pub fn time_base(&self) -> &TimeBase {
        &self.time_base
    }

    pub fn status(&self) -> MatchStatus {
        self.lifecycle.status()
    }

    pub fn open_match_id(&self) -> Uuid {
        self.log.match_id()
    }

    pub fn events(&self) -> &[Event] {
        self.log.events()
    }

    /// Closed matches still waiting to be written.
    pub fn unsaved_matches(&self) -> &[MatchRecord] {
        &self.unsaved
    }

    pub fn events_for_round(&self, round: u32) -> Vec<Event> {
        self.log.events_for_round(round)
    }

    /// Start the session-wide recording when matches don't drive it.
    pub async fn prepare(&mut self) -> Result<()> {
        if self.config.auto_recording || self.session_recording {
            return Ok(());
        }
        let reference = self
            .start_recording_with_retries()
            .await
            .context("Could not start the session recording")?;
        self.time_base.set_reference(reference);
        self.session_recording = true;
        info!("Session recording started; T=0 at {}", reference);
        Ok(())
    }

    /// Diff `snapshot` against the previous one and run the results through
    /// the lifecycle and into the log.
    ///
    /// `received_at` must be captured when the payload arrived, before parsing.
    /// A snapshot that ends a match on its terminal phase is logged into the
    /// ending match; any other snapshot is logged after its transitions, so a
    /// snapshot that starts a match is stamped against the new recording.
    pub async fn process_snapshot(&mut self, snapshot: Snapshot, received_at: DateTime<Utc>) -> ProcessOutcome {
        let mut detections = common::diff(self.previous.as_ref(), &snapshot, received_at);
        let round = snapshot.round_number();
        self.previous = Some(snapshot);

        let mut signals = Vec::new();
        let mut phase_changed = false;
        for detection in &detections {
            if let Some((scope, phase)) = detection.phase_change() {
                phase_changed = true;
                signals.extend(if scope == self.config.phase_source {
                    self.lifecycle.observe(phase, detection.round, detection.detected_at)
                } else {
                    self.lifecycle.observe_ambient(Some(phase), detection.round, detection.detected_at)
                });
            }
        }
        if let (false, Some(round)) = (phase_changed, round) {
            signals.extend(self.lifecycle.observe_ambient(None, round, received_at));
        }

        let mut outcome = ProcessOutcome::default();
        let ends_on_terminal = signals.iter().any(|signal| {
            matches!(signal, LifecycleSignal::MatchEnd { reason: EndReason::TerminalPhase, .. })
        });
        if ends_on_terminal {
            for detection in std::mem::take(&mut detections) {
                self.append(detection, &mut outcome);
            }
        }

        for signal in signals {
            let applied = match &signal {
                LifecycleSignal::MatchEnd { reason, .. } => {
                    self.end_match(*reason).await;
                    true
                }
                LifecycleSignal::MatchStart { at } => self.start_match(*at).await,
            };
            if applied {
                outcome.signals.push(signal);
            }
        }

        for detection in detections {
            self.append(detection, &mut outcome);
        }
        outcome
    }

    /// Write the open match record as it stands. Safe to repeat: every call
    /// overwrites the same record.
    ///
    /// Closed matches that failed to save earlier are retried first.
    pub async fn flush(&mut self) -> Result<PathBuf> {
        self.save_unsaved().await;
        let record = self
            .log
            .to_record(self.lifecycle.status(), self.time_base.reference(), None);
        self.store
            .save(&record)
            .await
            .with_context(|| format!("Failed to flush match {}", record.match_id))
    }

    /// Stop whatever recording this synchronizer started and write a final
    /// record for the open match. Returns `None` when there was nothing to write.
    pub async fn shutdown(&mut self) -> Result<Option<PathBuf>> {
        let owns_recording = if self.config.auto_recording {
            self.lifecycle.status() == MatchStatus::InProgress
        } else {
            self.session_recording
        };

        let video_path = if owns_recording {
            self.session_recording = false;
            self.stop_recording().await
        } else {
            None
        };

        self.save_unsaved().await;

        let path = if self.log.is_empty() && self.lifecycle.status() != MatchStatus::InProgress {
            debug!("No events to flush at shutdown");
            None
        } else {
            let record = self
                .log
                .to_record(self.lifecycle.status(), self.time_base.reference(), video_path);
            let path = self
                .store
                .save(&record)
                .await
                .with_context(|| format!("Failed to write final record for match {}", record.match_id))?;
            info!("Final record for match {} written to {}", record.match_id, path.display());
            Some(path)
        };

        if !self.unsaved.is_empty() {
            let ids: Vec<String> = self.unsaved.iter().map(|record| record.match_id.to_string()).collect();
            return Err(anyhow!("Completed match(es) never written: {}", ids.join(", ")));
        }
        Ok(path)
    }

    fn append(&mut self, detection: Detection, outcome: &mut ProcessOutcome) {
        let event = detection.stamp(&self.time_base);
        match &event.kind {
            EventKind::Kill { weapon, headshot, health, total_kills } => info!(
                match_id = %self.log.match_id(),
                "Kill #{} round {} with {} (headshot: {}, hp: {}) at {}",
                total_kills,
                event.round,
                weapon,
                headshot,
                health,
                describe_offset(&event)
            ),
            EventKind::PhaseChange { scope, phase } => debug!(
                match_id = %self.log.match_id(),
                "{} phase -> {} (round {}) at {}",
                scope,
                phase,
                event.round,
                describe_offset(&event)
            ),
        }
        self.log.append(event.clone());
        outcome.events.push(event);
    }

    /// Returns false when the start was rolled back.
    async fn start_match(&mut self, at: DateTime<Utc>) -> bool {
        if !self.config.auto_recording {
            info!(match_id = %self.log.match_id(), "Match started at {}", at);
            return true;
        }

        match self.start_recording_with_retries().await {
            Ok(reference) => {
                self.time_base.set_reference(reference);
                info!(
                    match_id = %self.log.match_id(),
                    "Match started; recording T=0 at {} ({:.3}s after detection)",
                    reference,
                    common::util::seconds_between(&at, &reference)
                );
                true
            }
            Err(e) => {
                error!("Match start abandoned, recording unavailable: {:#}", e);
                self.lifecycle.abort_start();
                false
            }
        }
    }

    async fn end_match(&mut self, reason: EndReason) {
        let video_path = if self.config.auto_recording {
            self.stop_recording().await
        } else {
            None
        };

        let record = self.log.close(self.time_base.reference(), video_path);
        if self.config.auto_recording {
            self.time_base.clear();
        }

        match reason {
            EndReason::TerminalPhase => info!(match_id = %record.match_id, "Match ended ({} events)", record.event_count),
            EndReason::RoundRegression { from, to } => info!(
                match_id = %record.match_id,
                "Match ended: round went from {} back to {} ({} events)",
                from,
                to,
                record.event_count
            ),
        }

        match self.store.save(&record).await {
            Ok(record_path) => self.hand_off(CompletedMatch { record_path, record }).await,
            Err(e) => {
                warn!(
                    match_id = %record.match_id,
                    "Failed to persist completed match, retrying on next flush: {:#}",
                    e
                );
                self.unsaved.push(record);
            }
        }
    }

    async fn save_unsaved(&mut self) {
        for record in std::mem::take(&mut self.unsaved) {
            match self.store.save(&record).await {
                Ok(record_path) => {
                    info!(match_id = %record.match_id, "Completed match written to {}", record_path.display());
                    self.hand_off(CompletedMatch { record_path, record }).await;
                }
                Err(e) => {
                    error!(match_id = %record.match_id, "Completed match still not written: {:#}", e);
                    self.unsaved.push(record);
                }
            }
        }
    }

    async fn hand_off(&self, completed: CompletedMatch) {
        if let Some(handoff) = &self.handoff {
            if handoff.send(completed).await.is_err() {
                warn!("Match hand-off receiver is gone; skipping post-processing");
            }
        }
    }

    async fn stop_recording(&self) -> Option<PathBuf> {
        match self.recorder.stop_recording().await {
            Ok(path) => path,
            Err(e) => {
                error!("Failed to stop recording: {:#}", e);
                None
            }
        }
    }

    async fn start_recording_with_retries(&self) -> Result<DateTime<Utc>> {
        let attempts = self.config.recording_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.recorder.start_recording().await {
                Ok(reference) => return Ok(reference),
                Err(e) => {
                    warn!("Recording start attempt {}/{} failed: {:#}", attempt, attempts, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.recording_retry_delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("no start attempts were made")))
            .with_context(|| format!("Recording did not start after {} attempt(s)", attempts))
    }
}

fn describe_offset(event: &Event) -> String {
    match event.video_offset_seconds {
        Some(offset) => format!("{:.2}s ({:?})", offset, event.sync),
        None => "unsynchronized".to_string(),
    }
}

/// Work items for the task that owns the synchronizer.
#[derive(Debug)]
pub enum IngestCommand {
    Snapshot {
        snapshot: Snapshot,
        received_at: DateTime<Utc>,
    },
    Flush {
        reply: oneshot::Sender<Result<PathBuf>>,
    },
    EventsForRound {
        round: u32,
        reply: oneshot::Sender<Vec<Event>>,
    },
}

/// Apply commands one at a time until cancelled, then drain what is already
/// queued and shut the synchronizer down.
pub async fn run_ingest_worker(
    mut synchronizer: MatchSynchronizer,
    mut rx: mpsc::Receiver<IngestCommand>,
    cancellation_token: CancellationToken,
) -> Option<PathBuf> {
    info!("Ingest worker started");

    loop {
        tokio::select! {
            biased;

            _ = cancellation_token.cancelled() => {
                info!("Ingest worker shutting down");
                break;
            }

            command = rx.recv() => match command {
                Some(command) => handle_command(&mut synchronizer, command).await,
                None => {
                    info!("Ingest channel closed");
                    break;
                }
            }
        }
    }

    rx.close();
    let mut drained = 0usize;
    while let Some(command) = rx.recv().await {
        handle_command(&mut synchronizer, command).await;
        drained += 1;
    }
    if drained > 0 {
        debug!("Drained {} queued command(s) before shutdown", drained);
    }

    match synchronizer.shutdown().await {
        Ok(path) => path,
        Err(e) => {
            error!("Final flush failed: {:#}", e);
            None
        }
    }
}

async fn handle_command(synchronizer: &mut MatchSynchronizer, command: IngestCommand) {
    match command {
        IngestCommand::Snapshot { snapshot, received_at } => {
            synchronizer.process_snapshot(snapshot, received_at).await;
        }
        IngestCommand::Flush { reply } => {
            let _ = reply.send(synchronizer.flush().await);
        }
        IngestCommand::EventsForRound { round, reply } => {
            let _ = reply.send(synchronizer.events_for_round(round));
        }
    }
}
