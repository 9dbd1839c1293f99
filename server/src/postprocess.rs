use anyhow::{Context, Result, bail};
use common::{HighlightRange, MatchRecord, retain_usable, transcript_by_round};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::highlights::HighlightSelector;
use crate::render::{ClipJob, ClipRenderer, clip_name};
use crate::store::{JsonFileStore, MatchCatalog};
use crate::synchronizer::CompletedMatch;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedClip {
    pub range: HighlightRange,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessReport {
    /// Ranges the selector proposed across all rounds
    pub proposed: usize,
    /// Ranges that survived shape and priority filtering
    pub selected: Vec<HighlightRange>,
    pub clips: Vec<RenderedClip>,
    pub failed_rounds: Vec<u32>,
    pub failed_clips: usize,
}

/// Turns a closed match record into rendered highlight clips.
///
/// A failing round or clip is logged and skipped; the rest of the batch
/// still runs.
pub struct PostProcessor {
    selector: Arc<dyn HighlightSelector>,
    renderer: Arc<dyn ClipRenderer>,
    min_priority: u32,
}

impl PostProcessor {
    pub fn new(selector: Arc<dyn HighlightSelector>, renderer: Arc<dyn ClipRenderer>, min_priority: u32) -> Self {
        PostProcessor {
            selector,
            renderer,
            min_priority,
        }
    }

    pub async fn process(&self, record: &MatchRecord, video: &Path) -> ProcessReport {
        let mut report = ProcessReport::default();

        let transcripts = transcript_by_round(&record.events);
        if transcripts.is_empty() {
            info!(match_id = %record.match_id, "No synchronized events; nothing to select from");
            return report;
        }

        let mut proposed = Vec::new();
        for (round, transcript) in &transcripts {
            match self.selector.select(*round, transcript).await {
                Ok(ranges) => proposed.extend(ranges),
                Err(e) => {
                    warn!(match_id = %record.match_id, "Highlight selection failed for round {}: {:#}", round, e);
                    report.failed_rounds.push(*round);
                }
            }
        }
        report.proposed = proposed.len();
        report.selected = retain_usable(proposed, self.min_priority);

        for (index, range) in report.selected.iter().enumerate() {
            let job = ClipJob {
                source: video.to_path_buf(),
                start: range.start,
                end: range.end,
                output_name: clip_name(index + 1, range),
            };
            match self.renderer.render(&job).await {
                Ok(path) => report.clips.push(RenderedClip { range: range.clone(), path }),
                Err(e) => {
                    warn!("Skipping clip {}: {:#}", job.output_name, e);
                    report.failed_clips += 1;
                }
            }
        }

        info!(
            match_id = %record.match_id,
            "Post-processing done: {} proposed, {} selected, {} rendered, {} failed",
            report.proposed,
            report.selected.len(),
            report.clips.len(),
            report.failed_clips
        );
        report
    }
}

/// Catalog a completed match and, given a processor and a video, render its highlights.
///
/// `video` overrides the path stored in the record.
pub async fn catalog_and_process(
    catalog: Option<&MatchCatalog>,
    processor: Option<&PostProcessor>,
    completed: &CompletedMatch,
    video: Option<&Path>,
) -> Result<Option<ProcessReport>> {
    let match_id = match catalog {
        Some(catalog) => Some(catalog.record_match(&completed.record, &completed.record_path).await?),
        None => None,
    };

    let Some(processor) = processor else {
        return Ok(None);
    };
    let Some(video) = video.or(completed.record.video_path.as_deref()) else {
        warn!(
            match_id = %completed.record.match_id,
            "No recording path for this match; skipping highlights"
        );
        return Ok(None);
    };

    let report = processor.process(&completed.record, video).await;

    if let (Some(catalog), Some(id)) = (catalog, match_id) {
        for clip in &report.clips {
            catalog.record_highlight(id, &clip.path, &clip.range).await?;
        }
        catalog.mark_processed(id).await?;
    }
    Ok(Some(report))
}

/// Process the most recently cataloged match.
pub async fn process_last_match(catalog: &MatchCatalog, processor: &PostProcessor) -> Result<ProcessReport> {
    let Some(last) = catalog.last_match().await? else {
        bail!("No matches have been recorded yet");
    };
    let Some(video) = last.video_path.as_deref() else {
        bail!("Match #{} has no recording path; pass --video and --log instead", last.id);
    };

    let record_path = PathBuf::from(&last.log_path);
    let record = JsonFileStore::load(&record_path).await?;
    let completed = CompletedMatch { record_path, record };

    catalog_and_process(Some(catalog), Some(processor), &completed, Some(Path::new(video)))
        .await?
        .with_context(|| format!("Match #{} was not processed", last.id))
}

/// Receives completed matches while ingest keeps running. Ends when every
/// sender is gone.
pub async fn run_match_handoff(
    mut rx: mpsc::Receiver<CompletedMatch>,
    catalog: Option<MatchCatalog>,
    processor: Option<PostProcessor>,
) {
    info!("Match hand-off task started");
    while let Some(completed) = rx.recv().await {
        if let Err(e) = catalog_and_process(catalog.as_ref(), processor.as_ref(), &completed, None).await {
            error!(match_id = %completed.record.match_id, "Failed to hand off completed match: {:#}", e);
        }
    }
    info!("Match hand-off task finished");
}
