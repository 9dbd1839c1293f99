mod support;

use ::common::{Detection, EventKind, EventLog, MatchRecord, PhaseScope, TimeBase};
use anyhow::Result;
use chrono::Duration as ChronoDuration;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use server::postprocess::{PostProcessor, catalog_and_process, process_last_match, run_match_handoff};
use server::store::{JsonFileStore, MatchCatalog, MatchStore};
use server::synchronizer::CompletedMatch;
use support::{MockRenderer, MockSelector};

fn kill(total_kills: u64) -> EventKind {
    EventKind::Kill {
        weapon: "weapon_awp".to_string(),
        headshot: total_kills % 2 == 0,
        health: 100,
        total_kills,
    }
}

/// Three synchronized rounds with one kill each, plus a warmup kill before T=0 was known.
fn recorded_match(video: Option<&str>) -> MatchRecord {
    let reference = ::common::util::now();
    let mut log = EventLog::new();

    log.append(
        Detection {
            detected_at: reference - ChronoDuration::seconds(30),
            round: 0,
            kind: kill(1),
        }
        .stamp(&TimeBase::new()),
    );

    let time_base = TimeBase::with_reference(reference);
    let mut at = reference;
    for round in 1..=3 {
        at += ChronoDuration::seconds(20);
        log.append(
            Detection {
                detected_at: at,
                round,
                kind: EventKind::PhaseChange { scope: PhaseScope::Round, phase: "live".to_string() },
            }
            .stamp(&time_base),
        );
        at += ChronoDuration::seconds(15);
        log.append(
            Detection {
                detected_at: at,
                round,
                kind: kill(u64::from(round) + 1),
            }
            .stamp(&time_base),
        );
    }

    log.close(Some(reference), video.map(PathBuf::from))
}

fn selector() -> MockSelector {
    MockSelector::new()
        .with_range(1, 10.0, 20.0, "ace", 9)
        .with_range(1, 30.0, 25.0, "backwards", 9)
        .with_range(1, 40.0, 50.0, "eco", 2)
        .with_range(2, 60.0, 70.0, "clutch", 6)
        .failing_round(3)
}

async fn completed(dir: &Path, video: Option<&str>) -> Result<CompletedMatch> {
    let record = recorded_match(video);
    let record_path = JsonFileStore::new(dir).save(&record).await?;
    Ok(CompletedMatch { record_path, record })
}

#[tokio::test]
async fn test_process_skips_failures_and_keeps_going() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let selector = Arc::new(selector());
    let renderer = Arc::new(MockRenderer::new("/clips").failing_on("clutch"));
    let processor = PostProcessor::new(selector.clone(), renderer.clone(), 5);

    let record = recorded_match(Some("/videos/match.mkv"));
    let report = processor.process(&record, Path::new("/videos/match.mkv")).await;

    let rounds: Vec<u32> = selector.calls().iter().map(|(round, _)| *round).collect();
    assert_eq!(rounds, vec![1, 2, 3]);
    assert!(selector.calls()[0].1.contains("KILL weapon=awp"));

    assert_eq!(report.proposed, 4);
    let labels: Vec<&str> = report.selected.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["ace", "clutch"]);
    assert_eq!(report.failed_rounds, vec![3]);
    assert_eq!(report.failed_clips, 1);

    assert_eq!(report.clips.len(), 1);
    assert_eq!(report.clips[0].range.label, "ace");
    assert_eq!(report.clips[0].path, PathBuf::from("/clips/clip_01_ace_10.mp4"));

    let jobs = renderer.jobs();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[1].output_name, "clip_02_clutch_60");
    assert_eq!(jobs[1].source, PathBuf::from("/videos/match.mkv"));
    assert_eq!(jobs[1].duration(), 10.0);
    Ok(())
}

#[tokio::test]
async fn test_untimed_events_never_reach_the_selector() -> Result<()> {
    let selector = Arc::new(MockSelector::new());
    let renderer = Arc::new(MockRenderer::new("/clips"));
    let processor = PostProcessor::new(selector.clone(), renderer.clone(), 1);

    let mut record = recorded_match(None);
    record.events.retain(|e| e.video_offset_seconds.is_none());
    assert_eq!(record.events.len(), 1);

    let report = processor.process(&record, Path::new("/videos/match.mkv")).await;
    assert!(selector.calls().is_empty());
    assert!(renderer.jobs().is_empty());
    assert_eq!(report.proposed, 0);
    assert!(report.clips.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_catalog_and_process_records_highlights() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let catalog = MatchCatalog::open_in_memory().await?;
    let processor = PostProcessor::new(Arc::new(selector()), Arc::new(MockRenderer::new("/clips")), 5);
    let completed = completed(dir.path(), Some("/videos/match.mkv")).await?;

    let report = catalog_and_process(Some(&catalog), Some(&processor), &completed, None)
        .await?
        .expect("a match with a video is processed");
    assert_eq!(report.clips.len(), 2);

    let row = catalog.last_match().await?.expect("match is cataloged");
    assert_eq!(row.match_uuid, completed.record.match_id.to_string());
    assert_eq!(row.video_path.as_deref(), Some("/videos/match.mkv"));
    assert_eq!(row.total_kills, 4);
    assert_eq!(row.total_rounds, 3);
    assert!(row.processed);
    assert_eq!(row.highlights_generated, 2);

    let highlights = catalog.highlights_for(row.id).await?;
    let labels: Vec<&str> = highlights.iter().map(|h| h.label.as_str()).collect();
    assert_eq!(labels, vec!["ace", "clutch"]);
    assert_eq!(highlights[0].clip_path, "/clips/clip_01_ace_10.mp4");
    Ok(())
}

#[tokio::test]
async fn test_match_without_video_is_cataloged_only() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let catalog = MatchCatalog::open_in_memory().await?;
    let selector = Arc::new(selector());
    let processor = PostProcessor::new(selector.clone(), Arc::new(MockRenderer::new("/clips")), 5);
    let no_video = completed(dir.path(), None).await?;

    let report = catalog_and_process(Some(&catalog), Some(&processor), &no_video, None).await?;
    assert!(report.is_none());
    assert!(selector.calls().is_empty());

    let row = catalog.last_match().await?.expect("match is cataloged");
    assert!(!row.processed);
    assert_eq!(row.highlights_generated, 0);

    // Without a processor nothing is rendered even when a video exists
    let with_video = completed(dir.path(), Some("/videos/other.mkv")).await?;
    assert!(catalog_and_process(Some(&catalog), None, &with_video, None).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_process_last_match_reloads_the_record() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let catalog = MatchCatalog::open_in_memory().await?;
    let processor = PostProcessor::new(Arc::new(selector()), Arc::new(MockRenderer::new("/clips")), 5);

    assert!(process_last_match(&catalog, &processor).await.is_err());

    let first = completed(dir.path(), Some("/videos/first.mkv")).await?;
    catalog.record_match(&first.record, &first.record_path).await?;
    let second = completed(dir.path(), Some("/videos/second.mkv")).await?;
    catalog.record_match(&second.record, &second.record_path).await?;

    let report = process_last_match(&catalog, &processor).await?;
    assert_eq!(report.clips.len(), 2);

    let row = catalog.last_match().await?.expect("match is cataloged");
    assert_eq!(row.match_uuid, second.record.match_id.to_string());
    assert!(row.processed);
    Ok(())
}

#[tokio::test]
async fn test_handoff_task_catalogs_every_completed_match() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let catalog = MatchCatalog::open_in_memory().await?;
    let renderer = Arc::new(MockRenderer::new("/clips"));
    let processor = PostProcessor::new(Arc::new(selector()), renderer.clone(), 5);

    let (tx, rx) = mpsc::channel(4);
    let task = tokio::spawn(run_match_handoff(rx, Some(catalog.clone()), Some(processor)));

    let completed = completed(dir.path(), Some("/videos/match.mkv")).await?;
    tx.send(completed.clone()).await?;
    drop(tx);

    tokio::time::timeout(std::time::Duration::from_secs(10), task).await??;

    let row = catalog.last_match().await?.expect("match is cataloged");
    assert_eq!(row.match_uuid, completed.record.match_id.to_string());
    assert!(row.processed);
    assert_eq!(renderer.jobs().len(), 2);
    Ok(())
}
