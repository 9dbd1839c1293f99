use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use server::config::{Config, RecorderKind};
use server::highlights::GeminiSelector;
use server::ingest_server::{IngestServer, IngestServerConfig};
use server::postprocess::{PostProcessor, catalog_and_process, process_last_match, run_match_handoff};
use server::recording::obs::ObsRecorder;
use server::recording::{ExternalRecorder, RecordingController};
use server::render::FfmpegRenderer;
use server::store::{JsonFileStore, MatchCatalog, MatchStore};
use server::synchronizer::{CompletedMatch, MatchSynchronizer, SynchronizerConfig};

/// Completed matches waiting for the hand-off task
const HANDOFF_CAPACITY: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "killcam", about = "Sync game telemetry to a recording and cut highlight clips")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Receive the game-state feed and log matches until Ctrl+C
    Record {
        /// Address to listen on (overrides KILLCAM_GSI_ADDR)
        #[arg(long)]
        addr: Option<String>,
    },
    /// Select and render highlights for a recorded match
    Process {
        /// Use the most recently recorded match
        #[arg(long, conflicts_with_all = ["video", "log"])]
        last: bool,

        /// Recording to cut clips from
        #[arg(long, requires = "log")]
        video: Option<PathBuf>,

        /// Match record written during recording
        #[arg(long, requires = "video")]
        log: Option<PathBuf>,

        /// Minimum priority (1-10) a highlight needs to be rendered
        #[arg(long)]
        min_priority: Option<u32>,

        /// Directory for rendered clips
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    match cli.command {
        Command::Record { addr } => {
            if let Some(addr) = addr {
                config.gsi_addr = addr;
            }
            record(config).await
        }
        Command::Process { last, video, log, min_priority, output } => {
            if let Some(min_priority) = min_priority {
                config.highlights.min_priority = min_priority;
            }
            if let Some(output) = output {
                config.highlights.output_dir = output;
            }
            process(config, last, video, log).await
        }
    }
}

async fn record(config: Config) -> Result<()> {
    let recorder: Arc<dyn RecordingController> = match config.recorder {
        RecorderKind::Obs => Arc::new(ObsRecorder::new(config.obs.clone())),
        RecorderKind::External => Arc::new(ExternalRecorder::new()),
    };
    let store: Arc<dyn MatchStore> = Arc::new(JsonFileStore::new(&config.log_dir));

    let catalog = match MatchCatalog::open(&config.db_path).await {
        Ok(catalog) => Some(catalog),
        Err(e) => {
            warn!("Match catalog unavailable, matches will not be cataloged: {:#}", e);
            None
        }
    };
    let processor = if config.auto_process {
        build_processor(&config).await.map_err(|e| warn!("Automatic processing disabled: {:#}", e)).ok()
    } else {
        None
    };

    let (handoff_tx, handoff_rx) = mpsc::channel::<CompletedMatch>(HANDOFF_CAPACITY);
    let handoff = tokio::spawn(run_match_handoff(handoff_rx, catalog, processor));

    let mut synchronizer =
        MatchSynchronizer::new(SynchronizerConfig::from(&config), recorder, store).with_handoff(handoff_tx);
    synchronizer.prepare().await?;

    let server = IngestServer::start(IngestServerConfig::from(&config), synchronizer).await?;
    info!("Match records go to {}", config.log_dir.display());
    info!("Waiting for game state on {} (Ctrl+C to stop)...", server.local_addr());

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Received shutdown signal. Shutting down gracefully...");

    if let Some(path) = server.shutdown().await? {
        info!("Open match saved to {}", path.display());
    }

    // The synchronizer held the only sender, so the hand-off task ends once its queue is empty.
    match tokio::time::timeout(Duration::from_secs(30), handoff).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Match hand-off task panicked: {:?}", e),
        Err(_) => warn!("Match hand-off still busy; exiting without waiting"),
    }
    Ok(())
}

async fn process(config: Config, last: bool, video: Option<PathBuf>, log: Option<PathBuf>) -> Result<()> {
    let processor = build_processor(&config).await?;
    let catalog = MatchCatalog::open(&config.db_path).await?;

    let report = match (last, video, log) {
        (true, _, _) => process_last_match(&catalog, &processor).await?,
        (false, Some(video), Some(log)) => {
            let record = JsonFileStore::load(&log).await?;
            let completed = CompletedMatch { record_path: log, record };
            catalog_and_process(Some(&catalog), Some(&processor), &completed, Some(&video))
                .await?
                .context("Match was not processed")?
        }
        _ => bail!("Pass either --last or both --video and --log"),
    };

    for clip in &report.clips {
        info!("  {} [{}] {}", clip.path.display(), clip.range.priority, clip.range.label);
    }
    info!("{} clip(s) written to {}", report.clips.len(), config.highlights.output_dir.display());
    Ok(())
}

async fn build_processor(config: &Config) -> Result<PostProcessor> {
    let api_key = config
        .highlights
        .api_key
        .clone()
        .context("GOOGLE_API_KEY must be set for highlight selection")?;
    let selector = GeminiSelector::new(api_key, config.highlights.model.clone())?;
    let renderer = FfmpegRenderer::detect(
        config.highlights.ffmpeg.clone(),
        config.highlights.output_dir.clone(),
        config.highlights.use_gpu,
    )
    .await;
    Ok(PostProcessor::new(Arc::new(selector), Arc::new(renderer), config.highlights.min_priority))
}
