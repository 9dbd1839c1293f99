use anyhow::{Context, Result, bail};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use common::{LifecycleConfig, PhaseScope};

use crate::recording::obs::ObsConfig;

/// Which recording controller drives T=0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderKind {
    Obs,
    /// Recording is managed outside this process; T=0 is the local clock at match start.
    External,
}

impl FromStr for RecorderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "obs" => Ok(RecorderKind::Obs),
            "external" => Ok(RecorderKind::External),
            other => Err(format!("unknown recorder '{}' (expected 'obs' or 'external')", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HighlightConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub min_priority: u32,
    pub output_dir: PathBuf,
    pub ffmpeg: PathBuf,
    pub use_gpu: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the game-state feed posts to (e.g., "127.0.0.1:3000")
    pub gsi_addr: String,
    /// Token the game client must send in `auth.token`, if set
    pub gsi_auth_token: Option<String>,
    pub request_timeout: Duration,
    pub queue_capacity: usize,
    /// Directory match records are written to
    pub log_dir: PathBuf,
    /// SQLite match catalog
    pub db_path: PathBuf,
    pub recorder: RecorderKind,
    pub obs: ObsConfig,
    /// Start/stop recording on match lifecycle signals. When off, recording
    /// runs for the whole session.
    pub auto_recording: bool,
    /// Generate highlights in the background after each match
    pub auto_process: bool,
    pub recording_retries: u32,
    pub recording_retry_delay: Duration,
    pub lifecycle: LifecycleConfig,
    /// Which phase field feeds the lifecycle state machine
    pub phase_source: PhaseScope,
    pub highlights: HighlightConfig,
}

impl Config {
    /// Read configuration from the environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = LifecycleConfig::default();
        let request_timeout = Duration::from_millis(env_or("KILLCAM_REQUEST_TIMEOUT_MS", 5_000u64)?);
        let queue_capacity: usize = env_or("KILLCAM_QUEUE_CAPACITY", 256)?;
        if queue_capacity == 0 {
            bail!("KILLCAM_QUEUE_CAPACITY must be at least 1");
        }

        Ok(Config {
            gsi_addr: env_or("KILLCAM_GSI_ADDR", "127.0.0.1:3000".to_string())?,
            gsi_auth_token: env_opt("KILLCAM_GSI_AUTH_TOKEN"),
            request_timeout,
            queue_capacity,
            log_dir: env_or("KILLCAM_LOG_DIR", PathBuf::from("match_logs"))?,
            db_path: env_or("KILLCAM_DB_PATH", PathBuf::from("matches.db"))?,
            recorder: env_or("KILLCAM_RECORDER", RecorderKind::Obs)?,
            obs: ObsConfig {
                host: env_or("KILLCAM_OBS_HOST", "localhost".to_string())?,
                port: env_or("KILLCAM_OBS_PORT", 4455u16)?,
                password: env_or("KILLCAM_OBS_PASSWORD", String::new())?,
                request_timeout: Duration::from_millis(env_or("KILLCAM_OBS_TIMEOUT_MS", 5_000u64)?),
            },
            auto_recording: env_or("KILLCAM_AUTO_RECORDING", true)?,
            auto_process: env_or("KILLCAM_AUTO_PROCESS", false)?,
            recording_retries: env_or("KILLCAM_RECORDING_RETRIES", 3)?,
            recording_retry_delay: Duration::from_millis(env_or("KILLCAM_RECORDING_RETRY_DELAY_MS", 2_000u64)?),
            lifecycle: LifecycleConfig {
                live_phase: env_or("KILLCAM_LIVE_PHASE", defaults.live_phase)?,
                terminal_phase: env_or("KILLCAM_TERMINAL_PHASE", defaults.terminal_phase)?,
                round_regression_threshold: env_or(
                    "KILLCAM_ROUND_REGRESSION_THRESHOLD",
                    defaults.round_regression_threshold,
                )?,
            },
            phase_source: env_or("KILLCAM_PHASE_SOURCE", PhaseScope::Map)?,
            highlights: HighlightConfig {
                api_key: env_opt("GOOGLE_API_KEY"),
                model: env_or("KILLCAM_GEMINI_MODEL", "gemini-1.5-flash".to_string())?,
                min_priority: env_or("KILLCAM_MIN_PRIORITY", 6)?,
                output_dir: env_or("KILLCAM_OUTPUT_DIR", PathBuf::from("highlights"))?,
                ffmpeg: env_or("KILLCAM_FFMPEG", PathBuf::from("ffmpeg"))?,
                use_gpu: env_or("KILLCAM_USE_GPU", true)?,
            },
        })
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Invalid value for {}: {:?}", key, raw))
}
