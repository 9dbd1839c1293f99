use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use common::HighlightRange;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// 16:9 gameplay centered over a blurred copy of itself, on a 1080x1920 canvas.
pub const VERTICAL_BLUR_FILTER: &str =
    "[0:v]scale=-1:1920,crop=1080:1920,boxblur=20:5[bg];[0:v]scale=1080:-1[fg];[bg][fg]overlay=(W-w)/2:(H-h)/2[v]";

const RENDER_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq)]
pub struct ClipJob {
    pub source: PathBuf,
    pub start: f64,
    pub end: f64,
    /// File stem of the clip, without extension
    pub output_name: String,
}

impl ClipJob {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[async_trait]
pub trait ClipRenderer: Send + Sync {
    /// Render one clip and return the written file.
    async fn render(&self, job: &ClipJob) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderProfile {
    Nvenc,
    Qsv,
    Cpu,
}

impl EncoderProfile {
    /// Pick the best H.264 encoder out of `ffmpeg -encoders` output.
    pub fn from_encoder_list(list: &str, use_gpu: bool) -> Self {
        if use_gpu && list.contains("h264_nvenc") {
            EncoderProfile::Nvenc
        } else if use_gpu && list.contains("h264_qsv") {
            EncoderProfile::Qsv
        } else {
            EncoderProfile::Cpu
        }
    }

    fn args(&self) -> &'static [&'static str] {
        match self {
            EncoderProfile::Nvenc => &[
                "-c:v", "h264_nvenc", "-preset", "p4", "-rc", "vbr", "-cq", "23", "-b:v", "5M", "-maxrate", "8M",
                "-bufsize", "10M",
            ],
            EncoderProfile::Qsv => &["-c:v", "h264_qsv", "-preset", "medium", "-global_quality", "23"],
            EncoderProfile::Cpu => &["-c:v", "libx264", "-preset", "medium", "-crf", "23"],
        }
    }
}

/// File stem for the `index`-th clip (1-based): `clip_<nn>_<label>_<start>`.
pub fn clip_name(index: usize, range: &HighlightRange) -> String {
    format!("clip_{:02}_{}_{:.0}", index, sanitize_label(&range.label), range.start.max(0.0))
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(40)
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "highlight".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Renders clips by running ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegRenderer {
    ffmpeg: PathBuf,
    output_dir: PathBuf,
    filter_graph: String,
    encoder: EncoderProfile,
}

impl FfmpegRenderer {
    pub fn new(ffmpeg: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, encoder: EncoderProfile) -> Self {
        FfmpegRenderer {
            ffmpeg: ffmpeg.into(),
            output_dir: output_dir.into(),
            filter_graph: VERTICAL_BLUR_FILTER.to_string(),
            encoder,
        }
    }

    /// Ask ffmpeg which encoders it has and pick a profile. Falls back to
    /// the CPU encoder when the probe fails.
    pub async fn detect(ffmpeg: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, use_gpu: bool) -> Self {
        let ffmpeg = ffmpeg.into();
        let encoder = if use_gpu {
            match Command::new(&ffmpeg).args(["-hide_banner", "-encoders"]).output().await {
                Ok(output) => EncoderProfile::from_encoder_list(&String::from_utf8_lossy(&output.stdout), true),
                Err(e) => {
                    warn!("Could not probe {} for encoders: {}", ffmpeg.display(), e);
                    EncoderProfile::Cpu
                }
            }
        } else {
            EncoderProfile::Cpu
        };
        info!("Using {:?} encoder profile", encoder);
        Self::new(ffmpeg, output_dir, encoder)
    }

    pub fn with_filter_graph(mut self, filter_graph: impl Into<String>) -> Self {
        self.filter_graph = filter_graph.into();
        self
    }

    pub fn encoder(&self) -> EncoderProfile {
        self.encoder
    }

    pub fn output_path(&self, job: &ClipJob) -> PathBuf {
        self.output_dir.join(format!("{}.mp4", job.output_name))
    }

    pub fn command_args(&self, job: &ClipJob, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-y".into(),
            // Seeking before -i jumps to the nearest keyframe instead of decoding up to it.
            "-ss".into(),
            format!("{:.3}", job.start),
            "-i".into(),
            job.source.to_string_lossy().into_owned(),
            "-t".into(),
            format!("{:.3}", job.duration()),
            "-filter_complex".into(),
            self.filter_graph.clone(),
            "-map".into(),
            "[v]".into(),
            "-map".into(),
            "0:a?".into(),
        ];
        args.extend(self.encoder.args().iter().map(|arg| arg.to_string()));
        args.extend(
            ["-c:a", "aac", "-b:a", "128k", "-ac", "2", "-movflags", "+faststart", "-pix_fmt", "yuv420p"]
                .iter()
                .map(|arg| arg.to_string()),
        );
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl ClipRenderer for FfmpegRenderer {
    async fn render(&self, job: &ClipJob) -> Result<PathBuf> {
        if !(job.duration() > 0.0) {
            bail!("Clip {} has no duration ({} -> {})", job.output_name, job.start, job.end);
        }
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create output directory {}", self.output_dir.display()))?;

        let output = self.output_path(job);
        let args = self.command_args(job, &output);
        debug!("Running {} {}", self.ffmpeg.display(), args.join(" "));
        info!("Rendering {} ({:.1}s -> {:.1}s)", output.display(), job.start, job.end);

        let child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run {}", self.ffmpeg.display()))?;

        let result = tokio::time::timeout(RENDER_TIMEOUT, child.wait_with_output())
            .await
            .with_context(|| format!("ffmpeg timed out rendering {}", job.output_name))?
            .context("Failed to wait for ffmpeg")?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            bail!(
                "ffmpeg exited with {} for {}: {}",
                result.status,
                job.output_name,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            );
        }
        if !output.exists() {
            bail!("ffmpeg reported success but {} is missing", output.display());
        }

        info!("Rendered {}", output.display());
        Ok(output)
    }
}
