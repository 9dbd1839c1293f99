use anyhow::{Result, bail};
use async_trait::async_trait;
use common::HighlightRange;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use server::highlights::HighlightSelector;
use server::render::{ClipJob, ClipRenderer};

/// Selector that answers from a fixed table of ranges per round.
#[derive(Default)]
pub struct MockSelector {
    ranges: HashMap<u32, Vec<HighlightRange>>,
    failing_rounds: HashSet<u32>,
    calls: Mutex<Vec<(u32, String)>>,
}

impl MockSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, round: u32, start: f64, end: f64, label: &str, priority: u32) -> Self {
        self.ranges.entry(round).or_default().push(HighlightRange {
            start,
            end,
            label: label.to_string(),
            priority,
        });
        self
    }

    pub fn failing_round(mut self, round: u32) -> Self {
        self.failing_rounds.insert(round);
        self
    }

    /// (round, transcript) pairs in call order.
    pub fn calls(&self) -> Vec<(u32, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HighlightSelector for MockSelector {
    async fn select(&self, round: u32, transcript: &str) -> Result<Vec<HighlightRange>> {
        self.calls.lock().unwrap().push((round, transcript.to_string()));
        if self.failing_rounds.contains(&round) {
            bail!("model unavailable for round {}", round);
        }
        Ok(self.ranges.get(&round).cloned().unwrap_or_default())
    }
}

/// Renderer that pretends to write `<dir>/<name>.mp4` and can be told to fail by label.
pub struct MockRenderer {
    dir: PathBuf,
    failing_label: Option<String>,
    jobs: Mutex<Vec<ClipJob>>,
}

impl MockRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        MockRenderer {
            dir: dir.into(),
            failing_label: None,
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, label: &str) -> Self {
        self.failing_label = Some(label.to_string());
        self
    }

    pub fn jobs(&self) -> Vec<ClipJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClipRenderer for MockRenderer {
    async fn render(&self, job: &ClipJob) -> Result<PathBuf> {
        self.jobs.lock().unwrap().push(job.clone());
        if let Some(label) = &self.failing_label {
            if job.output_name.contains(label.as_str()) {
                bail!("encoder crashed");
            }
        }
        Ok(self.dir.join(format!("{}.mp4", job.output_name)))
    }
}
