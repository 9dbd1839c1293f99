use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use common::{HighlightRange, parse_highlight_response};
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

use super::HighlightSelector;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const INSTRUCTIONS: &str = r#"You pick short-form highlight clips from a first-person shooter match.

Each transcript line is "[<seconds into the recording>s] <event>".

Rank moments by:
1. Several kills close together (2K, 3K, 4K, ace)
2. Rounds won alone against several opponents
3. Headshots and one-taps
4. Kills made on low health (under 20 HP)

Clip timing:
- begin 2-3 seconds before the first kill and end 2-3 seconds after the last
- keep clips between 8 and 15 seconds
- split into separate clips when kills are more than 10 seconds apart

Reply with JSON only:
{"highlights": [{"start": 120.5, "end": 133.2, "label": "3k_headshot", "priority": 9}]}

priority runs from 1 (skip) to 10 (must clip)."#;

/// Highlight selector backed by the Gemini `generateContent` endpoint.
pub struct GeminiSelector {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiSelector {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(GeminiSelector {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Point the selector at a different API root (e.g., a local stand-in).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url.trim_end_matches('/'), self.model)
    }
}

pub fn build_prompt(round: u32, transcript: &str) -> String {
    format!(
        "{}\n\nROUND {}\n\nEvents in order:\n{}\n\nReturn the highlight ranges for this round.",
        INSTRUCTIONS, round, transcript
    )
}

fn request_body(prompt: &str) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "temperature": 0.3,
            "responseMimeType": "application/json"
        }
    })
}

/// Concatenated text parts of the first candidate.
fn response_text(body: &Value) -> Result<String> {
    let parts = body["candidates"][0]["content"]["parts"]
        .as_array()
        .context("Gemini response has no candidate content")?;
    let text: String = parts.iter().filter_map(|part| part["text"].as_str()).collect();
    if text.trim().is_empty() {
        bail!("Gemini returned an empty candidate");
    }
    Ok(text)
}

#[async_trait]
impl HighlightSelector for GeminiSelector {
    async fn select(&self, round: u32, transcript: &str) -> Result<Vec<HighlightRange>> {
        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&request_body(&build_prompt(round, transcript)))
            .send()
            .await
            .with_context(|| format!("Gemini request for round {} failed", round))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Gemini returned {} for round {}: {}", status, round, body);
        }

        let body: Value = response.json().await.context("Failed to parse Gemini response")?;
        let text = response_text(&body)?;
        debug!("Gemini reply for round {}: {}", round, text);

        let ranges = parse_highlight_response(&text)?;
        info!("Round {}: {} highlight(s) proposed", round, ranges.len());
        Ok(ranges)
    }
}
