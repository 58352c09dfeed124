//! Anthropic messages API client.

use super::types::{AdvisorError, AudioSummary, StyleSuggestionResponse};
use super::StyleAdvisor;
use crate::config::StyleAdvisorSettings;
use crate::keyframes::VisualStyle;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const REFINE_MAX_TOKENS: u32 = 256;

const SUGGEST_SYSTEM_PROMPT: &str = "You are an expert music visualization artist. You study \
    audio characteristics and recommend visual styles. Always answer with valid JSON only.";
const REFINE_SYSTEM_PROMPT: &str = "You are a Stable Diffusion prompt engineer working on music \
    visualizations. Improve prompts so they produce vivid, beat-synchronized imagery. Answer with \
    the refined prompt only.";

pub struct ClaudeStyleAdvisor {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl ClaudeStyleAdvisor {
    pub fn new(api_key: impl Into<String>, settings: &StyleAdvisorSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    async fn send(
        &self,
        system: &str,
        user_message: String,
        max_tokens: u32,
    ) -> Result<String, AdvisorError> {
        let url = format!("{}/v1/messages", self.base_url);
        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            system,
            messages: vec![RequestMessage {
                role: "user",
                content: user_message,
            }],
        };

        debug!(model = %self.model, "Sending request to style advisor");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdvisorError::Timeout
                } else {
                    AdvisorError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdvisorError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            AdvisorError::InvalidResponse(format!("Failed to parse messages response: {}", e))
        })?;

        parsed
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| AdvisorError::InvalidResponse("No text content in response".to_string()))
    }
}

#[async_trait]
impl StyleAdvisor for ClaudeStyleAdvisor {
    async fn suggest_styles(
        &self,
        summary: &AudioSummary,
    ) -> Result<StyleSuggestionResponse, AdvisorError> {
        let text = self
            .send(
                SUGGEST_SYSTEM_PROMPT,
                suggestion_prompt(summary),
                self.max_tokens,
            )
            .await?;
        parse_suggestions(&text)
    }

    async fn refine_prompt(
        &self,
        prompt: &str,
        summary: &AudioSummary,
    ) -> Result<String, AdvisorError> {
        let text = self
            .send(
                REFINE_SYSTEM_PROMPT,
                refine_prompt_message(prompt, summary),
                REFINE_MAX_TOKENS,
            )
            .await?;
        Ok(text.trim().to_string())
    }
}

fn format_bpm(summary: &AudioSummary) -> String {
    summary
        .bpm
        .map(|bpm| format!("{:.0}", bpm))
        .unwrap_or_else(|| "unknown".to_string())
}

fn format_duration(summary: &AudioSummary) -> String {
    summary
        .duration
        .map(|d| format!("{}s", d.round()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn suggestion_prompt(summary: &AudioSummary) -> String {
    let styles = VisualStyle::ALL
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let density = summary
        .beat_density()
        .map(|d| format!("{:.2}", d))
        .unwrap_or_else(|| "unknown".to_string());

    format!(
        r##"Suggest the best visual styles for an audio visualization of this track.

Track statistics:
- BPM: {bpm}
- Duration: {duration}
- Beat density: {density} beats/sec
- Peak moments: {peaks}
- Beats detected: {beats}
- Onsets detected: {onsets}

Available visual styles: {styles}

Answer ONLY with JSON of this shape, without markdown:
{{
  "overallMood": "<2-5 word mood>",
  "recommendedMode": "procedural" or "ai-hybrid",
  "suggestions": [
    {{
      "styleId": "<one of the available styles>",
      "score": <0.0-1.0>,
      "explanation": "<why this style fits, 1-2 sentences>",
      "suggestedPrompt": "<Stable Diffusion prompt, 10-20 words>",
      "suggestedPalette": ["#rrggbb", "#rrggbb", "#rrggbb"]
    }}
  ]
}}

Rank all {count} styles by score, highest first. Prefer "ai-hybrid" for energetic tracks above 90 BPM."##,
        bpm = format_bpm(summary),
        duration = format_duration(summary),
        density = density,
        peaks = summary.peak_count,
        beats = summary.beat_count,
        onsets = summary.onset_count,
        styles = styles,
        count = VisualStyle::ALL.len(),
    )
}

fn refine_prompt_message(prompt: &str, summary: &AudioSummary) -> String {
    format!(
        "Improve this Stable Diffusion prompt for a {} BPM track lasting {}.\n\n\
         Base prompt: \"{}\"\n\n\
         Reply with an improved prompt of 15-30 words with richer artistic detail, lighting \
         and style descriptors.",
        format_bpm(summary),
        format_duration(summary),
        prompt
    )
}

/// Removes a surrounding markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string ("json") on the opening fence line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

pub fn parse_suggestions(text: &str) -> Result<StyleSuggestionResponse, AdvisorError> {
    serde_json::from_str(strip_code_fences(text)).map_err(|e| {
        let preview: String = text.chars().take(200).collect();
        AdvisorError::InvalidResponse(format!("{}: {}", e, preview))
    })
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<RequestMessage>,
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}
