//! Anthropic Messages API client. The service only ever asks one thing of
//! the model: look at an item (optionally with photos) and return a
//! `{min, optimal, max}` price estimate as strict JSON.

use crate::http::build_client;
use crate::pricing::models::PriceEstimate;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use eyre::Result;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static API_ROOT: Lazy<String> = Lazy::new(|| {
    std::env::var("ANTHROPIC_API_URL").unwrap_or_else(|_| "https://api.anthropic.com".into())
});

const API_VERSION: &str = "2023-06-01";

const ESTIMATE_SYSTEM_PROMPT: &str = r#"
You are a resale pricing analyst. Given an item description and optional photos,
respond with a single JSON object of the form {"min": <number>, "optimal": <number>,
"max": <number>} in whole US dollars for a local marketplace sale. Output JSON only,
no commentary.
"#;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            model: std::env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".into()),
            max_tokens: std::env::var("ANTHROPIC_MAX_TOKENS")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(4096),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("ANTHROPIC_API_KEY is not set")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid image payload: {0}")]
    InvalidImage(String),
    #[error("model output is not a price estimate")]
    UnparseableEstimate,
}

/// Base64-encoded image attached to an analyze request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineImage {
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseContent>,
    #[allow(dead_code)]
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct Usage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    /// Ask the model for a `{min, optimal, max}` estimate. Images are
    /// validated as base64 before anything goes over the wire.
    pub async fn estimate_price(
        &self,
        item_name: &str,
        category: &str,
        condition: Option<&str>,
        location_label: &str,
        images: &[InlineImage],
    ) -> Result<PriceEstimate, LlmError> {
        let mut content = image_blocks(images)?;
        content.push(ContentBlock::Text {
            text: format!(
                "Item: {item_name}\nCategory: {category}\nCondition: {condition}\nLocation: {location_label}",
                condition = condition.unwrap_or("unspecified"),
            ),
        });

        let text = self
            .send(vec![Message {
                role: "user",
                content,
            }])
            .await?;
        parse_estimate(&text).ok_or(LlmError::UnparseableEstimate)
    }

    async fn send(&self, messages: Vec<Message>) -> Result<String, LlmError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(LlmError::MissingApiKey);
        };

        let body = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: ESTIMATE_SYSTEM_PROMPT.trim().to_string(),
            messages,
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", *API_ROOT))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }

        let payload: MessagesResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        payload
            .content
            .into_iter()
            .find(|block| block.content_type == "text")
            .map(|block| block.text)
            .ok_or_else(|| LlmError::InvalidResponse("missing text block".into()))
    }
}

fn image_blocks(images: &[InlineImage]) -> Result<Vec<ContentBlock>, LlmError> {
    images
        .iter()
        .map(|image| {
            if BASE64.decode(image.data.trim()).is_err() {
                return Err(LlmError::InvalidImage(image.media_type.clone()));
            }
            Ok(ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64",
                    media_type: image.media_type.clone(),
                    data: image.data.trim().to_string(),
                },
            })
        })
        .collect()
}

/// Pull a price estimate out of model text: strip a markdown fence if one
/// is present, fall back to the outermost brace pair, then parse. Values
/// are reordered so `min <= optimal <= max` always holds.
fn parse_estimate(text: &str) -> Option<PriceEstimate> {
    #[derive(Deserialize)]
    struct RawEstimate {
        min: f64,
        optimal: f64,
        max: f64,
    }

    let cleaned = strip_markdown_fence(text);
    let raw: RawEstimate = serde_json::from_str(&cleaned)
        .ok()
        .or_else(|| {
            let start = cleaned.find('{')?;
            let end = cleaned.rfind('}')?;
            serde_json::from_str(&cleaned[start..=end]).ok()
        })?;

    Some(
        PriceEstimate {
            min: raw.min.round() as i64,
            optimal: raw.optimal.round() as i64,
            max: raw.max.round() as i64,
        }
        .normalized(),
    )
}

fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}
