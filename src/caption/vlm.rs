//! VLM interaction: build the multimodal chat request and call the endpoint.
//!
//! The adapter is intentionally thin — prompt wording lives in
//! [`crate::prompts`] so it can change without touching request plumbing.
//! There is deliberately no retry: per the degrade-to-sentinel policy a
//! failed call becomes an empty description and the batch moves on, so a
//! struggling backend slows nothing down and corrupts nothing.
//!
//! Image bytes are sniffed before any network I/O. Bytes that are not a
//! recognisable image short-circuit to [`ItemError::InvalidImage`] without
//! spending a request on them.

use crate::config::CaptionConfig;
use crate::error::{EnrichError, ItemError};
use crate::prompts::caption_instruction;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Client for an OpenAI-compatible multimodal `/chat/completions` endpoint.
///
/// Model, max_tokens, and temperature are fixed at construction — they are
/// deployment configuration, not per-call parameters.
#[derive(Clone)]
pub struct VlmClient {
    http: reqwest::Client,
    chat_url: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
}

impl VlmClient {
    pub fn new(config: &CaptionConfig) -> Result<Self, EnrichError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth)
                .map_err(|e| EnrichError::HttpClient(format!("invalid API key: {e}")))?,
        );

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| EnrichError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            chat_url: format!("{}/chat/completions", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Generate a description for one image.
    ///
    /// Returns the raw text of the first completion choice. Callers convert
    /// any error to the empty-description sentinel; nothing here retries.
    pub async fn caption(
        &self,
        image: &[u8],
        context: &str,
        hint: Option<&str>,
    ) -> Result<String, ItemError> {
        let mime = sniff_mime(image)?;
        let data_uri = format!("data:{mime};base64,{}", STANDARD.encode(image));
        let prompt = caption_instruction(context, hint);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_uri },
                    },
                    ContentPart::Text { text: &prompt },
                ],
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .http
            .post(&self.chat_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ItemError::VlmFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ItemError::VlmFailed(format!("HTTP {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ItemError::VlmFailed(format!("bad response body: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ItemError::VlmFailed("response had no choices".into()))?;

        debug!("caption received: {} chars", content.len());
        Ok(content)
    }
}

/// Map sniffed image bytes to a MIME type, rejecting non-images.
///
/// This is the cheap stand-in for a full decode-and-verify: the magic bytes
/// are enough to catch truncated downloads, HTML error pages stored as
/// images, and plain garbage.
pub fn sniff_mime(bytes: &[u8]) -> Result<&'static str, ItemError> {
    if bytes.is_empty() {
        return Err(ItemError::InvalidImage("empty image data".into()));
    }
    let format = image::guess_format(bytes)
        .map_err(|e| ItemError::InvalidImage(e.to_string()))?;
    Ok(match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Tiff => "image/tiff",
        _ => "image/jpeg",
    })
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    ImageUrl { image_url: ImageUrl },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: String,
}
