//! The embedding-model contract and the bundled HTTP implementation.
//!
//! Workers own their model instance exclusively, so the trait is `Send` but
//! not `Sync` and `embed` takes `&self` on a single thread. Construction goes
//! through a [`ModelFactory`] closure invoked *inside* each worker thread
//! with that worker's device index; heavyweight backends load their weights
//! there, once per worker lifetime.

use crate::error::{EnrichError, ItemError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A text-embedding backend owned by exactly one worker.
pub trait EmbeddingModel: Send {
    /// Dimensionality of produced vectors, used for zero-vector sentinels.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input in input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ItemError>;
}

/// Constructs one model per worker; the argument is the device index the
/// worker is bound to (`worker % devices`).
pub type ModelFactory =
    Arc<dyn Fn(usize) -> Result<Box<dyn EmbeddingModel>, EnrichError> + Send + Sync>;

/// The sentinel vector recorded for a text that could not be embedded.
pub fn zero_vector(dimension: usize) -> Vec<f32> {
    vec![0.0; dimension]
}

// ── HTTP-backed model ────────────────────────────────────────────────────

/// An [`EmbeddingModel`] over an OpenAI-compatible `/embeddings` endpoint.
///
/// Uses a blocking client: embedding workers are dedicated OS threads, not
/// async tasks, so there is no executor to starve.
pub struct HttpEmbedder {
    http: reqwest::blocking::Client,
    url: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: &str,
        api_key: &str,
        model: &str,
        dimension: usize,
    ) -> Result<Self, EnrichError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth)
                .map_err(|e| EnrichError::HttpClient(format!("invalid API key: {e}")))?,
        );
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .default_headers(headers)
            .build()
            .map_err(|e| EnrichError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            url: format!("{}/embeddings", endpoint.trim_end_matches('/')),
            model: model.to_string(),
            dimension,
        })
    }

    /// A [`ModelFactory`] producing one `HttpEmbedder` per worker.
    ///
    /// The device index only shows up in logs — an HTTP backend does its own
    /// placement — but the factory is still invoked per worker so each thread
    /// owns its own connection pool.
    pub fn factory(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> ModelFactory {
        let endpoint = endpoint.into();
        let api_key = api_key.into();
        let model = model.into();
        Arc::new(move |device| {
            debug!("constructing HTTP embedder for device {device}");
            let embedder = HttpEmbedder::new(&endpoint, &api_key, &model, dimension)?;
            Ok(Box::new(embedder) as Box<dyn EmbeddingModel>)
        })
    }
}

impl EmbeddingModel for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ItemError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .map_err(|e| ItemError::EmbedFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ItemError::EmbedFailed(format!("HTTP {status}: {body}")));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| ItemError::EmbedFailed(format!("bad response body: {e}")))?;

        // The API may return entries out of order; index is authoritative.
        parsed.data.sort_by_key(|d| d.index);
        if parsed.data.len() != texts.len() {
            return Err(ItemError::EmbedFailed(format!(
                "requested {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}
