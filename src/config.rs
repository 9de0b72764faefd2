//! Configuration types for the two enrichment pipelines.
//!
//! Each pipeline gets one config struct built through a builder, mirroring
//! the layout of every other knob-heavy type in this codebase: callers set
//! only what they care about and rely on documented defaults for the rest.
//! Configs are `Clone + Serialize` so a run can log exactly what it was
//! configured with.

use crate::error::EnrichError;
use serde::{Deserialize, Serialize};

/// Configuration for the image-captioning pipeline.
///
/// Built via [`CaptionConfig::builder()`] or [`CaptionConfig::default()`].
///
/// # Example
/// ```rust
/// use corpus_enrich::CaptionConfig;
///
/// let config = CaptionConfig::builder()
///     .input_prefix("corpus/jsonl/")
///     .output_prefix("corpus/image_desc/")
///     .image_prefix("corpus/imgs/")
///     .endpoint("http://localhost:8007/v1")
///     .concurrency(20)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionConfig {
    /// Store prefix listing the input JSONL files.
    pub input_prefix: String,

    /// Store prefix where output JSONL files are written. A file is skipped
    /// when its derived output key already exists under this prefix.
    pub output_prefix: String,

    /// Store prefix prepended to each image item's `web_url`/`url`.
    pub image_prefix: String,

    /// Base URL of the OpenAI-compatible chat endpoint, without the
    /// `/chat/completions` suffix.
    pub endpoint: String,

    /// Bearer token for the endpoint. Self-hosted vLLM-style deployments
    /// commonly accept any placeholder value.
    pub api_key: String,

    /// Model identifier sent with every request. Fixed configuration, not a
    /// per-call parameter.
    pub model: String,

    /// Maximum tokens the VLM may generate per caption. Default: 1024.
    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.1 — captions should describe what is
    /// on the page, not improvise.
    pub temperature: f32,

    /// Maximum in-flight VLM calls. Default: 20.
    ///
    /// The endpoint is network-bound; raising this widens the fan-out until
    /// the backend starts shedding load. There is no retry, so an overloaded
    /// backend shows up directly as empty descriptions.
    pub concurrency: usize,

    /// Lines per in-memory batch within one file. Default: 1024.
    ///
    /// Bounds how many fetched images and pending tasks exist at once;
    /// batches are processed sequentially, items within a batch concurrently.
    pub lines_per_batch: usize,

    /// Per-call HTTP timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            input_prefix: String::new(),
            output_prefix: String::new(),
            image_prefix: String::new(),
            endpoint: "http://localhost:8007/v1".into(),
            api_key: "EMPTY".into(),
            model: "Qwen2.5-VL-72B-Instruct".into(),
            max_tokens: 1024,
            temperature: 0.1,
            concurrency: 20,
            lines_per_batch: 1024,
            api_timeout_secs: 60,
        }
    }
}

impl CaptionConfig {
    pub fn builder() -> CaptionConfigBuilder {
        CaptionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`CaptionConfig`].
#[derive(Debug)]
pub struct CaptionConfigBuilder {
    config: CaptionConfig,
}

impl CaptionConfigBuilder {
    pub fn input_prefix(mut self, p: impl Into<String>) -> Self {
        self.config.input_prefix = p.into();
        self
    }

    pub fn output_prefix(mut self, p: impl Into<String>) -> Self {
        self.config.output_prefix = p.into();
        self
    }

    pub fn image_prefix(mut self, p: impl Into<String>) -> Self {
        self.config.image_prefix = p.into();
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn lines_per_batch(mut self, n: usize) -> Self {
        self.config.lines_per_batch = n.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CaptionConfig, EnrichError> {
        let c = &self.config;
        if c.input_prefix.is_empty() || c.output_prefix.is_empty() {
            return Err(EnrichError::InvalidConfig(
                "input_prefix and output_prefix must be set".into(),
            ));
        }
        if c.input_prefix == c.output_prefix {
            return Err(EnrichError::InvalidConfig(
                "output_prefix must differ from input_prefix (outputs would clobber inputs)"
                    .into(),
            ));
        }
        if c.endpoint.is_empty() {
            return Err(EnrichError::InvalidConfig("endpoint must be set".into()));
        }
        Ok(self.config)
    }
}

/// Configuration for the text-embedding pipeline.
///
/// Built via [`EmbedConfig::builder()`] or [`EmbedConfig::default()`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Store prefix listing the input JSONL files.
    pub input_prefix: String,

    /// Store prefix where output JSONL files are written.
    pub output_prefix: String,

    /// Worker threads in the pool, each owning one model instance. Default: 8.
    pub workers: usize,

    /// Compute devices available; worker `i` binds to device `i % devices`
    /// for the pool's lifetime. Default: 8.
    pub devices: usize,

    /// Texts per model `embed` call. Default: 512.
    pub embed_batch_size: usize,

    /// Byte cap for one line batch submitted to a worker. Default: 10 MiB.
    ///
    /// Batching by cumulative UTF-8 bytes rather than line count keeps
    /// memory per batch bounded when line sizes vary wildly — a single
    /// oversized line still forms its own batch rather than being split.
    pub max_batch_bytes: usize,

    /// Chunk window size in characters. Default: 1024.
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks. Default: 50.
    pub overlap: usize,

    /// Embedding dimensionality used for zero-vector sentinels. Default: 1024.
    pub dimension: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            input_prefix: String::new(),
            output_prefix: String::new(),
            workers: 8,
            devices: 8,
            embed_batch_size: 512,
            max_batch_bytes: 10 * 1024 * 1024,
            chunk_size: 1024,
            overlap: 50,
            dimension: 1024,
        }
    }
}

impl EmbedConfig {
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`EmbedConfig`].
#[derive(Debug)]
pub struct EmbedConfigBuilder {
    config: EmbedConfig,
}

impl EmbedConfigBuilder {
    pub fn input_prefix(mut self, p: impl Into<String>) -> Self {
        self.config.input_prefix = p.into();
        self
    }

    pub fn output_prefix(mut self, p: impl Into<String>) -> Self {
        self.config.output_prefix = p.into();
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn devices(mut self, n: usize) -> Self {
        self.config.devices = n.max(1);
        self
    }

    pub fn embed_batch_size(mut self, n: usize) -> Self {
        self.config.embed_batch_size = n.max(1);
        self
    }

    pub fn max_batch_bytes(mut self, n: usize) -> Self {
        self.config.max_batch_bytes = n.max(1);
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n.max(1);
        self
    }

    pub fn overlap(mut self, n: usize) -> Self {
        self.config.overlap = n;
        self
    }

    pub fn dimension(mut self, n: usize) -> Self {
        self.config.dimension = n.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EmbedConfig, EnrichError> {
        let c = &self.config;
        if c.input_prefix.is_empty() || c.output_prefix.is_empty() {
            return Err(EnrichError::InvalidConfig(
                "input_prefix and output_prefix must be set".into(),
            ));
        }
        if c.input_prefix == c.output_prefix {
            return Err(EnrichError::InvalidConfig(
                "output_prefix must differ from input_prefix (outputs would clobber inputs)"
                    .into(),
            ));
        }
        if c.overlap >= c.chunk_size {
            return Err(EnrichError::InvalidConfig(format!(
                "overlap ({}) must be smaller than chunk_size ({}), or the window never advances",
                c.overlap, c.chunk_size
            )));
        }
        Ok(self.config)
    }
}
