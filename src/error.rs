//! Error types for the corpus-enrich library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`EnrichError`] — **Fatal to a unit of work**: the run cannot proceed at
//!   all (invalid config, worker-pool init failure) or a whole file must be
//!   skipped (store read/write failure). Returned as `Err(EnrichError)` from
//!   the driver entry points.
//!
//! * [`ItemError`] — **Non-fatal**: one work item failed (bad image bytes, a
//!   VLM call error, an embedding failure). These are never propagated past
//!   the item: the caller converts them to the sentinel result — an empty
//!   description for captions, an all-zero vector for embeddings — and the
//!   reassembler carries on.
//!
//! The separation keeps the degrade-to-sentinel policy explicit in the type
//! system instead of relying on catch-all handling at call sites.

use thiserror::Error;

/// All fatal errors returned by the corpus-enrich library.
///
/// Per-item failures use [`ItemError`] and are converted to sentinel results
/// rather than propagated here.
#[derive(Debug, Error)]
pub enum EnrichError {
    // ── Object store errors ───────────────────────────────────────────────
    /// Listing keys under a prefix failed.
    #[error("Failed to list objects under '{prefix}': {detail}")]
    ListFailed { prefix: String, detail: String },

    /// Reading an object failed. The driver skips the file and continues.
    #[error("Failed to read object '{key}': {detail}")]
    GetFailed { key: String, detail: String },

    /// Writing an output object failed.
    #[error("Failed to write object '{key}': {detail}")]
    PutFailed { key: String, detail: String },

    /// An input object was not valid UTF-8.
    #[error("Object '{key}' is not valid UTF-8: {detail}")]
    InvalidEncoding { key: String, detail: String },

    // ── Worker pool errors ────────────────────────────────────────────────
    /// An embedding worker failed to construct its model instance.
    ///
    /// A worker without a model cannot do any useful work, so this aborts
    /// pool construction rather than being silently swallowed.
    #[error("Embedding worker {worker} failed to initialise its model: {detail}")]
    WorkerInitFailed { worker: usize, detail: String },

    /// The worker pool shut down while batches were still outstanding.
    #[error("Worker pool disconnected with {outstanding} batches outstanding")]
    PoolDisconnected { outstanding: usize },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not construct an HTTP client.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// A non-fatal error for a single work item.
///
/// Inspected by the fan-out/reassembly layers and converted to the sentinel
/// value there; never aborts a batch.
#[derive(Debug, Clone, Error)]
pub enum ItemError {
    /// Image bytes failed the format sniff — no network call is made.
    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    /// The captioning endpoint returned an error or an empty completion.
    #[error("VLM call failed: {0}")]
    VlmFailed(String),

    /// The embedding model rejected a batch or a single text.
    #[error("Embedding failed: {0}")]
    EmbedFailed(String),
}
