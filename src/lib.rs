//! # corpus-enrich
//!
//! Offline enrichment pipelines for page-structured JSONL corpora: caption
//! every referenced image with a Vision Language Model, and embed every
//! page's text with a chunking worker pool.
//!
//! ## Why this crate?
//!
//! Document corpora extracted from PDFs arrive as JSONL files where each
//! line maps pages to ordered items — images and merged page text. Making
//! such a corpus searchable needs two passes over object storage: one that
//! turns images into text descriptions, and one that turns text into
//! vectors. Both passes share the same skeleton — decompose records, fan
//! the pieces out to an inference backend, and reassemble results in page
//! order no matter what order inference finished in — so they live together
//! here.
//!
//! ## Pipeline Overview
//!
//! ```text
//! JSONL files (object store)
//!  │
//!  ├─ 1. List     pending files under the input prefix (skip done outputs)
//!  ├─ 2. Decompose  line → meta + numerically ordered pages
//!  │
//!  ├─ Caption path                       ├─ Embedding path
//!  │   3. Fetch image bytes              │   3. Chunk merged text (1024/50)
//!  │   4. VLM, ≤20 in flight             │   4. Worker pool, 1 model/thread
//!  │   5. Regroup by image id page       │   5. Re-slice by chunk counts
//!  │
//!  └─ 6. Upload   page-ordered output JSONL under the output prefix
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use corpus_enrich::{CaptionConfig, CaptionPipeline, FsStore, NoopProgress};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CaptionConfig::builder()
//!         .input_prefix("corpus/jsonl/")
//!         .output_prefix("corpus/image_desc/")
//!         .image_prefix("corpus/imgs/")
//!         .endpoint("http://localhost:8007/v1")
//!         .build()?;
//!
//!     let store = FsStore::new("/data");
//!     let stats = CaptionPipeline::new(config)?.run(&store, &NoopProgress).await?;
//!     eprintln!("captioned {} images in {} files", stats.images_captioned, stats.files_processed);
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Model
//!
//! Per-item failures never fail a run: a broken image or VLM error becomes
//! an empty description, a failed embedding becomes an all-zero vector, and
//! both sentinels travel through reassembly into the output so consumers
//! can tell a failed item from an absent one. Store failures skip the file;
//! only an unlistable input prefix or a worker that cannot build its model
//! aborts a run.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `corpus-enrich` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! corpus-enrich = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod caption;
pub mod chunk;
pub mod config;
pub mod embed;
pub mod error;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use caption::{vlm::VlmClient, CaptionPipeline, CaptionStats};
pub use config::{CaptionConfig, CaptionConfigBuilder, EmbedConfig, EmbedConfigBuilder};
pub use embed::{
    model::{EmbeddingModel, HttpEmbedder, ModelFactory},
    EmbedPipeline, EmbedStats,
};
pub use error::{EnrichError, ItemError};
pub use progress::{NoopProgress, PipelineProgress};
pub use record::{ImageItem, MergeTextItem, PageItem, Record, RecordError};
pub use store::{FsStore, MemoryStore, ObjectStore};
