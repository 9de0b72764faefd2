//! The text-embedding pipeline.
//!
//! For every pending JSONL file under the input prefix: split the file's
//! lines into byte-capped batches, submit every batch to the worker pool,
//! harvest completed batches as they finish, and upload the collected
//! output lines. Batches of one file may complete on any worker in any
//! order; output line order follows completion order, which is fine because
//! each line is a self-contained record.
//!
//! The pool is constructed once per run. Model loading is the expensive
//! part of a worker's life, so it happens exactly `workers` times no matter
//! how many files the run covers.

pub mod fanout;
pub mod model;
pub mod pool;
pub mod reassemble;

use crate::config::EmbedConfig;
use crate::error::EnrichError;
use crate::progress::PipelineProgress;
use crate::store::{derive_output_key, list_jsonl, ObjectStore};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{info, warn};

use model::ModelFactory;
use pool::{Job, WorkerPool};

/// Counters reported after an embedding run.
///
/// Folded by the orchestrator from per-batch outputs; workers never share a
/// counter.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EmbedStats {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub batches: usize,
    /// Vectors produced across the run, zero-vector sentinels included.
    pub embeddings_total: usize,
    pub duration_ms: u128,
}

/// Driver for the embedding pipeline.
pub struct EmbedPipeline {
    config: EmbedConfig,
}

impl EmbedPipeline {
    pub fn new(config: EmbedConfig) -> Self {
        Self { config }
    }

    /// Process every pending input file with a pool built from `factory`.
    ///
    /// Fatal errors: a failed input listing, or any worker failing to
    /// construct its model. Per-file store errors are logged and skipped.
    pub async fn run(
        &self,
        store: &dyn ObjectStore,
        factory: ModelFactory,
        progress: &dyn PipelineProgress,
    ) -> Result<EmbedStats, EnrichError> {
        let started = Instant::now();
        let mut stats = EmbedStats::default();

        let pool = WorkerPool::new(&self.config, factory)?;

        let keys = list_jsonl(store, &self.config.input_prefix).await?;
        let existing: HashSet<String> = store
            .list(&self.config.output_prefix)
            .await?
            .into_iter()
            .collect();

        info!(
            files = keys.len(),
            workers = self.config.workers,
            "starting embedding run"
        );
        progress.on_run_start(keys.len());

        for key in keys {
            let out_key =
                derive_output_key(&key, &self.config.input_prefix, &self.config.output_prefix);
            if existing.contains(&out_key) {
                progress.on_file_skipped(&key);
                stats.files_skipped += 1;
                continue;
            }

            match self
                .process_file(store, &pool, progress, &key, &out_key, &mut stats)
                .await
            {
                Ok(()) => stats.files_processed += 1,
                Err(e) => warn!("skipping file '{key}': {e}"),
            }
        }

        pool.shutdown();
        stats.duration_ms = started.elapsed().as_millis();
        info!(
            processed = stats.files_processed,
            skipped = stats.files_skipped,
            embeddings = stats.embeddings_total,
            "embedding run complete"
        );
        Ok(stats)
    }

    async fn process_file(
        &self,
        store: &dyn ObjectStore,
        pool: &WorkerPool,
        progress: &dyn PipelineProgress,
        key: &str,
        out_key: &str,
        stats: &mut EmbedStats,
    ) -> Result<(), EnrichError> {
        let bytes = store.get(key).await?;
        let text = String::from_utf8(bytes).map_err(|e| EnrichError::InvalidEncoding {
            key: key.to_string(),
            detail: e.to_string(),
        })?;

        let lines: Vec<String> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
        let lines_total = lines.len();
        progress.on_file_start(key, lines_total);

        let batches = byte_batches(lines, self.config.max_batch_bytes);
        let batch_sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        let mut outstanding = batches.len();

        for (batch_index, lines) in batches.into_iter().enumerate() {
            pool.submit(Job { batch_index, lines })?;
        }

        let mut output_lines: Vec<String> = Vec::new();
        let mut lines_done = 0usize;
        while outstanding > 0 {
            let Some(output) = pool.recv().await else {
                return Err(EnrichError::PoolDisconnected { outstanding });
            };
            outstanding -= 1;
            stats.batches += 1;
            stats.embeddings_total += output.embeddings;
            lines_done += batch_sizes[output.batch_index];
            progress.on_batch_complete(key, lines_done, lines_total, output.embeddings);
            output_lines.extend(output.lines);
        }

        let mut body = output_lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        store
            .put(out_key, body.into_bytes(), "application/json")
            .await?;
        progress.on_file_complete(key, output_lines.len());
        Ok(())
    }
}

/// Group lines into batches capped by cumulative UTF-8 byte size.
///
/// A line never splits: one line larger than the cap forms a batch of its
/// own. Capping on bytes rather than line count bounds worker memory when
/// line sizes vary by orders of magnitude.
pub fn byte_batches(lines: Vec<String>, max_bytes: usize) -> Vec<Vec<String>> {
    let mut batches = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_bytes = 0usize;

    for line in lines {
        if !current.is_empty() && current_bytes + line.len() > max_bytes {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += line.len();
        current.push(line);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
