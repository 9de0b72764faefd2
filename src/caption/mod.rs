//! The image-captioning pipeline.
//!
//! For every JSONL file under the input prefix whose output does not already
//! exist: parse each line into a record, fetch every referenced image, fan
//! the images out to the VLM with bounded concurrency, and reassemble the
//! captioned items into page-structured output records. Files whose output
//! key already exists are skipped, which is what makes interrupted runs
//! cheap to resume.
//!
//! Failure policy is two-tier: store-level failures skip the *file*;
//! per-image failures degrade to the empty-description sentinel, which is
//! emitted like any other processed item but excluded from the valid tally.
//! A fatal error is returned only when the input prefix itself cannot be
//! listed.

pub mod fanout;
pub mod reassemble;
pub mod vlm;

use crate::config::CaptionConfig;
use crate::error::EnrichError;
use crate::progress::PipelineProgress;
use crate::store::{derive_output_key, list_jsonl, ObjectStore};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{info, warn};

use fanout::{fan_out, CaptionTask};
use reassemble::reassemble;
use vlm::VlmClient;

/// Counters reported after a captioning run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CaptionStats {
    /// Files read, captioned, and (when non-empty) uploaded.
    pub files_processed: usize,
    /// Files skipped because their output key already existed.
    pub files_skipped: usize,
    /// Image items encountered, including unprocessable ones.
    pub images_total: usize,
    /// Images that produced a non-empty description.
    pub images_captioned: usize,
    pub duration_ms: u128,
}

/// Driver for the captioning pipeline.
pub struct CaptionPipeline {
    config: CaptionConfig,
    client: VlmClient,
}

impl CaptionPipeline {
    pub fn new(config: CaptionConfig) -> Result<Self, EnrichError> {
        let client = VlmClient::new(&config)?;
        Ok(Self { config, client })
    }

    /// Process every pending input file.
    ///
    /// Returns `Err` only for a failed input listing; per-file store errors
    /// are logged and skipped.
    pub async fn run(
        &self,
        store: &dyn ObjectStore,
        progress: &dyn PipelineProgress,
    ) -> Result<CaptionStats, EnrichError> {
        let started = Instant::now();
        let mut stats = CaptionStats::default();

        let keys = list_jsonl(store, &self.config.input_prefix).await?;
        let existing: HashSet<String> = store
            .list(&self.config.output_prefix)
            .await?
            .into_iter()
            .collect();

        info!(
            files = keys.len(),
            input = %self.config.input_prefix,
            "starting caption run"
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

            match self.process_file(store, progress, &key, &out_key, &mut stats).await {
                Ok(()) => stats.files_processed += 1,
                Err(e) => warn!("skipping file '{key}': {e}"),
            }
        }

        stats.duration_ms = started.elapsed().as_millis();
        info!(
            processed = stats.files_processed,
            skipped = stats.files_skipped,
            captioned = stats.images_captioned,
            "caption run complete"
        );
        Ok(stats)
    }

    async fn process_file(
        &self,
        store: &dyn ObjectStore,
        progress: &dyn PipelineProgress,
        key: &str,
        out_key: &str,
        stats: &mut CaptionStats,
    ) -> Result<(), EnrichError> {
        let bytes = store.get(key).await?;
        let text = String::from_utf8(bytes).map_err(|e| EnrichError::InvalidEncoding {
            key: key.to_string(),
            detail: e.to_string(),
        })?;

        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        progress.on_file_start(key, lines.len());

        let mut output_lines: Vec<String> = Vec::new();
        let mut lines_done = 0usize;

        for batch in lines.chunks(self.config.lines_per_batch) {
            let (mut shells, tasks) =
                fan_out(store, &self.config.image_prefix, batch).await;

            stats.images_total +=
                tasks.len() + shells.iter().map(|s| s.processed.len()).sum::<usize>();

            let captioned = self.caption_all(tasks).await;
            let mut produced = 0usize;
            for (record_idx, slot, image) in captioned {
                if image.desc.as_deref().is_some_and(|d| !d.is_empty()) {
                    stats.images_captioned += 1;
                    produced += 1;
                }
                shells[record_idx].processed.push((slot, image));
            }

            output_lines.extend(shells.iter().filter_map(reassemble));

            lines_done += batch.len();
            progress.on_batch_complete(key, lines_done, lines.len(), produced);
        }

        if output_lines.is_empty() {
            info!("file '{key}' produced no output records; nothing uploaded");
        } else {
            let mut body = output_lines.join("\n");
            body.push('\n');
            store
                .put(out_key, body.into_bytes(), "application/json")
                .await?;
        }
        progress.on_file_complete(key, output_lines.len());
        Ok(())
    }

    /// Run all tasks through the VLM, at most `concurrency` in flight.
    ///
    /// Completion order is arbitrary; each result carries its record index
    /// and fan-out slot so the reassembler can restore submission order.
    /// Errors become the empty-description sentinel here, so the returned
    /// items are always "processed".
    async fn caption_all(
        &self,
        tasks: Vec<CaptionTask>,
    ) -> Vec<(usize, usize, crate::record::ImageItem)> {
        stream::iter(tasks.into_iter().map(|task| {
            let client = self.client.clone();
            async move {
                let CaptionTask {
                    record_idx,
                    slot,
                    mut image,
                    bytes,
                    context,
                } = task;
                let hint = image.caption.clone();
                image.desc = Some(
                    client
                        .caption(&bytes, &context, hint.as_deref())
                        .await
                        .unwrap_or_else(|e| {
                            warn!("caption failed for '{}': {e}", image.id);
                            String::new()
                        }),
                );
                (record_idx, slot, image)
            }
        }))
        .buffer_unordered(self.config.concurrency)
        .collect()
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use crate::store::MemoryStore;

    fn config(endpoint: &str) -> CaptionConfig {
        CaptionConfig::builder()
            .input_prefix("in/")
            .output_prefix("out/")
            .image_prefix("imgs/")
            .endpoint(endpoint)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn existing_output_keys_are_skipped() {
        let store = MemoryStore::new();
        store.seed("in/a.jsonl", b"{}".to_vec(), "application/json");
        store.seed("out/a.jsonl", b"done".to_vec(), "application/json");

        let pipeline = CaptionPipeline::new(config("http://127.0.0.1:1/v1")).unwrap();
        let stats = pipeline.run(&store, &NoopProgress).await.unwrap();

        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.files_processed, 0);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn failed_fetch_still_emits_the_processed_item() {
        let store = MemoryStore::new();
        // One record whose only image has no fetchable bytes.
        let line = serde_json::json!({
            "meta": {},
            "json_content": {"page_0": [{"type": "image", "id": "image_0", "url": "gone.png"}]}
        })
        .to_string();
        store.seed("in/a.jsonl", line.into_bytes(), "application/json");

        let pipeline = CaptionPipeline::new(config("http://127.0.0.1:1/v1")).unwrap();
        let stats = pipeline.run(&store, &NoopProgress).await.unwrap();

        assert_eq!(stats.files_processed, 1);
        assert_eq!(stats.images_total, 1);
        assert_eq!(stats.images_captioned, 0, "empty desc is processed, not valid");

        let out = store.object("out/a.jsonl").expect("output must be written");
        let v: serde_json::Value =
            serde_json::from_str(String::from_utf8(out).unwrap().lines().next().unwrap())
                .unwrap();
        assert_eq!(v["json_content"]["page_0"][0]["desc"], "");
    }

    #[tokio::test]
    async fn record_with_no_routable_items_uploads_nothing() {
        let store = MemoryStore::new();
        // The only image item has an id with no page suffix, so nothing can
        // be placed on an output page.
        let line = serde_json::json!({
            "meta": {},
            "json_content": {"page_0": [{"type": "image", "id": "figure", "url": "gone.png"}]}
        })
        .to_string();
        store.seed("in/a.jsonl", line.into_bytes(), "application/json");

        let pipeline = CaptionPipeline::new(config("http://127.0.0.1:1/v1")).unwrap();
        let stats = pipeline.run(&store, &NoopProgress).await.unwrap();

        assert_eq!(stats.files_processed, 1);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn non_utf8_input_is_skipped_not_fatal() {
        let store = MemoryStore::new();
        store.seed("in/a.jsonl", vec![0xFF, 0xFE, 0x00], "application/json");

        let pipeline = CaptionPipeline::new(config("http://127.0.0.1:1/v1")).unwrap();
        let stats = pipeline.run(&store, &NoopProgress).await.unwrap();

        assert_eq!(stats.files_processed, 0);
        assert_eq!(stats.files_skipped, 0);
    }
}
