//! Progress-callback trait for per-file pipeline events.
//!
//! Inject an `Arc<dyn PipelineProgress>` into a driver to receive events as
//! files are listed, skipped, batched, and uploaded. Callbacks are the
//! least-invasive integration point: the CLI forwards them to a terminal
//! progress bar, a host application can forward them anywhere else, and the
//! library stays ignorant of both.
//!
//! All methods default to no-ops so implementors override only what they
//! care about. Implementations must be `Send + Sync`; batch completions for
//! one file arrive from a single driver task, but drivers make no promise
//! about *which* thread that is.

/// Called by a pipeline driver as it works through files.
pub trait PipelineProgress: Send + Sync {
    /// Called once after listing, before any file is processed.
    fn on_run_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a file is skipped because its output already exists.
    fn on_file_skipped(&self, key: &str) {
        let _ = key;
    }

    /// Called before a file's first batch is processed.
    fn on_file_start(&self, key: &str, lines: usize) {
        let _ = (key, lines);
    }

    /// Called as each batch of a file completes.
    ///
    /// `produced` is pipeline-specific: captioned images for the captioning
    /// pipeline, embedded chunks for the embedding pipeline.
    fn on_batch_complete(&self, key: &str, lines_done: usize, lines_total: usize, produced: usize) {
        let _ = (key, lines_done, lines_total, produced);
    }

    /// Called after a file's output has been uploaded (or found empty).
    fn on_file_complete(&self, key: &str, output_lines: usize) {
        let _ = (key, output_lines);
    }
}

/// A no-op progress sink.
pub struct NoopProgress;

impl PipelineProgress for NoopProgress {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn noop_is_send_sync_and_object_safe() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopProgress>();

        let p: Arc<dyn PipelineProgress> = Arc::new(NoopProgress);
        p.on_run_start(3);
        p.on_file_skipped("k");
        p.on_batch_complete("k", 1, 2, 0);
    }
}
