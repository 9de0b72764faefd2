//! The fixed worker pool driving per-thread embedding models.
//!
//! Workers are plain OS threads, not async tasks: an embedding backend is
//! CPU/accelerator-bound and blocking, and each worker must own a model
//! instance for its whole lifetime. Worker `i` binds to device `i % devices`
//! at spawn and never rebinds.
//!
//! Construction is all-or-nothing. Each thread builds its model through the
//! factory and reports the outcome on an init channel; if any worker fails,
//! `WorkerPool::new` returns the first failure and the remaining threads
//! wind down when the job sender drops. A pool with a dead worker would
//! silently halve throughput at best, so it never gets handed out.
//!
//! Job and result channels are MPMC: every worker pulls from the shared job
//! queue, so a slow batch on one worker never blocks the others, and results
//! arrive in completion order.

use crate::config::EmbedConfig;
use crate::embed::fanout::fan_out;
use crate::embed::model::{zero_vector, EmbeddingModel, ModelFactory};
use crate::embed::reassemble::reassemble;
use crate::error::EnrichError;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// One byte-capped batch of JSONL lines, tagged for result routing.
pub struct Job {
    pub batch_index: usize,
    pub lines: Vec<String>,
}

/// A completed batch: output lines plus accounting.
///
/// Counters live here, not in shared state — the orchestrator folds them
/// after harvest, so no two threads ever mutate the same counter.
pub struct BatchOutput {
    pub batch_index: usize,
    pub lines: Vec<String>,
    /// Vectors produced, zero-vector sentinels included.
    pub embeddings: usize,
    pub worker: usize,
}

/// Knobs a worker needs per batch, copied into each thread.
#[derive(Clone, Copy)]
struct WorkerParams {
    chunk_size: usize,
    overlap: usize,
    embed_batch_size: usize,
}

/// A fixed pool of embedding workers.
#[derive(Debug)]
pub struct WorkerPool {
    job_tx: Option<flume::Sender<Job>>,
    result_rx: flume::Receiver<BatchOutput>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.workers` threads, each constructing its model via
    /// `factory`.
    ///
    /// Returns the first [`EnrichError::WorkerInitFailed`] if any model
    /// fails to construct.
    pub fn new(config: &EmbedConfig, factory: ModelFactory) -> Result<Self, EnrichError> {
        let workers = config.workers.max(1);
        let devices = config.devices.max(1);
        let worker_params = WorkerParams {
            chunk_size: config.chunk_size,
            overlap: config.overlap,
            embed_batch_size: config.embed_batch_size,
        };

        let (job_tx, job_rx) = flume::unbounded::<Job>();
        let (result_tx, result_rx) = flume::unbounded::<BatchOutput>();
        let (init_tx, init_rx) = flume::bounded::<Result<usize, EnrichError>>(workers);

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let device = worker % devices;
            let factory = factory.clone();
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let init_tx = init_tx.clone();

            handles.push(std::thread::spawn(move || {
                let model = match factory(device) {
                    Ok(m) => {
                        let _ = init_tx.send(Ok(worker));
                        m
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(EnrichError::WorkerInitFailed {
                            worker,
                            detail: e.to_string(),
                        }));
                        return;
                    }
                };
                drop(init_tx);
                info!("embedding worker {worker} ready on device {device}");

                for job in job_rx.iter() {
                    let output = run_batch(worker, job, model.as_ref(), worker_params);
                    if result_tx.send(output).is_err() {
                        break;
                    }
                }
                debug!("embedding worker {worker} shutting down");
            }));
        }
        drop(init_tx);

        for _ in 0..workers {
            match init_rx.recv() {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    drop(job_tx);
                    return Err(e);
                }
                Err(_) => {
                    return Err(EnrichError::PoolDisconnected { outstanding: 0 });
                }
            }
        }

        Ok(Self {
            job_tx: Some(job_tx),
            result_rx,
            handles,
        })
    }

    /// Queue one batch. Fails only if every worker has exited.
    pub fn submit(&self, job: Job) -> Result<(), EnrichError> {
        match &self.job_tx {
            Some(tx) => tx
                .send(job)
                .map_err(|_| EnrichError::PoolDisconnected { outstanding: 1 }),
            None => Err(EnrichError::PoolDisconnected { outstanding: 1 }),
        }
    }

    /// Await the next completed batch, in completion order.
    ///
    /// `None` means every worker has exited and no results remain.
    pub async fn recv(&self) -> Option<BatchOutput> {
        self.result_rx.recv_async().await.ok()
    }

    /// Close the job queue and join every worker.
    pub fn shutdown(mut self) {
        self.job_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Fan out, embed, reassemble: the whole life of one batch, on one thread.
fn run_batch(worker: usize, job: Job, model: &dyn EmbeddingModel, params: WorkerParams) -> BatchOutput {
    let plan = fan_out(&job.lines, params.chunk_size, params.overlap);
    let embeddings = embed_all(model, &plan.texts, params.embed_batch_size);
    let produced = embeddings.len();
    let lines = reassemble(&plan, &embeddings, model.dimension());
    BatchOutput {
        batch_index: job.batch_index,
        lines,
        embeddings: produced,
        worker,
    }
}

/// Embed every chunk, degrading per the two-step fallback.
///
/// Chunks go to the model in groups of `embed_batch_size`. A failed group is
/// retried one text at a time; a text that still fails becomes a zero
/// vector. The returned vector always has exactly one entry per input.
fn embed_all(model: &dyn EmbeddingModel, texts: &[String], embed_batch_size: usize) -> Vec<Vec<f32>> {
    let mut out = Vec::with_capacity(texts.len());
    for group in texts.chunks(embed_batch_size.max(1)) {
        match model.embed(group) {
            Ok(vectors) if vectors.len() == group.len() => out.extend(vectors),
            Ok(vectors) => {
                warn!(
                    "model returned {} vectors for {} texts; degrading to per-text calls",
                    vectors.len(),
                    group.len()
                );
                out.extend(embed_each(model, group));
            }
            Err(e) => {
                warn!("batch embed failed ({e}); degrading to per-text calls");
                out.extend(embed_each(model, group));
            }
        }
    }
    out
}

fn embed_each(model: &dyn EmbeddingModel, texts: &[String]) -> Vec<Vec<f32>> {
    texts
        .iter()
        .map(|text| {
            match model.embed(std::slice::from_ref(text)) {
                Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
                Ok(_) => zero_vector(model.dimension()),
                Err(e) => {
                    warn!("embed failed for one chunk ({e}); recording zero vector");
                    zero_vector(model.dimension())
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ItemError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Embeds each text as `[len]`; fails any text containing "boom".
    struct LenModel;

    impl EmbeddingModel for LenModel {
        fn dimension(&self) -> usize {
            1
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ItemError> {
            if texts.iter().any(|t| t.contains("boom")) {
                return Err(ItemError::EmbedFailed("boom".into()));
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    fn len_factory() -> ModelFactory {
        Arc::new(|_| Ok(Box::new(LenModel) as Box<dyn EmbeddingModel>))
    }

    fn pool_config(workers: usize, devices: usize) -> EmbedConfig {
        EmbedConfig::builder()
            .input_prefix("in/")
            .output_prefix("out/")
            .workers(workers)
            .devices(devices)
            .build()
            .unwrap()
    }

    fn job(index: usize, texts: &[&str]) -> Job {
        let lines = texts
            .iter()
            .map(|t| {
                serde_json::json!({
                    "meta": {},
                    "json_content": {"page_0": [{"type": "merge_text", "text": t}]}
                })
                .to_string()
            })
            .collect();
        Job {
            batch_index: index,
            lines,
        }
    }

    #[tokio::test]
    async fn pool_processes_jobs_and_reports_counts() {
        let pool = WorkerPool::new(&pool_config(2, 2), len_factory()).unwrap();
        pool.submit(job(0, &["abc"])).unwrap();
        pool.submit(job(1, &["fourty", "x"])).unwrap();

        let mut outputs = Vec::new();
        for _ in 0..2 {
            outputs.push(pool.recv().await.unwrap());
        }
        pool.shutdown();

        outputs.sort_by_key(|o| o.batch_index);
        assert_eq!(outputs[0].embeddings, 1);
        assert_eq!(outputs[1].embeddings, 2);
        assert_eq!(outputs[1].lines.len(), 2);
    }

    #[tokio::test]
    async fn init_failure_aborts_construction() {
        let factory: ModelFactory = Arc::new(|device| {
            if device == 1 {
                Err(EnrichError::HttpClient("no device 1".into()))
            } else {
                Ok(Box::new(LenModel) as Box<dyn EmbeddingModel>)
            }
        });

        let err = WorkerPool::new(&pool_config(4, 2), factory).unwrap_err();
        assert!(matches!(err, EnrichError::WorkerInitFailed { .. }));
    }

    #[test]
    fn devices_wrap_around_workers() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let factory: ModelFactory = Arc::new(move |device| {
            seen2.fetch_add(device, Ordering::SeqCst);
            Ok(Box::new(LenModel) as Box<dyn EmbeddingModel>)
        });

        let pool = WorkerPool::new(&pool_config(4, 2), factory).unwrap();
        pool.shutdown();
        // devices 0, 1, 0, 1
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_chunk_degrades_to_zero_vector() {
        let texts = vec!["ok".to_string(), "boom".to_string()];
        let out = embed_all(&LenModel, &texts, 512);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], vec![2.0]);
        assert_eq!(out[1], vec![0.0]);
    }

    #[test]
    fn batch_failure_salvages_healthy_chunks() {
        // one poisoned text fails the whole group, per-text retry saves the rest
        let texts = vec!["aa".to_string(), "boom".to_string(), "cccc".to_string()];
        let out = embed_all(&LenModel, &texts, 512);

        assert_eq!(out, vec![vec![2.0], vec![0.0], vec![4.0]]);
    }
}
