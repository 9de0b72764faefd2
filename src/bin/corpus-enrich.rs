//! CLI binary for corpus-enrich.
//!
//! A thin shim over the library crate that maps CLI flags to the pipeline
//! configs and renders run progress.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corpus_enrich::{
    CaptionConfig, CaptionPipeline, EmbedConfig, EmbedPipeline, FsStore, HttpEmbedder,
    PipelineProgress,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress rendering using indicatif ───────────────────────────────

/// Terminal progress: one bar across the run's files, per-file log lines.
/// Works correctly when batches of a file complete out of order.
struct CliProgress {
    bar: ProgressBar,
    skipped: AtomicUsize,
}

impl CliProgress {
    fn new(hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} files  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.set_prefix("Enriching");
        Self {
            bar,
            skipped: AtomicUsize::new(0),
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        let skipped = self.skipped.load(Ordering::SeqCst);
        if skipped > 0 {
            eprintln!("{} {skipped} files already done, skipped", dim("·"));
        }
    }
}

impl PipelineProgress for CliProgress {
    fn on_run_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_files} files…"))
        ));
    }

    fn on_file_skipped(&self, _key: &str) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.bar.inc(1);
    }

    fn on_file_start(&self, key: &str, lines: usize) {
        self.bar.set_message(format!("{key} ({lines} lines)"));
    }

    fn on_batch_complete(&self, key: &str, lines_done: usize, lines_total: usize, _produced: usize) {
        self.bar
            .set_message(format!("{key} ({lines_done}/{lines_total} lines)"));
    }

    fn on_file_complete(&self, key: &str, output_lines: usize) {
        self.bar.println(format!(
            "  {} {key}  {}",
            green("✓"),
            dim(&format!("{output_lines} output lines"))
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Caption every image referenced by JSONL files under a local store root
  corpus-enrich --store-root /data caption \
      --input-prefix corpus/jsonl/ --output-prefix corpus/image_desc/ \
      --image-prefix corpus/imgs/ --endpoint http://localhost:8007/v1

  # Embed page text with 8 workers over 8 devices
  corpus-enrich --store-root /data embed \
      --input-prefix corpus/image_desc/ --output-prefix corpus/json_emb/ \
      --endpoint http://localhost:8006/v1 --model bge-m3

  # Resume an interrupted run: already-written outputs are skipped
  corpus-enrich --store-root /data caption ...   # same flags, second time

ENVIRONMENT VARIABLES:
  CORPUS_ENRICH_API_KEY     Bearer token for the inference endpoints
  CORPUS_ENRICH_STORE_ROOT  Store root directory (same as --store-root)
  RUST_LOG                  Tracing filter (overrides -v/-q)
"#;

/// Enrich page-structured JSONL corpora: caption images, embed text.
#[derive(Parser, Debug)]
#[command(
    name = "corpus-enrich",
    version,
    about = "Caption images and embed text in page-structured JSONL corpora",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Root directory of the local object store.
    #[arg(long, env = "CORPUS_ENRICH_STORE_ROOT")]
    store_root: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Caption every image referenced by input records via a VLM.
    Caption {
        /// Store prefix of the input JSONL files.
        #[arg(long)]
        input_prefix: String,

        /// Store prefix for output JSONL files.
        #[arg(long)]
        output_prefix: String,

        /// Store prefix prepended to each image's url.
        #[arg(long)]
        image_prefix: String,

        /// OpenAI-compatible chat endpoint (without /chat/completions).
        #[arg(long, default_value = "http://localhost:8007/v1")]
        endpoint: String,

        /// Bearer token for the endpoint.
        #[arg(long, env = "CORPUS_ENRICH_API_KEY", default_value = "EMPTY")]
        api_key: String,

        /// VLM model identifier.
        #[arg(long, default_value = "Qwen2.5-VL-72B-Instruct")]
        model: String,

        /// Maximum in-flight VLM calls.
        #[arg(short, long, default_value_t = 20)]
        concurrency: usize,

        /// Max tokens per generated caption.
        #[arg(long, default_value_t = 1024)]
        max_tokens: usize,

        /// Sampling temperature (0.0–2.0).
        #[arg(long, default_value_t = 0.1)]
        temperature: f32,

        /// Per-call HTTP timeout in seconds.
        #[arg(long, default_value_t = 60)]
        api_timeout: u64,
    },

    /// Chunk and embed every page's merged text.
    Embed {
        /// Store prefix of the input JSONL files.
        #[arg(long)]
        input_prefix: String,

        /// Store prefix for output JSONL files.
        #[arg(long)]
        output_prefix: String,

        /// OpenAI-compatible embeddings endpoint (without /embeddings).
        #[arg(long, default_value = "http://localhost:8006/v1")]
        endpoint: String,

        /// Bearer token for the endpoint.
        #[arg(long, env = "CORPUS_ENRICH_API_KEY", default_value = "EMPTY")]
        api_key: String,

        /// Embedding model identifier.
        #[arg(long, default_value = "bge-m3")]
        model: String,

        /// Worker threads, one model instance each.
        #[arg(short, long, default_value_t = 8)]
        workers: usize,

        /// Compute devices; worker i binds to device i % devices.
        #[arg(long, default_value_t = 8)]
        devices: usize,

        /// Texts per model call.
        #[arg(long, default_value_t = 512)]
        embed_batch_size: usize,

        /// Byte cap per worker batch.
        #[arg(long, default_value_t = 10 * 1024 * 1024)]
        max_batch_bytes: usize,

        /// Chunk window size in characters.
        #[arg(long, default_value_t = 1024)]
        chunk_size: usize,

        /// Characters shared between consecutive chunks.
        #[arg(long, default_value_t = 50)]
        overlap: usize,

        /// Embedding dimensionality (for zero-vector sentinels).
        #[arg(long, default_value_t = 1024)]
        dimension: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Suppress INFO-level library logs while the progress bar is active;
    // the bar carries the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let store = FsStore::new(&cli.store_root);
    let progress = CliProgress::new(!show_progress);

    match cli.command {
        Command::Caption {
            input_prefix,
            output_prefix,
            image_prefix,
            endpoint,
            api_key,
            model,
            concurrency,
            max_tokens,
            temperature,
            api_timeout,
        } => {
            let config = CaptionConfig::builder()
                .input_prefix(input_prefix)
                .output_prefix(output_prefix)
                .image_prefix(image_prefix)
                .endpoint(endpoint)
                .api_key(api_key)
                .model(model)
                .concurrency(concurrency)
                .max_tokens(max_tokens)
                .temperature(temperature)
                .api_timeout_secs(api_timeout)
                .build()
                .context("invalid caption configuration")?;

            let pipeline = CaptionPipeline::new(config).context("failed to build VLM client")?;
            let stats = pipeline
                .run(&store, &progress)
                .await
                .context("caption run failed")?;
            progress.finish();

            eprintln!(
                "{} {} images captioned across {} files in {:.1}s",
                green("✔"),
                bold(&stats.images_captioned.to_string()),
                stats.files_processed,
                stats.duration_ms as f64 / 1000.0,
            );
        }

        Command::Embed {
            input_prefix,
            output_prefix,
            endpoint,
            api_key,
            model,
            workers,
            devices,
            embed_batch_size,
            max_batch_bytes,
            chunk_size,
            overlap,
            dimension,
        } => {
            let config = EmbedConfig::builder()
                .input_prefix(input_prefix)
                .output_prefix(output_prefix)
                .workers(workers)
                .devices(devices)
                .embed_batch_size(embed_batch_size)
                .max_batch_bytes(max_batch_bytes)
                .chunk_size(chunk_size)
                .overlap(overlap)
                .dimension(dimension)
                .build()
                .context("invalid embed configuration")?;

            let factory = HttpEmbedder::factory(endpoint, api_key, model, dimension);
            let stats = EmbedPipeline::new(config)
                .run(&store, factory, &progress)
                .await
                .context("embedding run failed")?;
            progress.finish();

            eprintln!(
                "{} {} embeddings across {} files ({} batches) in {:.1}s",
                green("✔"),
                bold(&stats.embeddings_total.to_string()),
                stats.files_processed,
                stats.batches,
                stats.duration_ms as f64 / 1000.0,
            );
        }
    }

    Ok(())
}
