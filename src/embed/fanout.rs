//! Fan-out: flatten a batch of JSONL lines into one chunk sequence.
//!
//! The embedding model is fastest when fed large flat batches, so chunks
//! from every page of every record in the batch are concatenated into a
//! single `Vec<String>`. What makes this reversible is the per-page chunk
//! *count* recorded alongside: the result vector comes back in enqueue
//! order, and counts are the only reliable way to re-slice it — inferring
//! boundaries from the texts themselves would break on duplicate or empty
//! chunks.
//!
//! A page whose merged text is missing or empty still contributes exactly
//! one empty chunk. That keeps offsets aligned; the empty entry is filtered
//! at reassembly, after slicing.

use crate::chunk::split_with_overlap;
use crate::record::Record;
use serde_json::{Map, Value};
use tracing::warn;

/// Where one record's chunks live inside the flat batch.
pub struct RecordPlan {
    pub meta: Map<String, Value>,
    /// `(page number, chunk count)` in ascending page order.
    pub pages: Vec<(u32, usize)>,
}

/// A batch of lines flattened for embedding.
pub struct BatchPlan {
    pub plans: Vec<RecordPlan>,
    pub texts: Vec<String>,
}

impl BatchPlan {
    pub fn chunk_count(&self) -> usize {
        self.texts.len()
    }
}

/// Decompose a batch of lines into a [`BatchPlan`].
///
/// Unparseable lines are logged and skipped — they produce no plan and no
/// chunks, so offsets stay consistent. Newlines inside merged text are
/// replaced with commas before chunking; the chunker splits on character
/// positions and stray newlines would otherwise leak into output entries.
pub fn fan_out(lines: &[String], chunk_size: usize, overlap: usize) -> BatchPlan {
    let mut plans = Vec::new();
    let mut texts = Vec::new();

    for line in lines {
        let record = match Record::from_json_line(line) {
            Ok(r) => r,
            Err(e) => {
                warn!("skipping unparseable record: {e}");
                continue;
            }
        };

        let mut pages = Vec::with_capacity(record.pages.len());
        for &page in record.pages.keys() {
            let merged = record
                .merged_text(page)
                .unwrap_or("")
                .replace('\n', ",");
            let chunks = split_with_overlap(&merged, chunk_size, overlap);
            pages.push((page, chunks.len()));
            texts.extend(chunks);
        }

        plans.push(RecordPlan {
            meta: record.meta,
            pages,
        });
    }

    BatchPlan { plans, texts }
}
