//! Reassembly: re-slice the flat embedding vector back into per-record lines.
//!
//! The result vector is consumed strictly in enqueue order; each record's
//! plan says how many vectors each of its pages claimed, so slicing is pure
//! offset arithmetic. Entries whose text is empty are dropped *after*
//! slicing — they existed only to keep offsets aligned.

use crate::embed::fanout::BatchPlan;
use crate::embed::model::zero_vector;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::warn;

/// Build one output JSONL line per planned record.
///
/// `embeddings` must hold one vector per chunk in `plan.texts`, in the same
/// order. A shortfall is tolerated with zero-vector sentinels so one broken
/// worker reply cannot shift every later record's slice.
pub fn reassemble(plan: &BatchPlan, embeddings: &[Vec<f32>], dimension: usize) -> Vec<String> {
    if embeddings.len() != plan.texts.len() {
        warn!(
            "embedding count {} does not match chunk count {}; padding with zero vectors",
            embeddings.len(),
            plan.texts.len()
        );
    }

    let mut lines = Vec::with_capacity(plan.plans.len());
    let mut offset = 0usize;

    for record in &plan.plans {
        let mut embedding_list = Vec::new();
        for &(page, count) in &record.pages {
            for i in offset..offset + count {
                let text = plan.texts.get(i).map(String::as_str).unwrap_or("");
                if text.is_empty() {
                    continue;
                }
                let vector = embeddings
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| zero_vector(dimension));
                embedding_list.push(json!({
                    "type": "text",
                    "page": page,
                    "text": text,
                    "embedding": vector,
                }));
            }
            offset += count;
        }

        lines.push(output_line(&record.meta, embedding_list));
    }

    lines
}

/// Flatten the document metadata into the fixed output envelope.
fn output_line(meta: &Map<String, Value>, embedding_list: Vec<Value>) -> String {
    let field = |key: &str| meta.get(key).cloned().unwrap_or_else(|| json!(""));

    let mut out = Map::new();
    out.insert("original_file".into(), field("original_file"));
    out.insert("generated_file".into(), field("generated_file"));
    out.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
    out.insert("total_pages".into(), field("total_pages"));
    out.insert("file_type".into(), field("file_type"));
    out.insert("url".into(), field("url"));
    out.insert("description".into(), field("description"));
    out.insert("embedding_list".into(), Value::Array(embedding_list));
    Value::Object(out).to_string()
}
