//! Reassembly: regroup captioned items into per-page output records.
//!
//! Results arrive in completion order; the reassembler restores page
//! structure from each item's own id (`image_<n>` names page `n`) and
//! submission order from each item's fan-out slot, so the output is
//! identical no matter how the concurrent stage interleaved.
//!
//! Every processed item is emitted, the empty-description sentinel
//! included — downstream consumers can tell "captioning failed" from
//! "never processed". The valid-output tally is the driver's business, not
//! the reassembler's. A record produces no output line only when it has no
//! routable processed items at all.

use crate::caption::fanout::RecordShell;
use crate::record::page_key;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Build the output JSONL line for one record, or `None` when the record
/// has no processed image item that can be routed to a page.
pub fn reassemble(shell: &RecordShell) -> Option<String> {
    let mut pages: BTreeMap<u32, Vec<Value>> = BTreeMap::new();

    for image in shell.items_in_order() {
        let Some(page) = image.page_number() else {
            warn!("dropping processed image '{}': id names no page", image.id);
            continue;
        };
        match serde_json::to_value(image) {
            Ok(v) => pages.entry(page).or_default().push(v),
            Err(e) => warn!("dropping processed image '{}': {e}", image.id),
        }
    }

    if pages.is_empty() {
        return None;
    }

    // BTreeMap iteration gives ascending page numbers; the output map
    // preserves insertion order, so textual keys come out numerically sorted.
    let mut json_content = Map::new();
    for (page, items) in pages {
        json_content.insert(page_key(page), Value::Array(items));
    }

    let mut out = Map::new();
    out.insert("meta".into(), Value::Object(shell.meta.clone()));
    out.insert("json_content".into(), Value::Object(json_content));
    Some(Value::Object(out).to_string())
}
