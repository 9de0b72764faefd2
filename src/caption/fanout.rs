//! Fan-out: decompose a batch of JSONL lines into independent caption tasks.
//!
//! Each parsed record becomes a [`RecordShell`] that accumulates results, and
//! each usable image item becomes one [`CaptionTask`] carrying everything the
//! VLM call needs: the fetched bytes, the page-context text, and the item
//! itself. Tasks reference their shell by record index and carry their
//! fan-out slot, so results landing in any completion order can be restored
//! to submission order.
//!
//! Items that cannot become tasks — no URL, an id with no page number, or a
//! failed image fetch — are marked with the empty-description sentinel and go
//! straight into their shell: they were *processed*, they just have nothing
//! to say.

use crate::record::{ImageItem, Record};
use crate::store::ObjectStore;
use serde_json::{Map, Value};
use tracing::warn;

/// One image ready for captioning, routed back by `record_idx` + `slot`.
pub struct CaptionTask {
    pub record_idx: usize,
    /// Position of this item in its record's fan-out sequence.
    pub slot: usize,
    pub image: ImageItem,
    pub bytes: Vec<u8>,
    pub context: String,
}

/// Per-record accumulator for processed image items.
///
/// Entries are `(slot, item)`: slots number the record's image items in
/// fan-out order, and the reassembler sorts on them so completion order
/// never leaks into output.
pub struct RecordShell {
    pub meta: Map<String, Value>,
    pub processed: Vec<(usize, ImageItem)>,
}

impl RecordShell {
    /// Processed items restored to fan-out (submission) order.
    pub fn items_in_order(&self) -> Vec<&ImageItem> {
        let mut slots: Vec<&(usize, ImageItem)> = self.processed.iter().collect();
        slots.sort_by_key(|(slot, _)| *slot);
        slots.into_iter().map(|(_, item)| item).collect()
    }
}

/// Fan a batch of lines out into shells and caption tasks.
///
/// Lines that fail to parse are logged and skipped; they produce neither a
/// shell nor tasks. Image fetches happen here, sequentially — the expensive
/// concurrent stage is the VLM call, not the store read.
pub async fn fan_out(
    store: &dyn ObjectStore,
    image_prefix: &str,
    lines: &[&str],
) -> (Vec<RecordShell>, Vec<CaptionTask>) {
    let mut shells = Vec::new();
    let mut tasks = Vec::new();

    for line in lines {
        let record = match Record::from_json_line(line) {
            Ok(r) => r,
            Err(e) => {
                warn!("skipping unparseable record: {e}");
                continue;
            }
        };

        let record_idx = shells.len();
        let mut shell = RecordShell {
            meta: record.meta.clone(),
            processed: Vec::new(),
        };

        for (slot, image) in record.image_items().enumerate() {
            let Some(page) = image.page_number() else {
                warn!("image '{}' has no page suffix; marking unprocessable", image.id);
                shell.processed.push((slot, failed(image)));
                continue;
            };
            let Some(suffix) = image.key_suffix() else {
                warn!("image '{}' has no url; marking unprocessable", image.id);
                shell.processed.push((slot, failed(image)));
                continue;
            };

            let key = format!("{image_prefix}{suffix}");
            match store.get(&key).await {
                Ok(bytes) => tasks.push(CaptionTask {
                    record_idx,
                    slot,
                    image: image.clone(),
                    bytes,
                    context: record.context_window(page),
                }),
                Err(e) => {
                    warn!("image fetch failed for '{key}': {e}");
                    shell.processed.push((slot, failed(image)));
                }
            }
        }

        shells.push(shell);
    }

    (shells, tasks)
}

/// Clone an item with the empty-description sentinel applied.
fn failed(image: &ImageItem) -> ImageItem {
    let mut item = image.clone();
    item.desc = Some(String::new());
    item
}
