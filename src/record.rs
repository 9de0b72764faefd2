//! Record decomposition: one JSONL line → metadata + numerically ordered pages.
//!
//! A record describes one source document. Its `json_content` maps page keys
//! (`page_<n>`) to ordered item lists; items are polymorphic over image and
//! merged-text kinds. The decomposer's one non-obvious job is ordering: page
//! keys must sort by their numeric suffix (`page_2` before `page_10`), which
//! a lexicographic map would get wrong. Pages therefore live in a
//! `BTreeMap<u32, _>` keyed on the parsed page number, and the textual key is
//! reconstructed only at output time.
//!
//! Item decoding is tolerant by design: an item whose `type` is unknown — or
//! whose payload does not match its declared type — is carried through as an
//! opaque [`PageItem::Other`] value rather than failing the whole line. Only
//! a line that is not JSON, or that lacks `json_content`, is rejected.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// Matches a well-formed page key and captures the page number.
static PAGE_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^page_(\d+)$").expect("valid regex"));

/// Matches the numeric suffix of an item id such as `image_7`.
static ID_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)$").expect("valid regex"));

/// Why a JSONL line could not be decomposed into a [`Record`].
///
/// Per the skip-and-continue policy, callers log these and move to the next
/// line; they never abort a file.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("line is not a JSON object")]
    NotAnObject,

    #[error("record has no json_content")]
    MissingContent,
}

/// One item inside a page's ordered item list.
///
/// Serialises with an internal `type` tag matching the wire format
/// (`{"type": "image", ...}`). Decoding goes through [`PageItem::from_value`]
/// so malformed payloads degrade to [`PageItem::Other`] instead of erroring.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum PageItem {
    #[serde(rename = "image")]
    Image(ImageItem),
    #[serde(rename = "merge_text")]
    MergeText(MergeTextItem),
    /// Unknown or malformed item kind, carried through untouched.
    #[serde(untagged)]
    Other(Value),
}

impl PageItem {
    /// Decode a raw item value, inspecting its `type` field.
    ///
    /// Unknown types and payloads that fail their declared type's schema are
    /// preserved as [`PageItem::Other`]; they are never fanned out and never
    /// break a record.
    pub fn from_value(value: Value) -> PageItem {
        let kind = value.get("type").and_then(Value::as_str);
        match kind {
            Some("image") => match serde_json::from_value::<ImageItem>(value.clone()) {
                Ok(item) => PageItem::Image(item),
                Err(e) => {
                    warn!("image item failed to decode ({e}); carrying through as-is");
                    PageItem::Other(value)
                }
            },
            Some("merge_text") => match serde_json::from_value::<MergeTextItem>(value.clone()) {
                Ok(item) => PageItem::MergeText(item),
                Err(e) => {
                    warn!("merge_text item failed to decode ({e}); carrying through as-is");
                    PageItem::Other(value)
                }
            },
            _ => PageItem::Other(value),
        }
    }
}

/// An image reference inside a page.
///
/// `id` has the form `image_<n>` where `n` is the owning page number — the
/// authoritative back-reference used to route a caption result to its page,
/// regardless of which page list the item appeared in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageItem {
    pub id: String,

    /// Object key suffix for the image, relative to the image prefix.
    /// `web_url` takes precedence over `url` when both are present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Source-provided caption, used as a hint in the VLM prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,

    /// Generated description. Empty string marks a processed-but-failed item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageItem {
    /// The page this image belongs to, parsed from the `id` suffix.
    ///
    /// `None` for malformed ids; such items cannot be routed to an output
    /// page and are dropped with a warning at reassembly.
    pub fn page_number(&self) -> Option<u32> {
        ID_SUFFIX
            .captures(&self.id)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// The store key suffix to fetch, honouring `web_url` precedence.
    pub fn key_suffix(&self) -> Option<&str> {
        self.web_url.as_deref().or(self.url.as_deref())
    }
}

/// A page's consolidated text, always the last item of its page when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeTextItem {
    #[serde(default)]
    pub text: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One decomposed JSONL record: document metadata plus its pages in
/// ascending numeric order.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub meta: Map<String, Value>,
    pub pages: BTreeMap<u32, Vec<PageItem>>,
}

impl Record {
    /// Parse one JSONL line.
    ///
    /// Fails only for non-JSON input, non-object records, or a missing
    /// `json_content` key. Keys of `json_content` that do not match
    /// `page_<n>` are ignored; individual items degrade per
    /// [`PageItem::from_value`].
    pub fn from_json_line(line: &str) -> Result<Record, RecordError> {
        let value: Value = serde_json::from_str(line)?;
        let obj = value.as_object().ok_or(RecordError::NotAnObject)?;

        let meta = obj
            .get("meta")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let content = obj
            .get("json_content")
            .and_then(Value::as_object)
            .ok_or(RecordError::MissingContent)?;

        let mut pages = BTreeMap::new();
        for (key, items) in content {
            let Some(page) = PAGE_KEY
                .captures(key)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
            else {
                continue;
            };
            let decoded: Vec<PageItem> = items
                .as_array()
                .map(|arr| arr.iter().cloned().map(PageItem::from_value).collect())
                .unwrap_or_default();
            pages.insert(page, decoded);
        }

        Ok(Record { meta, pages })
    }

    /// The record-level description, when `meta.description` is a string.
    pub fn description(&self) -> Option<&str> {
        self.meta.get("description").and_then(Value::as_str)
    }

    /// Merged text of a page, defined only when the page's **last** item is a
    /// `merge_text` item.
    pub fn merged_text(&self, page: u32) -> Option<&str> {
        match self.pages.get(&page)?.last()? {
            PageItem::MergeText(t) => Some(&t.text),
            _ => None,
        }
    }

    /// Captioning context for an image on `page`: merged text of pages
    /// `page-1`, `page`, `page+1` joined with single spaces (missing pages
    /// contribute empty strings), prefixed with the record description when
    /// one exists.
    pub fn context_window(&self, page: u32) -> String {
        let neighbours = [page.checked_sub(1), Some(page), page.checked_add(1)];
        let joined = neighbours
            .iter()
            .map(|p| p.and_then(|p| self.merged_text(p)).unwrap_or(""))
            .collect::<Vec<_>>()
            .join(" ");

        match self.description() {
            Some(desc) => format!("{desc} {joined}"),
            None => joined,
        }
    }

    /// All image items across all pages, in ascending page order then item
    /// order within each page.
    pub fn image_items(&self) -> impl Iterator<Item = &ImageItem> {
        self.pages.values().flatten().filter_map(|item| match item {
            PageItem::Image(img) => Some(img),
            _ => None,
        })
    }
}

/// Reconstruct the textual page key for a page number.
pub fn page_key(page: u32) -> String {
    format!("page_{page}")
}
