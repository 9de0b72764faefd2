//! Object-store contract and the two bundled implementations.
//!
//! Both pipelines talk to storage through the [`ObjectStore`] trait: drained
//! prefix listing, whole-object get, whole-object put with a content type.
//! Reads and writes are deliberately not streamed — files are loaded and
//! written in one piece, which bounds the system to file sizes that fit in
//! memory, an accepted constraint for this batch-oriented job.
//!
//! Production S3-style backends are external collaborators implementing this
//! trait. The crate ships [`FsStore`] (a directory-rooted store, enough for
//! local corpora and the CLI) and [`MemoryStore`] (tests and examples).

use crate::error::EnrichError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Key-based object storage: drained listing, full-content get/put.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All keys under `prefix`, fully drained (no pagination surfaces here).
    async fn list(&self, prefix: &str) -> Result<Vec<String>, EnrichError>;

    /// Full content of one object.
    async fn get(&self, key: &str) -> Result<Vec<u8>, EnrichError>;

    /// Write one object in full.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), EnrichError>;
}

/// Derive an output key by substituting the input prefix once.
pub fn derive_output_key(key: &str, input_prefix: &str, output_prefix: &str) -> String {
    key.replacen(input_prefix, output_prefix, 1)
}

/// Keys under `prefix` that name JSONL files (case-insensitive extension).
pub async fn list_jsonl(
    store: &dyn ObjectStore,
    prefix: &str,
) -> Result<Vec<String>, EnrichError> {
    let keys = store.list(prefix).await?;
    Ok(keys
        .into_iter()
        .filter(|k| k.to_lowercase().ends_with(".jsonl"))
        .collect())
}

// ── Filesystem store ─────────────────────────────────────────────────────

/// An [`ObjectStore`] over a local directory; keys map to relative paths.
///
/// Content types are accepted and ignored — the filesystem has nowhere to
/// record them.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, EnrichError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        // Directory walks are synchronous; keep them off the async executor.
        let keys = tokio::task::spawn_blocking(move || walk_keys(&root, &root))
            .await
            .map_err(|e| EnrichError::ListFailed {
                prefix: prefix.clone(),
                detail: e.to_string(),
            })?
            .map_err(|e| EnrichError::ListFailed {
                prefix: prefix.clone(),
                detail: e.to_string(),
            })?;

        let mut matched: Vec<String> = keys
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .collect();
        matched.sort();
        Ok(matched)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, EnrichError> {
        tokio::fs::read(self.path_for(key))
            .await
            .map_err(|e| EnrichError::GetFailed {
                key: key.to_string(),
                detail: e.to_string(),
            })
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<(), EnrichError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EnrichError::PutFailed {
                    key: key.to_string(),
                    detail: e.to_string(),
                })?;
        }
        debug!("writing {} bytes to {}", bytes.len(), path.display());
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| EnrichError::PutFailed {
                key: key.to_string(),
                detail: e.to_string(),
            })
    }
}

/// Collect relative keys for every file under `dir`.
fn walk_keys(root: &Path, dir: &Path) -> std::io::Result<Vec<String>> {
    let mut keys = Vec::new();
    if !dir.exists() {
        return Ok(keys);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            keys.extend(walk_keys(root, &path)?);
        } else if let Ok(rel) = path.strip_prefix(root) {
            keys.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(keys)
}

// ── In-memory store ──────────────────────────────────────────────────────

/// An in-memory [`ObjectStore`] for tests and examples.
///
/// Tracks the number of `put` calls so tests can assert idempotent-skip
/// behaviour (a second driver run must not rewrite existing outputs).
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
    puts: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, bypassing the put counter.
    pub fn seed(&self, key: &str, bytes: impl Into<Vec<u8>>, content_type: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            (bytes.into(), content_type.to_string()),
        );
    }

    /// Number of `put` calls made through the trait.
    pub fn put_count(&self) -> usize {
        *self.puts.lock().unwrap()
    }

    /// Content of one object, if present.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|(b, _)| b.clone())
    }

    /// Recorded content type of one object, if present.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().unwrap().get(key).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, EnrichError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, EnrichError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(b, _)| b.clone())
            .ok_or_else(|| EnrichError::GetFailed {
                key: key.to_string(),
                detail: "no such key".into(),
            })
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), EnrichError> {
        *self.puts.lock().unwrap() += 1;
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }
}
