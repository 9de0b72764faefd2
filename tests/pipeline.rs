//! End-to-end pipeline tests over an in-memory store and mock backends.

use corpus_enrich::{
    CaptionConfig, CaptionPipeline, EmbedConfig, EmbedPipeline, EmbeddingModel, ItemError,
    MemoryStore, ModelFactory, NoopProgress,
};
use serde_json::{json, Value};
use std::sync::Arc;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

fn caption_config(endpoint: &str) -> CaptionConfig {
    CaptionConfig::builder()
        .input_prefix("corpus/jsonl/")
        .output_prefix("corpus/image_desc/")
        .image_prefix("corpus/imgs/")
        .endpoint(endpoint)
        .build()
        .unwrap()
}

fn embed_config() -> EmbedConfig {
    EmbedConfig::builder()
        .input_prefix("corpus/image_desc/")
        .output_prefix("corpus/json_emb/")
        .workers(2)
        .devices(2)
        .dimension(3)
        .build()
        .unwrap()
}

/// Embeds each text as `[len, 0, 0]`.
struct LenModel;

impl EmbeddingModel for LenModel {
    fn dimension(&self) -> usize {
        3
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ItemError> {
        Ok(texts
            .iter()
            .map(|t| vec![t.chars().count() as f32, 0.0, 0.0])
            .collect())
    }
}

fn len_factory() -> ModelFactory {
    Arc::new(|_| Ok(Box::new(LenModel) as Box<dyn EmbeddingModel>))
}

fn output_json(store: &MemoryStore, key: &str) -> Vec<Value> {
    let bytes = store.object(key).expect("output object missing");
    String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

// ── Caption path ─────────────────────────────────────────────────────────

#[tokio::test]
async fn caption_end_to_end() {
    let server = httpmock::MockServer::start_async().await;
    let vlm = server
        .mock_async(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/v1/chat/completions");
            then.status(200).json_body(json!({
                "choices": [{"message": {"role": "assistant", "content": "Title--Desc"}}]
            }));
        })
        .await;

    let store = MemoryStore::new();
    let line = json!({
        "meta": {},
        "json_content": {
            "page_0": [{"type": "image", "id": "image_0", "url": "x.jpg"}],
            "page_1": [{"type": "merge_text", "text": "hello"}]
        }
    })
    .to_string();
    store.seed("corpus/jsonl/a.jsonl", line.into_bytes(), "application/json");
    store.seed("corpus/imgs/x.jpg", PNG_MAGIC.to_vec(), "image/png");

    let pipeline = CaptionPipeline::new(caption_config(&server.url("/v1"))).unwrap();
    let stats = pipeline.run(&store, &NoopProgress).await.unwrap();

    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.images_captioned, 1);
    vlm.assert_async().await;

    let out = output_json(&store, "corpus/image_desc/a.jsonl");
    assert_eq!(out.len(), 1);
    let content = out[0]["json_content"].as_object().unwrap();
    assert_eq!(content.keys().collect::<Vec<_>>(), ["page_0"]);
    assert_eq!(content["page_0"][0]["id"], "image_0");
    assert_eq!(content["page_0"][0]["desc"], "Title--Desc");
    assert_eq!(
        store.content_type("corpus/image_desc/a.jsonl").as_deref(),
        Some("application/json")
    );
}

#[tokio::test]
async fn caption_rerun_is_idempotent() {
    let server = httpmock::MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/v1/chat/completions");
            then.status(200).json_body(json!({
                "choices": [{"message": {"role": "assistant", "content": "d"}}]
            }));
        })
        .await;

    let store = MemoryStore::new();
    let line = json!({
        "meta": {},
        "json_content": {"page_0": [{"type": "image", "id": "image_0", "url": "x.jpg"}]}
    })
    .to_string();
    store.seed("corpus/jsonl/a.jsonl", line.into_bytes(), "application/json");
    store.seed("corpus/imgs/x.jpg", PNG_MAGIC.to_vec(), "image/png");

    let pipeline = CaptionPipeline::new(caption_config(&server.url("/v1"))).unwrap();
    pipeline.run(&store, &NoopProgress).await.unwrap();
    assert_eq!(store.put_count(), 1);

    let stats = pipeline.run(&store, &NoopProgress).await.unwrap();
    assert_eq!(stats.files_skipped, 1);
    assert_eq!(store.put_count(), 1, "second run must not rewrite outputs");
}

#[tokio::test]
async fn caption_failures_degrade_per_image_not_per_file() {
    // VLM always errors; the item is still emitted, carrying the empty
    // sentinel, and only the valid tally excludes it.
    let server = httpmock::MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/v1/chat/completions");
            then.status(500).body("boom");
        })
        .await;

    let store = MemoryStore::new();
    let line = json!({
        "meta": {},
        "json_content": {"page_0": [{"type": "image", "id": "image_0", "url": "x.jpg"}]}
    })
    .to_string();
    store.seed("corpus/jsonl/a.jsonl", line.into_bytes(), "application/json");
    store.seed("corpus/imgs/x.jpg", PNG_MAGIC.to_vec(), "image/png");

    let pipeline = CaptionPipeline::new(caption_config(&server.url("/v1"))).unwrap();
    let stats = pipeline.run(&store, &NoopProgress).await.unwrap();

    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.images_captioned, 0);

    let out = output_json(&store, "corpus/image_desc/a.jsonl");
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["json_content"]["page_0"][0]["id"], "image_0");
    assert_eq!(out[0]["json_content"]["page_0"][0]["desc"], "");
}

#[tokio::test]
async fn caption_output_order_is_independent_of_completion_order() {
    // Two images on one page; the first submitted caption answers last
    // (delayed), so completion order is reversed. The output must still
    // list the items in submission order.
    let bytes_a = PNG_MAGIC.to_vec();
    let mut bytes_b = PNG_MAGIC.to_vec();
    bytes_b.extend_from_slice(&[1, 1, 1]);
    // base64 of bytes_a ends the data URI; bytes_b's URI continues with "AQEB"
    let uri_a_tail = "iVBORw0KGgoAAAAA\"";
    let uri_b_tail = "iVBORw0KGgoAAAAAAQEB\"";

    let server = httpmock::MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/v1/chat/completions")
                .body_contains(uri_b_tail);
            then.status(200).json_body(json!({
                "choices": [{"message": {"role": "assistant", "content": "caption-b"}}]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/v1/chat/completions")
                .body_contains(uri_a_tail);
            then.status(200)
                .delay(std::time::Duration::from_millis(300))
                .json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "caption-a"}}]
                }));
        })
        .await;

    let store = MemoryStore::new();
    let line = json!({
        "meta": {},
        "json_content": {
            "page_0": [
                {"type": "image", "id": "image_0", "url": "a.png"},
                {"type": "image", "id": "image_0", "url": "b.png"}
            ]
        }
    })
    .to_string();
    store.seed("corpus/jsonl/a.jsonl", line.into_bytes(), "application/json");
    store.seed("corpus/imgs/a.png", bytes_a, "image/png");
    store.seed("corpus/imgs/b.png", bytes_b, "image/png");

    let pipeline = CaptionPipeline::new(caption_config(&server.url("/v1"))).unwrap();
    pipeline.run(&store, &NoopProgress).await.unwrap();

    let out = output_json(&store, "corpus/image_desc/a.jsonl");
    let page = out[0]["json_content"]["page_0"].as_array().unwrap();
    assert_eq!(page[0]["url"], "a.png");
    assert_eq!(page[0]["desc"], "caption-a");
    assert_eq!(page[1]["url"], "b.png");
    assert_eq!(page[1]["desc"], "caption-b");
}

// ── Embedding path ───────────────────────────────────────────────────────

#[tokio::test]
async fn embed_end_to_end() {
    let store = MemoryStore::new();
    let line = json!({
        "meta": {"url": "doc-1", "total_pages": 2},
        "json_content": {
            "page_0": [{"type": "merge_text", "text": "hello"}],
            "page_1": [{"type": "merge_text", "text": "worlds"}]
        }
    })
    .to_string();
    store.seed(
        "corpus/image_desc/a.jsonl",
        line.into_bytes(),
        "application/json",
    );

    let stats = EmbedPipeline::new(embed_config())
        .run(&store, len_factory(), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.embeddings_total, 2);

    let out = output_json(&store, "corpus/json_emb/a.jsonl");
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["url"], "doc-1");
    assert_eq!(out[0]["total_pages"], 2);
    assert_eq!(out[0]["description"], "");

    let list = out[0]["embedding_list"].as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["page"], 0);
    assert_eq!(list[0]["text"], "hello");
    assert_eq!(list[0]["embedding"], json!([5.0, 0.0, 0.0]));
    assert_eq!(list[1]["page"], 1);
    assert_eq!(list[1]["embedding"], json!([6.0, 0.0, 0.0]));
}

#[tokio::test]
async fn embed_rerun_is_idempotent() {
    let store = MemoryStore::new();
    let line = json!({
        "meta": {},
        "json_content": {"page_0": [{"type": "merge_text", "text": "hi"}]}
    })
    .to_string();
    store.seed(
        "corpus/image_desc/a.jsonl",
        line.into_bytes(),
        "application/json",
    );

    let pipeline = EmbedPipeline::new(embed_config());
    pipeline
        .run(&store, len_factory(), &NoopProgress)
        .await
        .unwrap();
    assert_eq!(store.put_count(), 1);

    let stats = pipeline
        .run(&store, len_factory(), &NoopProgress)
        .await
        .unwrap();
    assert_eq!(stats.files_skipped, 1);
    assert_eq!(store.put_count(), 1);
}

#[tokio::test]
async fn embed_many_records_across_workers_stay_intact() {
    // Records land in completion order across batches, but every record's
    // own embedding_list must match its own pages.
    let store = MemoryStore::new();
    let mut body = String::new();
    for i in 0..20 {
        let text = "t".repeat(i + 1);
        body.push_str(
            &json!({
                "meta": {"url": format!("doc-{i}")},
                "json_content": {"page_0": [{"type": "merge_text", "text": text}]}
            })
            .to_string(),
        );
        body.push('\n');
    }
    store.seed(
        "corpus/image_desc/a.jsonl",
        body.into_bytes(),
        "application/json",
    );

    // Tiny byte cap so the file splits into many batches.
    let config = EmbedConfig::builder()
        .input_prefix("corpus/image_desc/")
        .output_prefix("corpus/json_emb/")
        .workers(4)
        .devices(2)
        .max_batch_bytes(200)
        .dimension(3)
        .build()
        .unwrap();

    let stats = EmbedPipeline::new(config)
        .run(&store, len_factory(), &NoopProgress)
        .await
        .unwrap();
    assert_eq!(stats.embeddings_total, 20);
    assert!(stats.batches > 1, "expected multiple batches");

    let out = output_json(&store, "corpus/json_emb/a.jsonl");
    assert_eq!(out.len(), 20);
    for record in &out {
        let url = record["url"].as_str().unwrap();
        let i: usize = url.strip_prefix("doc-").unwrap().parse().unwrap();
        let entry = &record["embedding_list"][0];
        assert_eq!(entry["text"].as_str().unwrap().len(), i + 1, "{url}");
        assert_eq!(entry["embedding"][0], (i + 1) as f64, "{url}");
    }
}

#[tokio::test]
async fn embed_worker_init_failure_is_fatal() {
    let store = MemoryStore::new();
    store.seed(
        "corpus/image_desc/a.jsonl",
        b"{}".to_vec(),
        "application/json",
    );

    let factory: ModelFactory = Arc::new(|device| {
        Err(corpus_enrich::EnrichError::HttpClient(format!(
            "device {device} unavailable"
        )))
    });

    let err = EmbedPipeline::new(embed_config())
        .run(&store, factory, &NoopProgress)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        corpus_enrich::EnrichError::WorkerInitFailed { .. }
    ));
    assert_eq!(store.put_count(), 0);
}

// ── Cross-pipeline chaining ──────────────────────────────────────────────

#[tokio::test]
async fn caption_output_feeds_embed_input() {
    let server = httpmock::MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/v1/chat/completions");
            then.status(200).json_body(json!({
                "choices": [{"message": {"role": "assistant", "content": "A chart--Sales rise"}}]
            }));
        })
        .await;

    let store = MemoryStore::new();
    let line = json!({
        "meta": {"url": "doc-1"},
        "json_content": {
            "page_0": [
                {"type": "image", "id": "image_0", "url": "x.jpg"},
                {"type": "merge_text", "text": "quarterly sales"}
            ]
        }
    })
    .to_string();
    store.seed("corpus/jsonl/a.jsonl", line.into_bytes(), "application/json");
    store.seed("corpus/imgs/x.jpg", PNG_MAGIC.to_vec(), "image/png");

    CaptionPipeline::new(caption_config(&server.url("/v1")))
        .unwrap()
        .run(&store, &NoopProgress)
        .await
        .unwrap();

    // The embedding pipeline reads the captioning pipeline's output prefix.
    // Captioned records carry no merge_text, so the page contributes one
    // empty chunk and the record comes out with an empty embedding_list.
    let stats = EmbedPipeline::new(embed_config())
        .run(&store, len_factory(), &NoopProgress)
        .await
        .unwrap();
    assert_eq!(stats.files_processed, 1);

    let out = output_json(&store, "corpus/json_emb/a.jsonl");
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["url"], "doc-1");
    assert!(out[0]["embedding_list"].as_array().unwrap().is_empty());
}
