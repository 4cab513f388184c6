//! End-to-end hybrid retrieval tests with in-memory collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use tilth_core::{
    Chunk, ChunkMetadata, Error, MediaEntry, MediaItem, MediaStore, ProcessingStatus, Result,
    SourceType, VectorIndex,
};
use tilth_inference::mock::{MockEmbeddingBackend, MockEmbeddingGenerator};
use tilth_search::{HybridConfig, HybridRetriever};
use tilth_store::{MemoryMediaStore, MemoryVectorIndex};

const DIM: usize = 64;

/// Store whose every operation fails, for full-path degradation tests.
struct FailingStore;

#[async_trait]
impl MediaStore for FailingStore {
    async fn upsert(&self, _entry: MediaEntry) -> Result<MediaEntry> {
        Err(Error::Store("store offline".into()))
    }
    async fn get(&self, _key: &str) -> Result<Option<MediaEntry>> {
        Err(Error::Store("store offline".into()))
    }
    async fn set_status(&self, _key: &str, _status: ProcessingStatus) -> Result<()> {
        Err(Error::Store("store offline".into()))
    }
    async fn record_error(&self, _key: &str, _message: &str) -> Result<()> {
        Err(Error::Store("store offline".into()))
    }
    async fn search_text(&self, _query: &str, _limit: usize) -> Result<Vec<MediaEntry>> {
        Err(Error::Store("store offline".into()))
    }
    async fn list_by_status(&self, _status: ProcessingStatus) -> Result<Vec<MediaEntry>> {
        Err(Error::Store("store offline".into()))
    }
    async fn count(&self) -> Result<usize> {
        Err(Error::Store("store offline".into()))
    }
}

fn embedded_chunk(source_key: &str, content: &str) -> Chunk {
    Chunk {
        id: Uuid::new_v4(),
        content: content.to_string(),
        source_key: source_key.to_string(),
        source_type: SourceType::EmbeddedText,
        score: 0.0,
        embedding: Some(MockEmbeddingGenerator::generate(content, DIM)),
        metadata: ChunkMetadata {
            title: Some(source_key.to_string()),
            source_url: None,
            timestamp_secs: None,
            tags: vec![],
        },
    }
}

async fn transcript_entry(store: &MemoryMediaStore, key: &str, title: &str, transcript: &str) {
    let item = MediaItem {
        key: key.to_string(),
        title: title.to_string(),
        description: String::new(),
        url: format!("https://video.example/{}", key),
        publish_date: None,
        duration_secs: Some(900.0),
        view_count: None,
        thumbnail: None,
        tags: vec![],
        channel_title: None,
    };
    let mut entry = MediaEntry::pending(&item);
    entry.transcript = transcript.to_string();
    entry.processing_status = ProcessingStatus::Completed;
    store.upsert(entry).await.unwrap();
}

#[tokio::test]
async fn query_blends_embedded_and_transcript_corpora() {
    let store = Arc::new(MemoryMediaStore::new());
    let index = Arc::new(MemoryVectorIndex::new());
    let embedding = Arc::new(MockEmbeddingBackend::new(DIM));

    // Embedded chunk whose content equals the query scores similarity 1.
    index
        .add(embedded_chunk("guide-cover-crops", "cover crops"))
        .await
        .unwrap();

    transcript_entry(
        &store,
        "vid-1",
        "Fall cover crops",
        "Sowing cover crops in September protects bare soil. \
         Winter rye and vetch are reliable cover crops for cold climates.",
    )
    .await;

    let retriever = HybridRetriever::new(embedding, index, store);
    let result = retriever.query("cover crops", 8).await;

    assert!(!result.chunks.is_empty());
    assert!(result
        .chunks
        .iter()
        .any(|c| c.source_type == SourceType::EmbeddedText));
    assert!(result
        .chunks
        .iter()
        .any(|c| c.source_type == SourceType::Transcript));
    assert!(result.sources.contains("guide-cover-crops"));
    assert!(result.sources.contains("vid-1"));
    assert!(result.total_candidates >= result.chunks.len());

    // Ranked descending.
    for pair in result.chunks.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn embedded_failure_degrades_to_transcript_only() {
    let store = Arc::new(MemoryMediaStore::new());
    let index = Arc::new(MemoryVectorIndex::new());
    let embedding = Arc::new(MockEmbeddingBackend::failing(DIM));

    transcript_entry(
        &store,
        "vid-1",
        "Drip irrigation",
        "Drip irrigation tape delivers water straight to the roots.",
    )
    .await;

    let retriever = HybridRetriever::new(embedding, index, store);
    let result = retriever.query("drip irrigation", 4).await;

    assert!(!result.chunks.is_empty());
    assert!(result
        .chunks
        .iter()
        .all(|c| c.source_type == SourceType::Transcript));
}

#[tokio::test]
async fn store_failure_falls_back_to_embedded_at_full_top_k() {
    let index = Arc::new(MemoryVectorIndex::new());
    let embedding = Arc::new(MockEmbeddingBackend::new(DIM));

    // Six distinct embedded sources matching the query exactly.
    for i in 0..6 {
        index
            .add(embedded_chunk(&format!("doc-{}", i), "pruning fruit trees"))
            .await
            .unwrap();
    }

    let retriever = HybridRetriever::new(embedding, index, Arc::new(FailingStore));
    let result = retriever.query("pruning fruit trees", 6).await;

    // Full top_k, not the hybrid branch's top_k/4 share.
    assert_eq!(result.chunks.len(), 6);
    assert!(result
        .chunks
        .iter()
        .all(|c| c.source_type == SourceType::EmbeddedText));
}

#[tokio::test]
async fn every_source_failing_returns_empty_result() {
    let index = Arc::new(MemoryVectorIndex::new());
    let embedding = Arc::new(MockEmbeddingBackend::failing(DIM));

    let retriever = HybridRetriever::new(embedding, index, Arc::new(FailingStore));
    let result = retriever.query("anything at all", 5).await;

    assert!(result.chunks.is_empty());
    assert!(result.sources.is_empty());
    assert_eq!(result.total_candidates, 0);
}

#[tokio::test]
async fn per_item_cap_limits_chunks_per_video() {
    let store = Arc::new(MemoryMediaStore::new());
    let index = Arc::new(MemoryVectorIndex::new());
    let embedding = Arc::new(MockEmbeddingBackend::new(DIM));

    // One long transcript where every sentence matches the query.
    let transcript = "Healthy soil needs compost every season. ".repeat(60);
    transcript_entry(&store, "vid-long", "Soil building", &transcript).await;

    let config = HybridConfig::default().with_per_item_cap(2);
    let retriever = HybridRetriever::new(embedding, index, store).with_config(config);
    let result = retriever.query("compost soil", 8).await;

    let from_long = result
        .chunks
        .iter()
        .filter(|c| c.source_key == "vid-long")
        .count();
    assert!(from_long >= 1);
    assert!(from_long <= 2, "per-item cap exceeded: {}", from_long);
}

#[tokio::test]
async fn low_relevance_chunks_filtered_out() {
    let store = Arc::new(MemoryMediaStore::new());
    let index = Arc::new(MemoryVectorIndex::new());
    let embedding = Arc::new(MockEmbeddingBackend::new(DIM));

    // The entry text-matches on the title, but the transcript itself has no
    // overlap with the query, so every chunk scores under the threshold.
    transcript_entry(
        &store,
        "vid-offtopic",
        "Greenhouse heating systems",
        "Ventilation fans cycle on thermostat setpoints during afternoon peaks.",
    )
    .await;

    let retriever = HybridRetriever::new(embedding, index, store);
    let result = retriever.query("greenhouse heating", 4).await;

    assert!(result
        .chunks
        .iter()
        .all(|c| c.source_key != "vid-offtopic" || c.score >= 0.1));
}

#[tokio::test]
async fn sources_set_matches_selected_chunks() {
    let store = Arc::new(MemoryMediaStore::new());
    let index = Arc::new(MemoryVectorIndex::new());
    let embedding = Arc::new(MockEmbeddingBackend::new(DIM));

    transcript_entry(
        &store,
        "vid-1",
        "Seed starting",
        "Start seeds under lights with bottom heat for even germination.",
    )
    .await;
    transcript_entry(
        &store,
        "vid-2",
        "Seed saving",
        "Dry seeds fully before storage and label every seed packet.",
    )
    .await;

    let retriever = HybridRetriever::new(embedding, index, store);
    let result = retriever.query("seeds storage germination", 6).await;

    let chunk_sources: std::collections::HashSet<String> = result
        .chunks
        .iter()
        .map(|c| c.source_key.clone())
        .collect();
    assert_eq!(chunk_sources, result.sources);
}
