//! Hybrid retrieval: vector search over the embedded corpus blended with
//! on-the-fly relevance scoring over the transcript corpus, with a
//! diversity-aware top-K selection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use tilth_core::{
    defaults, Chunk, ChunkMetadata, EmbeddingBackend, Error, MediaStore, Result, RetrievalResult,
    SourceType, VectorIndex,
};

use crate::chunker::{chunk_text, ChunkerConfig};
use crate::relevance::relevance_score;

/// Configuration for hybrid retrieval.
///
/// The diversity caps are configurable because the invariant is "no single
/// source dominates", not the literal ratios.
#[derive(Debug, Clone)]
pub struct HybridConfig {
    /// Minimum relevance for a transcript chunk to stay a candidate.
    pub min_score: f32,
    /// Top scoring chunks kept per media item before the cross-item merge.
    pub per_item_cap: usize,
    /// Second-pass per-source cap is `top_k / per_source_cap_divisor`.
    pub per_source_cap_divisor: usize,
    /// Embedded branch requests `top_k / embedded_share_divisor` candidates.
    pub embedded_share_divisor: usize,
    /// Transcript branch examines `top_k × transcript_candidate_factor`
    /// text-matched items.
    pub transcript_candidate_factor: usize,
    /// Transcript chunking parameters.
    pub chunker: ChunkerConfig,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            min_score: defaults::MIN_RELEVANCE_SCORE,
            per_item_cap: defaults::PER_ITEM_CHUNK_CAP,
            per_source_cap_divisor: defaults::PER_SOURCE_CAP_DIVISOR,
            embedded_share_divisor: defaults::EMBEDDED_SHARE_DIVISOR,
            transcript_candidate_factor: defaults::TRANSCRIPT_CANDIDATE_FACTOR,
            chunker: ChunkerConfig::default(),
        }
    }
}

impl HybridConfig {
    /// Set the minimum transcript relevance threshold.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Set the per-item chunk cap.
    pub fn with_per_item_cap(mut self, cap: usize) -> Self {
        self.per_item_cap = cap.max(1);
        self
    }

    /// Set the second-pass per-source cap divisor.
    pub fn with_per_source_cap_divisor(mut self, divisor: usize) -> Self {
        self.per_source_cap_divisor = divisor.max(1);
        self
    }

    /// Set the embedded-corpus share divisor.
    pub fn with_embedded_share_divisor(mut self, divisor: usize) -> Self {
        self.embedded_share_divisor = divisor.max(1);
        self
    }
}

/// Hybrid retrieval engine.
///
/// Degrades rather than fails: a sub-source error is logged and swallowed,
/// and the caller always receives a result built from whatever succeeded.
pub struct HybridRetriever {
    embedding: Arc<dyn EmbeddingBackend>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn MediaStore>,
    config: HybridConfig,
}

impl HybridRetriever {
    pub fn new(
        embedding: Arc<dyn EmbeddingBackend>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn MediaStore>,
    ) -> Self {
        Self {
            embedding,
            index,
            store,
            config: HybridConfig::default(),
        }
    }

    pub fn with_config(mut self, config: HybridConfig) -> Self {
        self.config = config;
        self
    }

    /// Retrieve the top `top_k` chunks for a query.
    ///
    /// Never returns an error: sub-source failures degrade, and a failure
    /// of the whole hybrid path falls back to a direct embedded-corpus
    /// query at full `top_k`. An empty result beats an error.
    pub async fn query(&self, text: &str, top_k: usize) -> RetrievalResult {
        let top_k = top_k.max(1);
        let started = Instant::now();

        let result = match self.query_hybrid(text, top_k).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    query = %text,
                    error = %e,
                    "Hybrid retrieval failed, falling back to embedded corpus"
                );
                match self.query_embedded(text, top_k).await {
                    Ok(chunks) => collect_result(chunks, None),
                    Err(fallback_err) => {
                        warn!(
                            query = %text,
                            error = %fallback_err,
                            "Fallback embedded query failed, returning empty result"
                        );
                        RetrievalResult::empty()
                    }
                }
            }
        };

        info!(
            query = %text,
            result_count = result.chunks.len(),
            source_count = result.sources.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Retrieval complete"
        );
        result
    }

    async fn query_hybrid(&self, text: &str, top_k: usize) -> Result<RetrievalResult> {
        // Embedded branch is the lower-priority corpus; its failure only
        // degrades the blend.
        let embedded_share = (top_k / self.config.embedded_share_divisor).max(1);
        let embedded = match self.query_embedded(text, embedded_share).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(
                    query = %text,
                    error = %e,
                    "Embedded corpus query failed, continuing with transcripts only"
                );
                Vec::new()
            }
        };

        let transcript = self.query_transcripts(text, top_k).await?;

        debug!(
            embedded_hits = embedded.len(),
            transcript_hits = transcript.len(),
            "Merging candidate lists"
        );

        let mut candidates = embedded;
        candidates.extend(transcript);
        let total_candidates = candidates.len();

        let per_source_cap = (top_k / self.config.per_source_cap_divisor).max(1);
        let selected = select_diverse(candidates, top_k, per_source_cap);
        Ok(collect_result(selected, Some(total_candidates)))
    }

    /// Vector-similarity candidates from the pre-embedded corpus.
    async fn query_embedded(&self, text: &str, limit: usize) -> Result<Vec<Chunk>> {
        let vectors = self.embedding.embed_texts(&[text.to_string()]).await?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("Backend returned no vector".to_string()))?;
        self.index.search(&query_vector, limit).await
    }

    /// Relevance-scored chunks from the transcript corpus.
    ///
    /// Each matched item contributes at most `per_item_cap` chunks so one
    /// long video cannot crowd out the rest before the diversity pass.
    async fn query_transcripts(&self, text: &str, top_k: usize) -> Result<Vec<Chunk>> {
        let item_limit = top_k * self.config.transcript_candidate_factor;
        let entries = self.store.search_text(text, item_limit).await?;

        let mut out = Vec::new();
        for entry in entries {
            if entry.transcript.is_empty() {
                continue;
            }

            let mut scored: Vec<Chunk> = chunk_text(&entry.transcript, &self.config.chunker)
                .into_iter()
                .map(|content| {
                    let score = relevance_score(&content, text);
                    Chunk {
                        id: Uuid::new_v4(),
                        content,
                        source_key: entry.key.clone(),
                        source_type: SourceType::Transcript,
                        score,
                        embedding: None,
                        metadata: ChunkMetadata {
                            title: Some(entry.title.clone()),
                            source_url: Some(entry.source_url.clone()),
                            timestamp_secs: None,
                            tags: entry.tags.clone(),
                        },
                    }
                })
                .filter(|c| c.score >= self.config.min_score)
                .collect();

            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            scored.truncate(self.config.per_item_cap);
            out.extend(scored);
        }
        Ok(out)
    }
}

fn collect_result(chunks: Vec<Chunk>, total_candidates: Option<usize>) -> RetrievalResult {
    let sources: HashSet<String> = chunks.iter().map(|c| c.source_key.clone()).collect();
    let total = total_candidates.unwrap_or(chunks.len());
    RetrievalResult {
        chunks,
        sources,
        total_candidates: total,
    }
}

/// Diversity-aware top-K selection.
///
/// Pass one walks the score-ranked candidates taking the single best chunk
/// of each unseen source until `top_k` or sources run out, putting source coverage
/// first. Pass two fills remaining slots from already-represented sources,
/// capped at `per_source_cap` chunks per source (cap includes the pass-one
/// pick). Output is re-sorted by score.
pub fn select_diverse(mut candidates: Vec<Chunk>, top_k: usize, per_source_cap: usize) -> Vec<Chunk> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut selected: Vec<Chunk> = Vec::with_capacity(top_k);
    let mut selected_ids: HashSet<Uuid> = HashSet::new();
    let mut per_source: HashMap<String, usize> = HashMap::new();

    for chunk in &candidates {
        if selected.len() >= top_k {
            break;
        }
        if !per_source.contains_key(&chunk.source_key) {
            per_source.insert(chunk.source_key.clone(), 1);
            selected_ids.insert(chunk.id);
            selected.push(chunk.clone());
        }
    }

    if selected.len() < top_k {
        for chunk in &candidates {
            if selected.len() >= top_k {
                break;
            }
            if selected_ids.contains(&chunk.id) {
                continue;
            }
            let count = per_source.entry(chunk.source_key.clone()).or_insert(0);
            if *count < per_source_cap {
                *count += 1;
                selected_ids.insert(chunk.id);
                selected.push(chunk.clone());
            }
        }
    }

    selected.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    selected
}
