//! In-memory vector index.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use tilth_core::{Chunk, Error, Result, VectorIndex};

/// Brute-force cosine top-K over embedded chunks.
///
/// Reference implementation of the vector index collaborator; adequate for
/// the pre-embedded corpus sizes this pipeline pairs with.
pub struct MemoryVectorIndex {
    chunks: RwLock<Vec<Chunk>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
        }
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}

impl Default for MemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn add(&self, chunk: Chunk) -> Result<()> {
        let embedding = match &chunk.embedding {
            Some(e) if !e.is_empty() => e,
            _ => {
                return Err(Error::InvalidInput(
                    "Chunk must carry a non-empty embedding to be indexed".to_string(),
                ))
            }
        };
        trace!(source_key = %chunk.source_key, dim = embedding.len(), "Indexing chunk");
        self.chunks.write().await.push(chunk);
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<Chunk>> {
        if query.is_empty() {
            return Err(Error::InvalidInput("Empty query vector".to_string()));
        }

        let chunks = self.chunks.read().await;
        let mut scored: Vec<Chunk> = chunks
            .iter()
            .filter_map(|c| {
                let embedding = c.embedding.as_ref()?;
                if embedding.len() != query.len() {
                    return None;
                }
                // Negative cosine clamps to zero: scores stay in [0, 1].
                let score = Self::cosine(query, embedding).clamp(0.0, 1.0);
                let mut hit = c.clone();
                hit.score = score;
                hit.embedding = None;
                Some(hit)
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.chunks.read().await.len())
    }
}
