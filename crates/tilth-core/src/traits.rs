//! Collaborator traits for the tilth pipeline.
//!
//! Every external system the pipeline talks to sits behind one of these
//! traits: the persistent document store, the media metadata provider, the
//! acquisition tool, the embedding service, and the vector index. Services
//! are constructed explicitly and injected by handle, never ambient.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chunk, MediaEntry, MediaItem, ProcessingStatus};

// =============================================================================
// DOCUMENT STORE
// =============================================================================

/// Keyed persistence for media entries, plus a ranked text search and a
/// secondary index by processing status.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Insert or replace the entry for `entry.key`, bumping `version` and
    /// `updated_at`. Returns the stored entry.
    async fn upsert(&self, entry: MediaEntry) -> Result<MediaEntry>;

    /// Fetch an entry by key.
    async fn get(&self, key: &str) -> Result<Option<MediaEntry>>;

    /// Transition an existing entry's processing status (version bump).
    async fn set_status(&self, key: &str, status: ProcessingStatus) -> Result<()>;

    /// Append a processing error and mark the entry `Failed` (version bump).
    /// Not fatal: a retried job overwrites the status on its next attempt.
    async fn record_error(&self, key: &str, message: &str) -> Result<()>;

    /// Ranked keyword search over title, transcript, and tags.
    async fn search_text(&self, query: &str, limit: usize) -> Result<Vec<MediaEntry>>;

    /// Entries currently in the given processing status.
    async fn list_by_status(&self, status: ProcessingStatus) -> Result<Vec<MediaEntry>>;

    /// Total entry count.
    async fn count(&self) -> Result<usize>;
}

// =============================================================================
// MEDIA ACQUISITION
// =============================================================================

/// Lists ingestible items for a channel/collection identifier.
///
/// Any failure here is fatal for the ingestion run that requested it.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn list_items(&self, channel: &str, limit: Option<usize>) -> Result<Vec<MediaItem>>;
}

/// Downloads raw audio for a single media item.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str, key: &str) -> Result<DownloadedMedia>;
}

/// A downloaded media file with scoped cleanup.
///
/// The file is removed when this value drops, on every exit path: the
/// acquisition tool's `cleanup()` contract expressed as an RAII guard.
#[derive(Debug)]
pub struct DownloadedMedia {
    path: PathBuf,
    pub title: Option<String>,
    pub duration_secs: Option<f64>,
    remove_on_drop: bool,
}

impl DownloadedMedia {
    /// Wrap a downloaded file; it is deleted when the guard drops.
    pub fn new(path: PathBuf, title: Option<String>, duration_secs: Option<f64>) -> Self {
        Self {
            path,
            title,
            duration_secs,
            remove_on_drop: true,
        }
    }

    /// Wrap a caller-owned file that must outlive the guard (tests,
    /// pre-provisioned fixtures).
    pub fn borrowed(path: PathBuf, title: Option<String>, duration_secs: Option<f64>) -> Self {
        Self {
            path,
            title,
            duration_secs,
            remove_on_drop: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DownloadedMedia {
    fn drop(&mut self) {
        if self.remove_on_drop {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Failed to remove downloaded media file"
                    );
                }
            }
        }
    }
}

// =============================================================================
// EMBEDDING / VECTOR INDEX
// =============================================================================

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts, one vector per input.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Model name being used.
    fn model_name(&self) -> &str;
}

/// Nearest-neighbor search over the pre-embedded text corpus.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Add an embedded chunk to the index.
    async fn add(&self, chunk: Chunk) -> Result<()>;

    /// Return up to `limit` nearest neighbors with similarity scores
    /// normalized to [0, 1].
    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<Chunk>>;

    /// Number of indexed chunks.
    async fn len(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downloaded_media_removes_file_on_drop() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("tilth-test-{}.bin", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"audio").unwrap();
        assert!(path.exists());

        {
            let media = DownloadedMedia::new(path.clone(), None, None);
            assert_eq!(media.path(), path.as_path());
        }

        assert!(!path.exists());
    }

    #[test]
    fn test_downloaded_media_borrowed_keeps_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("tilth-test-{}.bin", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"audio").unwrap();

        {
            let _media = DownloadedMedia::borrowed(path.clone(), None, None);
        }

        assert!(path.exists());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_downloaded_media_drop_missing_file_is_quiet() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("tilth-test-{}.bin", uuid::Uuid::new_v4()));
        // File never created; drop must not panic.
        let media = DownloadedMedia::new(path, Some("gone".to_string()), Some(1.0));
        drop(media);
    }
}
