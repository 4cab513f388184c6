//! In-memory media store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use tilth_core::{Error, MediaEntry, MediaStore, ProcessingStatus, Result};

struct MediaState {
    entries: HashMap<String, MediaEntry>,
    /// Secondary index: processing status → entry keys.
    by_status: HashMap<ProcessingStatus, HashSet<String>>,
}

impl MediaState {
    fn reindex(&mut self, key: &str, old: Option<ProcessingStatus>, new: ProcessingStatus) {
        if let Some(old) = old {
            if let Some(keys) = self.by_status.get_mut(&old) {
                keys.remove(key);
            }
        }
        self.by_status
            .entry(new)
            .or_default()
            .insert(key.to_string());
    }
}

/// In-process [`MediaStore`] keyed by media key.
///
/// Stands in for the persistent document store collaborator: keyed upserts
/// with a monotonic version, a status secondary index, and a ranked text
/// search over title, transcript, and tags.
pub struct MemoryMediaStore {
    state: RwLock<MediaState>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MediaState {
                entries: HashMap::new(),
                by_status: HashMap::new(),
            }),
        }
    }

    /// Rank an entry against query tokens: one point per query token
    /// appearing in the entry's searchable text.
    fn text_rank(entry: &MediaEntry, tokens: &[String]) -> usize {
        let haystack = format!(
            "{} {} {}",
            entry.title.to_lowercase(),
            entry.transcript.to_lowercase(),
            entry.tags.join(" ").to_lowercase()
        );
        tokens.iter().filter(|t| haystack.contains(t.as_str())).count()
    }
}

impl Default for MemoryMediaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn upsert(&self, mut entry: MediaEntry) -> Result<MediaEntry> {
        let mut state = self.state.write().await;
        let key = entry.key.clone();

        let old_status = match state.entries.get(&key) {
            Some(existing) => {
                entry.version = existing.version + 1;
                entry.created_at = existing.created_at;
                Some(existing.processing_status)
            }
            None => {
                entry.version = 1;
                None
            }
        };
        entry.updated_at = Utc::now();

        state.reindex(&key, old_status, entry.processing_status);
        state.entries.insert(key.clone(), entry.clone());

        debug!(
            media_key = %key,
            version = entry.version,
            status = entry.processing_status.as_str(),
            "Upserted media entry"
        );
        Ok(entry)
    }

    async fn get(&self, key: &str) -> Result<Option<MediaEntry>> {
        let state = self.state.read().await;
        Ok(state.entries.get(key).cloned())
    }

    async fn set_status(&self, key: &str, status: ProcessingStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let old_status = match state.entries.get_mut(key) {
            Some(entry) => {
                let old = entry.processing_status;
                entry.processing_status = status;
                entry.version += 1;
                entry.updated_at = Utc::now();
                old
            }
            None => return Err(Error::Store(format!("No entry for key: {}", key))),
        };
        state.reindex(key, Some(old_status), status);
        Ok(())
    }

    async fn record_error(&self, key: &str, message: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let old_status = match state.entries.get_mut(key) {
            Some(entry) => {
                let old = entry.processing_status;
                entry.processing_errors.push(message.to_string());
                entry.processing_status = ProcessingStatus::Failed;
                entry.version += 1;
                entry.updated_at = Utc::now();
                old
            }
            None => return Err(Error::Store(format!("No entry for key: {}", key))),
        };
        state.reindex(key, Some(old_status), ProcessingStatus::Failed);
        Ok(())
    }

    async fn search_text(&self, query: &str, limit: usize) -> Result<Vec<MediaEntry>> {
        let tokens: Vec<String> = query
            .split_whitespace()
            .filter(|t| t.len() >= tilth_core::defaults::MIN_QUERY_TOKEN_LEN)
            .map(|t| t.to_lowercase())
            .collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        let mut ranked: Vec<(usize, &MediaEntry)> = state
            .entries
            .values()
            .map(|e| (Self::text_rank(e, &tokens), e))
            .filter(|(rank, _)| *rank > 0)
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.key.cmp(&b.1.key)));

        Ok(ranked.into_iter().take(limit).map(|(_, e)| e.clone()).collect())
    }

    async fn list_by_status(&self, status: ProcessingStatus) -> Result<Vec<MediaEntry>> {
        let state = self.state.read().await;
        let keys = match state.by_status.get(&status) {
            Some(keys) => keys,
            None => return Ok(Vec::new()),
        };
        Ok(keys
            .iter()
            .filter_map(|k| state.entries.get(k).cloned())
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state.entries.len())
    }
}
