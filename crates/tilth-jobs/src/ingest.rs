//! Per-item ingest state machine: acquire, transcribe, store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use tilth_core::{
    defaults, Error, MediaEntry, MediaFetcher, MediaItem, MediaStore, ProcessingStatus,
    TranscriptionMeta,
};
use tilth_inference::TranscriptionOptions;

use crate::chunked::ChunkedTranscriber;

/// Error annotated with the pipeline stage the item was in.
#[derive(Debug)]
pub struct StageError {
    pub stage: ProcessingStatus,
    pub error: Error,
}

impl StageError {
    fn at(stage: ProcessingStatus) -> impl FnOnce(Error) -> StageError {
        move |error| StageError { stage, error }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.stage.as_str(), self.error)
    }
}

/// Outcome of running one item through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Entry was already completed; nothing was fetched or transcribed.
    Skipped { transcript_len: usize },
    /// Item was acquired, transcribed, and stored.
    Ingested { transcript_len: usize },
}

impl IngestOutcome {
    pub fn transcript_len(&self) -> usize {
        match self {
            IngestOutcome::Skipped { transcript_len }
            | IngestOutcome::Ingested { transcript_len } => *transcript_len,
        }
    }
}

/// Drives one media item through pending → downloading → transcribing →
/// completed, writing the media entry at each transition.
pub struct IngestPipeline {
    store: Arc<dyn MediaStore>,
    fetcher: Arc<dyn MediaFetcher>,
    transcriber: ChunkedTranscriber,
    skip_existing: bool,
    min_stage_delay: Duration,
    language: Option<String>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn MediaStore>,
        fetcher: Arc<dyn MediaFetcher>,
        transcriber: ChunkedTranscriber,
    ) -> Self {
        Self {
            store,
            fetcher,
            transcriber,
            skip_existing: true,
            min_stage_delay: Duration::from_millis(defaults::MIN_STAGE_DELAY_MS),
            language: None,
        }
    }

    /// Reprocess items even when a completed entry exists.
    pub fn with_skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    /// Floor on elapsed time between job start and the transcription call.
    pub fn with_min_stage_delay(mut self, delay: Duration) -> Self {
        self.min_stage_delay = delay;
        self
    }

    /// ISO 639-1 language hint forwarded to transcription.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Run one item through the state machine.
    ///
    /// The downloaded audio file is removed on every exit path; the entry's
    /// failure bookkeeping happens here so the scheduler only manages jobs.
    pub async fn run(&self, item: &MediaItem) -> std::result::Result<IngestOutcome, StageError> {
        let started = Instant::now();
        let key = item.key.as_str();

        if self.skip_existing {
            let existing = self
                .store
                .get(key)
                .await
                .map_err(StageError::at(ProcessingStatus::Pending))?;
            if let Some(entry) = existing {
                if entry.processing_status == ProcessingStatus::Completed {
                    info!(media_key = %key, "Entry already completed, skipping");
                    return Ok(IngestOutcome::Skipped {
                        transcript_len: entry.transcript.len(),
                    });
                }
            }
        }

        let result = self.acquire_and_transcribe(item, started).await;
        match result {
            Ok(outcome) => Ok(outcome),
            Err(stage_err) => {
                // Recorded on the entry, not fatal: a retry overwrites it.
                let _ = self
                    .store
                    .record_error(key, &stage_err.error.to_string())
                    .await;
                Err(stage_err)
            }
        }
    }

    async fn acquire_and_transcribe(
        &self,
        item: &MediaItem,
        started: Instant,
    ) -> std::result::Result<IngestOutcome, StageError> {
        let key = item.key.as_str();

        // Merge, not replace: earlier attempts' recorded failures stay on
        // the entry as retry history.
        let prior_errors = self
            .store
            .get(key)
            .await
            .ok()
            .flatten()
            .map(|e| e.processing_errors)
            .unwrap_or_default();

        let mut pending = MediaEntry::pending(item);
        pending.processing_errors = prior_errors.clone();
        self.store
            .upsert(pending)
            .await
            .map_err(StageError::at(ProcessingStatus::Pending))?;

        self.store
            .set_status(key, ProcessingStatus::Downloading)
            .await
            .map_err(StageError::at(ProcessingStatus::Downloading))?;
        debug!(media_key = %key, stage = "downloading", "Acquiring media");

        let media = self
            .fetcher
            .fetch(&item.url, key)
            .await
            .map_err(StageError::at(ProcessingStatus::Downloading))?;

        // Pad up to the configured floor before hitting the external API,
        // so a burst of fast downloads does not become a burst of
        // transcription calls.
        let elapsed = started.elapsed();
        if elapsed < self.min_stage_delay {
            sleep(self.min_stage_delay - elapsed).await;
        }

        self.store
            .set_status(key, ProcessingStatus::Transcribing)
            .await
            .map_err(StageError::at(ProcessingStatus::Transcribing))?;
        debug!(media_key = %key, stage = "transcribing", "Transcribing media");

        let options = TranscriptionOptions {
            language: self.language.clone(),
            // Title and tags bias the decoder toward domain vocabulary.
            prompt: Some(
                std::iter::once(item.title.as_str())
                    .chain(item.tags.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            temperature: None,
        };

        let transcription = self
            .transcriber
            .transcribe(media.path(), &options)
            .await
            .map_err(StageError::at(ProcessingStatus::Transcribing))?;

        let mut entry = MediaEntry::pending(item);
        entry.processing_errors = prior_errors;
        entry.transcript = transcription.text.clone();
        entry.keywords = derive_keywords(&transcription.text, defaults::KEYWORD_COUNT);
        entry.duration_secs = item.duration_secs.or(Some(transcription.duration_secs));
        entry.transcription = Some(TranscriptionMeta {
            language: transcription.language,
            duration_secs: transcription.duration_secs,
            confidence: transcription.confidence,
            segments: transcription.segments,
        });
        entry.processing_status = ProcessingStatus::Completed;

        let stored = self
            .store
            .upsert(entry)
            .await
            .map_err(StageError::at(ProcessingStatus::Completed))?;

        info!(
            media_key = %key,
            transcript_len = stored.transcript.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Media ingested"
        );
        Ok(IngestOutcome::Ingested {
            transcript_len: stored.transcript.len(),
        })
    }
}

/// Read the skip-existing override from the environment.
///
/// `TILTH_JOB_SKIP_EXISTING=false` (or `0`) forces reprocessing of items
/// that already have a completed entry.
pub fn skip_existing_from_env() -> bool {
    std::env::var(defaults::ENV_JOB_SKIP_EXISTING)
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true)
}

/// Most frequent substantive tokens of a transcript.
///
/// Ties break alphabetically so derivation is deterministic.
pub fn derive_keywords(text: &str, count: usize) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "about", "after", "again", "going", "have", "here", "just", "like", "more", "really",
        "some", "that", "them", "then", "there", "they", "thing", "things", "this", "very",
        "want", "well", "were", "what", "when", "where", "which", "will", "with", "your",
    ];

    let mut counts: HashMap<String, usize> = HashMap::new();
    for raw in text.split_whitespace() {
        let token: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if token.len() < defaults::KEYWORD_MIN_LEN || STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        *counts.entry(token).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(count).map(|(t, _)| t).collect()
}
