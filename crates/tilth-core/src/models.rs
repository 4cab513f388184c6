//! Core data models shared across the tilth crates.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a job in the scheduler queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    /// Terminal states: the job will never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Stable lowercase name, used as a map key in status breakdowns.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }
}

/// Result data recorded on a successfully completed job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    /// Transcript length in characters.
    pub output_size: usize,
    /// Wall-clock processing duration.
    pub processing_duration_ms: u64,
}

/// One scheduled unit of acquire-transcribe-store work for a single media item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Stable key of the media item this job processes.
    pub subject_key: String,
    /// Provider metadata for the item.
    pub payload: MediaItem,
    pub status: JobStatus,
    /// Higher runs sooner; ties break FIFO on `created_at`.
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Not dispatched before this instant (batch stagger, retry backoff).
    pub earliest_start: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<JobOutput>,
}

impl Job {
    /// Create a freshly queued job for a media item.
    pub fn new(item: MediaItem, priority: i32, max_attempts: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_key: item.key.clone(),
            payload: item,
            status: JobStatus::Queued,
            priority,
            attempts: 0,
            max_attempts,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            earliest_start: None,
            last_error: None,
            result: None,
        }
    }

    /// Whether the dispatcher may pick this job up right now.
    pub fn is_dispatchable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued
            && self.earliest_start.map(|t| t <= now).unwrap_or(true)
    }
}

// =============================================================================
// MEDIA TYPES
// =============================================================================

/// Descriptive metadata for one ingestible item, as returned by the
/// media metadata provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Stable external identifier (e.g. video id).
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    pub publish_date: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub view_count: Option<u64>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub channel_title: Option<String>,
}

/// Processing state of a media entry in the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Downloading,
    Transcribing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Downloading => "downloading",
            ProcessingStatus::Transcribing => "transcribing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

/// A timestamped span of transcribed audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSegment {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

/// Transcription metadata stored alongside a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionMeta {
    /// Detected language (ISO 639-1 code).
    pub language: Option<String>,
    /// Total audio duration in seconds.
    pub duration_secs: f64,
    /// Mean segment confidence, when the backend reports one.
    pub confidence: Option<f64>,
    /// Timestamped segments on one continuous timeline.
    pub segments: Vec<MediaSegment>,
}

/// Durable record of one media item's metadata and transcription result.
///
/// Owned by the scheduler during processing and by the store thereafter.
/// Never deleted by the pipeline; updates supersede via `version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaEntry {
    pub key: String,
    pub title: String,
    pub source_url: String,
    pub duration_secs: Option<f64>,
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub transcript: String,
    pub transcription: Option<TranscriptionMeta>,
    /// Keywords derived from the transcript at ingest time.
    #[serde(default)]
    pub keywords: Vec<String>,
    pub processing_status: ProcessingStatus,
    #[serde(default)]
    pub processing_errors: Vec<String>,
    /// Monotonically incremented by the store on every update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaEntry {
    /// Initial `pending` entry for an item about to be processed.
    pub fn pending(item: &MediaItem) -> Self {
        let now = Utc::now();
        Self {
            key: item.key.clone(),
            title: item.title.clone(),
            source_url: item.url.clone(),
            duration_secs: item.duration_secs,
            publish_date: item.publish_date,
            tags: item.tags.clone(),
            transcript: String::new(),
            transcription: None,
            keywords: Vec::new(),
            processing_status: ProcessingStatus::Pending,
            processing_errors: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// RETRIEVAL TYPES
// =============================================================================

/// Origin corpus of a retrieval candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    /// Pre-embedded text corpus served by the vector index.
    EmbeddedText,
    /// Transcript corpus chunked and scored at query time.
    Transcript,
}

/// Provenance metadata carried on a retrieval chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: Option<String>,
    pub source_url: Option<String>,
    /// Offset into the source media, when known.
    pub timestamp_secs: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A bounded span of text plus score and provenance, produced transiently
/// for a single retrieval query. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub content: String,
    /// Groups chunks by originating document/video for diversity control.
    pub source_key: String,
    pub source_type: SourceType,
    /// Similarity or relevance, normalized to [0, 1].
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub metadata: ChunkMetadata,
}

/// Immutable ranked snapshot returned to the retrieval caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunks: Vec<Chunk>,
    pub sources: HashSet<String>,
    pub total_candidates: usize,
}

impl RetrievalResult {
    /// Empty result (all sub-sources failed or matched nothing).
    pub fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            sources: HashSet::new(),
            total_candidates: 0,
        }
    }
}

// =============================================================================
// BATCH / SCHEDULER REPORTING
// =============================================================================

/// One item's failure within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchError {
    pub subject_key: String,
    /// Stage the item was in when it failed.
    pub stage: ProcessingStatus,
    pub message: String,
}

/// Per-batch outcome summary; independent per item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    pub errors: Vec<BatchError>,
}

/// Point-in-time scheduler summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub total_jobs: usize,
    pub queued: usize,
    pub active: usize,
    /// Job counts keyed by status name.
    pub by_status: HashMap<String, usize>,
    /// Seconds until the next queued job becomes dispatchable, when known.
    pub eta_next_secs: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_item(key: &str) -> MediaItem {
        MediaItem {
            key: key.to_string(),
            title: format!("Video {}", key),
            description: "Cover crops and soil health".to_string(),
            url: format!("https://video.example/{}", key),
            publish_date: None,
            duration_secs: Some(1800.0),
            view_count: Some(1234),
            thumbnail: None,
            tags: vec!["soil".to_string()],
            channel_title: Some("Field School".to_string()),
        }
    }

    #[test]
    fn test_job_new_starts_queued() {
        let job = Job::new(test_item("v1"), 5, 3);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.subject_key, "v1");
        assert_eq!(job.priority, 5);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert!(job.started_at.is_none());
        assert!(job.result.is_none());
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_job_dispatchable_respects_earliest_start() {
        let now = Utc::now();
        let mut job = Job::new(test_item("v1"), 0, 3);
        assert!(job.is_dispatchable(now));

        job.earliest_start = Some(now + chrono::Duration::seconds(60));
        assert!(!job.is_dispatchable(now));

        job.earliest_start = Some(now - chrono::Duration::seconds(1));
        assert!(job.is_dispatchable(now));

        job.status = JobStatus::Processing;
        assert!(!job.is_dispatchable(now));
    }

    #[test]
    fn test_media_entry_pending_copies_item_metadata() {
        let item = test_item("v2");
        let entry = MediaEntry::pending(&item);
        assert_eq!(entry.key, "v2");
        assert_eq!(entry.title, item.title);
        assert_eq!(entry.source_url, item.url);
        assert_eq!(entry.processing_status, ProcessingStatus::Pending);
        assert_eq!(entry.version, 0);
        assert!(entry.transcript.is_empty());
        assert!(entry.transcription.is_none());
    }

    #[test]
    fn test_job_status_serde_lowercase() {
        let json = serde_json::to_string(&JobStatus::Retrying).unwrap();
        assert_eq!(json, r#""retrying""#);
        let back: JobStatus = serde_json::from_str(r#""queued""#).unwrap();
        assert_eq!(back, JobStatus::Queued);
    }

    #[test]
    fn test_source_type_serde_kebab_case() {
        let json = serde_json::to_string(&SourceType::EmbeddedText).unwrap();
        assert_eq!(json, r#""embedded-text""#);
        let json = serde_json::to_string(&SourceType::Transcript).unwrap();
        assert_eq!(json, r#""transcript""#);
    }

    #[test]
    fn test_retrieval_result_empty() {
        let result = RetrievalResult::empty();
        assert!(result.chunks.is_empty());
        assert!(result.sources.is_empty());
        assert_eq!(result.total_candidates, 0);
    }

    #[test]
    fn test_media_entry_roundtrip_serde() {
        let mut entry = MediaEntry::pending(&test_item("v3"));
        entry.transcript = "rotating beds keeps pests guessing".to_string();
        entry.transcription = Some(TranscriptionMeta {
            language: Some("en".to_string()),
            duration_secs: 12.5,
            confidence: Some(0.92),
            segments: vec![MediaSegment {
                start_secs: 0.0,
                end_secs: 12.5,
                text: "rotating beds keeps pests guessing".to_string(),
            }],
        });

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["processing_status"], "pending");
        let back: MediaEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.transcript, entry.transcript);
        assert_eq!(back.transcription, entry.transcription);
    }
}
