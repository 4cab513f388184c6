//! Centralized default constants for the tilth pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! All crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area; document the rationale when adding.

// =============================================================================
// JOB SCHEDULING
// =============================================================================

/// Default maximum attempts per job (first try + retries).
pub const JOB_MAX_ATTEMPTS: i32 = 3;

/// Default maximum concurrently processing jobs.
///
/// Deliberately small: the external transcription service is rate limited
/// and correctness must not depend on a larger value.
pub const JOB_MAX_CONCURRENT: usize = 2;

/// Dispatcher tick interval in milliseconds.
pub const DISPATCH_TICK_MS: u64 = 1_000;

/// Base delay for retry backoff (doubled per attempt) in milliseconds.
pub const RETRY_DELAY_BASE_MS: u64 = 5_000;

/// Maximum random jitter added to a retry delay, milliseconds.
pub const RETRY_JITTER_MS: u64 = 1_000;

/// Base offset applied to every batch job's first attempt, milliseconds.
pub const BATCH_STAGGER_BASE_MS: u64 = 2_000;

/// Additional per-index offset within a batch, milliseconds.
pub const BATCH_STAGGER_STEP_MS: u64 = 1_000;

/// Minimum elapsed time between job start and the transcription call,
/// milliseconds. Pads short downloads so back-to-back jobs do not burst
/// the external API.
pub const MIN_STAGE_DELAY_MS: u64 = 3_000;

/// Default scheduler event bus broadcast capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// TRANSCRIPTION
// =============================================================================

/// Payload ceiling of the external transcription service, bytes (25 MB).
pub const TRANSCRIBE_MAX_BYTES: u64 = 25 * 1024 * 1024;

/// Fixed duration of split audio segments, seconds.
pub const SPLIT_SEGMENT_SECS: u32 = 240;

/// Stagger between successive segment transcription starts, milliseconds.
pub const SEGMENT_STAGGER_MS: u64 = 500;

/// Retries per transcription call (beyond the first attempt).
pub const TRANSCRIBE_MAX_RETRIES: u32 = 3;

/// Base backoff delay for transcription retries, milliseconds.
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Maximum random jitter added to a backoff delay, milliseconds.
pub const BACKOFF_JITTER_MS: u64 = 1_000;

/// Timeout for the external audio splitting tool, seconds.
pub const SPLIT_CMD_TIMEOUT_SECS: u64 = 120;

/// Timeout for the external media acquisition tool, seconds.
pub const FETCH_CMD_TIMEOUT_SECS: u64 = 600;

/// Timeout for one transcription HTTP request, seconds.
pub const TRANSCRIBE_TIMEOUT_SECS: u64 = 300;

/// Default transcription model name (OpenAI-compatible Whisper server).
pub const DEFAULT_WHISPER_MODEL: &str = "whisper-1";

// =============================================================================
// CHUNKING
// =============================================================================

/// Target characters per transcript chunk.
pub const CHUNK_TARGET_CHARS: usize = 500;

/// Overlap characters between adjacent chunks for context preservation.
pub const CHUNK_OVERLAP_CHARS: usize = 50;

/// Chunks shorter than this are merged into their neighbor.
pub const CHUNK_MIN_CHARS: usize = 50;

// =============================================================================
// RETRIEVAL
// =============================================================================

/// Minimum relevance score for a transcript chunk to remain a candidate.
pub const MIN_RELEVANCE_SCORE: f32 = 0.1;

/// Top scoring chunks retained per media item before the cross-item merge.
pub const PER_ITEM_CHUNK_CAP: usize = 2;

/// Second-pass per-source cap is `top_k / PER_SOURCE_CAP_DIVISOR`.
pub const PER_SOURCE_CAP_DIVISOR: usize = 3;

/// Embedded-corpus branch requests `top_k / EMBEDDED_SHARE_DIVISOR`
/// candidates. That corpus is smaller and lower priority in the combined
/// system.
pub const EMBEDDED_SHARE_DIVISOR: usize = 4;

/// Transcript branch considers up to `top_k * TRANSCRIPT_CANDIDATE_FACTOR`
/// text-matched media items.
pub const TRANSCRIPT_CANDIDATE_FACTOR: usize = 2;

// =============================================================================
// RELEVANCE SCORING
// =============================================================================

/// Query tokens shorter than this are discarded.
pub const MIN_QUERY_TOKEN_LEN: usize = 3;

/// Bonus per matched token when more than one query token matched.
pub const MULTI_MATCH_BONUS: f32 = 0.5;

/// Score is normalized by `max(text_tokens / NORM_TOKEN_BASE, 1)`.
pub const NORM_TOKEN_BASE: usize = 50;

// =============================================================================
// KEYWORDS
// =============================================================================

/// Keywords derived from a transcript at ingest time.
pub const KEYWORD_COUNT: usize = 12;

/// Tokens shorter than this never become keywords.
pub const KEYWORD_MIN_LEN: usize = 4;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name (Ollama).
pub const EMBED_MODEL: &str = "nomic-embed-text";

/// Default embedding vector dimension for nomic-embed-text.
pub const EMBED_DIMENSION: usize = 768;

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Timeout for embedding requests in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// ENVIRONMENT VARIABLES
// =============================================================================

/// Whisper server base URL.
pub const ENV_WHISPER_BASE_URL: &str = "WHISPER_BASE_URL";

/// Whisper model override.
pub const ENV_WHISPER_MODEL: &str = "WHISPER_MODEL";

/// Ollama base URL override.
pub const ENV_OLLAMA_URL: &str = "OLLAMA_URL";

/// Scheduler: max concurrent jobs.
pub const ENV_JOB_MAX_CONCURRENT: &str = "TILTH_JOB_MAX_CONCURRENT";

/// Scheduler: dispatch tick interval (ms).
pub const ENV_JOB_TICK_MS: &str = "TILTH_JOB_TICK_MS";

/// Scheduler: max attempts per job.
pub const ENV_JOB_MAX_ATTEMPTS: &str = "TILTH_JOB_MAX_ATTEMPTS";

/// Scheduler: skip items with a completed store entry.
pub const ENV_JOB_SKIP_EXISTING: &str = "TILTH_JOB_SKIP_EXISTING";

/// Scheduler: off-peak window start hour (0-23, local time).
pub const ENV_OFFPEAK_START: &str = "TILTH_OFFPEAK_START_HOUR";

/// Scheduler: off-peak window end hour (0-23, local time).
pub const ENV_OFFPEAK_END: &str = "TILTH_OFFPEAK_END_HOUR";
