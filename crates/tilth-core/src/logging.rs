//! Structured logging schema and field name constants for tilth.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (chunks, segments) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "jobs", "search", "store", "inference"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "scheduler", "chunked_transcriber", "hybrid_retriever"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "dispatch", "transcribe", "query", "upsert"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Stable key of the media item being operated on.
pub const MEDIA_KEY: &str = "media_key";

/// Pipeline stage of the current item.
pub const STAGE: &str = "stage";

/// Attempt number of the current job or call (1-based).
pub const ATTEMPT: &str = "attempt";

/// Retrieval query text.
pub const QUERY: &str = "query";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of chunks produced or scored.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of audio segments in a chunked transcription.
pub const SEGMENT_COUNT: &str = "segment_count";

/// Input payload size in bytes.
pub const PAYLOAD_BYTES: &str = "payload_bytes";

// ─── Retrieval fields ──────────────────────────────────────────────────────

/// Candidates from the embedded corpus before merging.
pub const EMBEDDED_HITS: &str = "embedded_hits";

/// Candidates from the transcript corpus before merging.
pub const TRANSCRIPT_HITS: &str = "transcript_hits";

/// Distinct sources represented in a result set.
pub const SOURCE_COUNT: &str = "source_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Whether a failure was classified permanent (never retried).
pub const PERMANENT: &str = "permanent";
