//! # tilth-jobs
//!
//! Background ingestion pipeline for tilth media.
//!
//! This crate provides:
//! - Priority-based job scheduling with bounded concurrency
//! - Retry with exponential backoff and permanence classification
//! - Off-peak gating and staggered batch starts
//! - Chunked transcription around the service payload ceiling
//! - External acquisition/splitting tool adapters
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tilth_jobs::{
//!     ChunkedTranscriber, FfmpegSplitter, IngestPipeline, IngestScheduler,
//!     SchedulerConfig, YtDlpFetcher,
//! };
//! use tilth_inference::WhisperBackend;
//! use tilth_store::MemoryMediaStore;
//!
//! let store = Arc::new(MemoryMediaStore::new());
//! let backend = Arc::new(WhisperBackend::from_env().expect("WHISPER_BASE_URL"));
//! let transcriber = ChunkedTranscriber::new(backend, Arc::new(FfmpegSplitter::new()));
//! let pipeline = Arc::new(IngestPipeline::new(store, Arc::new(YtDlpFetcher::new()), transcriber));
//!
//! let scheduler = IngestScheduler::new(pipeline, SchedulerConfig::from_env());
//! scheduler.enqueue_batch(items, 5);
//! scheduler.start().await;
//! ```

pub mod acquire;
pub mod chunked;
pub mod ingest;
pub mod scheduler;

// Re-export core types
pub use tilth_core::*;

pub use acquire::{AudioSplitter, FfmpegSplitter, YtDlpFetcher, YtDlpProvider};
pub use chunked::{retry_with_backoff, ChunkedConfig, ChunkedTranscriber};
pub use ingest::{
    derive_keywords, skip_existing_from_env, IngestOutcome, IngestPipeline, StageError,
};
pub use scheduler::{
    IngestScheduler, OffPeakWindow, SchedulerConfig, SchedulerEvent,
};

/// Default maximum attempts for jobs.
pub const DEFAULT_MAX_ATTEMPTS: i32 = tilth_core::defaults::JOB_MAX_ATTEMPTS;

/// Default dispatcher tick interval (milliseconds).
pub const DEFAULT_TICK_INTERVAL_MS: u64 = tilth_core::defaults::DISPATCH_TICK_MS;
