//! Chunked transcription adapter.
//!
//! Wraps a size-constrained transcription backend: inputs under the
//! service ceiling are transcribed directly, larger inputs are split into
//! fixed-duration segments, transcribed concurrently with staggered starts,
//! and stitched back onto one continuous timeline.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use tilth_core::models::MediaSegment;
use tilth_core::{defaults, Error, Result};
use tilth_inference::{TranscriptionBackend, TranscriptionOptions, TranscriptionResult};

use crate::acquire::AudioSplitter;

/// Tuning knobs for the chunked adapter.
#[derive(Debug, Clone)]
pub struct ChunkedConfig {
    /// Fixed duration of split segments, seconds.
    pub segment_secs: u32,
    /// Delay between successive segment starts (`index × stagger`).
    pub segment_stagger_ms: u64,
    /// Retries per transcription call, beyond the first attempt.
    pub max_retries: u32,
    /// Base backoff delay, doubled per attempt.
    pub backoff_base_ms: u64,
    /// Upper bound of the random jitter added to each backoff delay.
    pub backoff_jitter_ms: u64,
}

impl Default for ChunkedConfig {
    fn default() -> Self {
        Self {
            segment_secs: defaults::SPLIT_SEGMENT_SECS,
            segment_stagger_ms: defaults::SEGMENT_STAGGER_MS,
            max_retries: defaults::TRANSCRIBE_MAX_RETRIES,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            backoff_jitter_ms: defaults::BACKOFF_JITTER_MS,
        }
    }
}

/// Retry an async operation with exponential backoff and jitter.
///
/// Permanent errors are re-thrown immediately; after `max_retries`
/// additional attempts the last error propagates.
pub async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    base_delay_ms: u64,
    jitter_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                debug!(error = %e, permanent = true, "Not retrying");
                return Err(e);
            }
            Err(e) => {
                if attempt >= max_retries {
                    return Err(e);
                }
                let jitter = if jitter_ms > 0 {
                    rand::thread_rng().gen_range(0..=jitter_ms)
                } else {
                    0
                };
                let delay = base_delay_ms.saturating_mul(1 << attempt) + jitter;
                warn!(
                    attempt = attempt + 1,
                    delay_ms = delay,
                    error = %e,
                    "Transcription attempt failed, backing off"
                );
                sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
        }
    }
}

/// MIME type for the multipart upload, from the file extension.
fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "webm" => "audio/webm",
        "m4a" | "mp4" => "audio/m4a",
        _ => "application/octet-stream",
    }
}

/// Transcription adapter that hides the service payload ceiling.
pub struct ChunkedTranscriber {
    backend: Arc<dyn TranscriptionBackend>,
    splitter: Arc<dyn AudioSplitter>,
    config: ChunkedConfig,
}

impl ChunkedTranscriber {
    pub fn new(backend: Arc<dyn TranscriptionBackend>, splitter: Arc<dyn AudioSplitter>) -> Self {
        Self {
            backend,
            splitter,
            config: ChunkedConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ChunkedConfig) -> Self {
        self.config = config;
        self
    }

    /// Transcribe an audio file of any size.
    pub async fn transcribe(
        &self,
        path: &Path,
        options: &TranscriptionOptions,
    ) -> Result<TranscriptionResult> {
        let size = tokio::fs::metadata(path).await?.len();
        let ceiling = self.backend.max_payload_bytes();

        if size <= ceiling {
            debug!(
                payload_bytes = size,
                "Payload under service ceiling, transcribing directly"
            );
            return self.transcribe_file(path, options).await;
        }

        info!(
            payload_bytes = size,
            ceiling_bytes = ceiling,
            segment_secs = self.config.segment_secs,
            "Payload over service ceiling, splitting"
        );

        let segment_paths = self.splitter.split(path, self.config.segment_secs).await?;
        if segment_paths.is_empty() {
            return Err(Error::Transcription(
                "Audio splitter produced no segments".to_string(),
            ));
        }

        // Segment files are removed whether or not transcription succeeded.
        let outcome = self.transcribe_segments(&segment_paths, options).await;
        for p in &segment_paths {
            if let Err(e) = tokio::fs::remove_file(p).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %p.display(), error = %e, "Failed to remove segment file");
                }
            }
        }

        let parts = outcome?;
        let stitched = stitch(parts);
        info!(
            segment_count = segment_paths.len(),
            duration_secs = stitched.duration_secs,
            "Chunked transcription complete"
        );
        Ok(stitched)
    }

    /// Read and transcribe one file through the retry wrapper.
    async fn transcribe_file(
        &self,
        path: &Path,
        options: &TranscriptionOptions,
    ) -> Result<TranscriptionResult> {
        let data = tokio::fs::read(path).await?;
        let mime = mime_for_path(path);
        let backend = self.backend.clone();
        retry_with_backoff(
            self.config.max_retries,
            self.config.backoff_base_ms,
            self.config.backoff_jitter_ms,
            || {
                let backend = backend.clone();
                let data = data.clone();
                let options = options.clone();
                async move { backend.transcribe(&data, mime, &options).await }
            },
        )
        .await
    }

    /// Transcribe all segments concurrently, staggered by index.
    async fn transcribe_segments(
        &self,
        paths: &[PathBuf],
        options: &TranscriptionOptions,
    ) -> Result<Vec<(usize, TranscriptionResult)>> {
        let mut tasks: JoinSet<Result<(usize, TranscriptionResult)>> = JoinSet::new();

        for (index, path) in paths.iter().enumerate() {
            let backend = self.backend.clone();
            let options = options.clone();
            let path = path.clone();
            let config = self.config.clone();
            tasks.spawn(async move {
                sleep(Duration::from_millis(index as u64 * config.segment_stagger_ms)).await;
                let data = tokio::fs::read(&path).await?;
                let mime = mime_for_path(&path);
                let result = retry_with_backoff(
                    config.max_retries,
                    config.backoff_base_ms,
                    config.backoff_jitter_ms,
                    || {
                        let backend = backend.clone();
                        let data = data.clone();
                        let options = options.clone();
                        async move { backend.transcribe(&data, mime, &options).await }
                    },
                )
                .await?;
                Ok((index, result))
            });
        }

        let mut parts = Vec::with_capacity(paths.len());
        let mut first_error: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(part)) => parts.push(part),
                Ok(Err(e)) => {
                    warn!(error = %e, "Segment transcription failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(Error::Internal(format!(
                            "Segment task panicked: {}",
                            e
                        )));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(parts),
        }
    }
}

/// Combine per-segment results into one continuous transcription.
///
/// Segments are ordered by original index; each segment's timestamps shift
/// by the summed duration of the segments before it.
fn stitch(mut parts: Vec<(usize, TranscriptionResult)>) -> TranscriptionResult {
    parts.sort_by_key(|(index, _)| *index);

    let texts: Vec<&str> = parts.iter().map(|(_, p)| p.text.as_str()).collect();
    let text = texts.join(" ");

    let mut segments = Vec::new();
    let mut offset = 0.0;
    let mut duration_secs = 0.0;
    let mut confidences = Vec::new();
    let mut language = None;

    for (_, part) in &parts {
        for seg in &part.segments {
            segments.push(MediaSegment {
                start_secs: seg.start_secs + offset,
                end_secs: seg.end_secs + offset,
                text: seg.text.clone(),
            });
        }
        offset += part.duration_secs;
        duration_secs += part.duration_secs;
        if let Some(c) = part.confidence {
            confidences.push(c);
        }
        if language.is_none() {
            language = part.language.clone();
        }
    }

    let confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    };

    TranscriptionResult {
        text,
        language,
        duration_secs,
        confidence,
        segments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tilth_inference::mock::{MockFailure, MockTranscriptionBackend};

    fn part(index: usize, text: &str, duration: f64, confidence: Option<f64>) -> (usize, TranscriptionResult) {
        (
            index,
            TranscriptionResult {
                text: text.to_string(),
                language: Some("en".to_string()),
                duration_secs: duration,
                confidence,
                segments: vec![
                    MediaSegment {
                        start_secs: 0.0,
                        end_secs: duration / 2.0,
                        text: text.to_string(),
                    },
                    MediaSegment {
                        start_secs: duration / 2.0,
                        end_secs: duration,
                        text: text.to_string(),
                    },
                ],
            },
        )
    }

    /// Splitter that copies the input into `n` equal byte slices.
    ///
    /// Each instance uses its own file prefix so concurrently running tests
    /// can assert cleanup without seeing one another's in-flight files.
    struct FixedSplitter {
        n: usize,
        prefix: String,
        calls: AtomicUsize,
    }

    impl FixedSplitter {
        fn new(n: usize) -> Self {
            Self {
                n,
                prefix: format!("tilth-seg-{}", uuid::Uuid::new_v4()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AudioSplitter for FixedSplitter {
        async fn split(&self, input: &Path, _segment_secs: u32) -> Result<Vec<PathBuf>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let data = tokio::fs::read(input).await?;
            let dir = std::env::temp_dir();
            let chunk = data.len() / self.n;
            let mut paths = Vec::new();
            for i in 0..self.n {
                let path = dir.join(format!("{}-{:03}.mp3", self.prefix, i));
                let lo = i * chunk;
                let hi = if i + 1 == self.n { data.len() } else { lo + chunk };
                tokio::fs::write(&path, &data[lo..hi]).await?;
                paths.push(path);
            }
            Ok(paths)
        }
    }

    async fn assert_no_files_with_prefix(prefix: &str) {
        let mut entries = tokio::fs::read_dir(std::env::temp_dir()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().to_string();
            assert!(!name.starts_with(prefix), "leftover segment file: {}", name);
        }
    }

    async fn temp_audio(bytes: usize) -> PathBuf {
        let path = std::env::temp_dir().join(format!("tilth-audio-{}.mp3", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, vec![0u8; bytes]).await.unwrap();
        path
    }

    #[test]
    fn test_stitch_shifts_timestamps_monotonically() {
        let parts = vec![part(1, "second", 10.0, None), part(0, "first", 10.0, None)];
        let stitched = stitch(parts);

        assert_eq!(stitched.text, "first second");
        assert_eq!(stitched.duration_secs, 20.0);
        assert_eq!(stitched.segments.len(), 4);

        let mut last = 0.0;
        for seg in &stitched.segments {
            assert!(seg.start_secs >= last, "timestamps must not regress");
            last = seg.start_secs;
        }
        assert_eq!(stitched.segments[2].start_secs, 10.0);
        assert_eq!(stitched.segments[3].end_secs, 20.0);
    }

    #[test]
    fn test_stitch_averages_confidence() {
        let parts = vec![
            part(0, "a", 5.0, Some(0.8)),
            part(1, "b", 5.0, Some(0.6)),
            part(2, "c", 5.0, None),
        ];
        let stitched = stitch(parts);
        assert!((stitched.confidence.unwrap() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_stitch_join_overhead_is_segments_minus_one() {
        let parts = vec![
            part(0, "aaaa", 1.0, None),
            part(1, "bbbb", 1.0, None),
            part(2, "cccc", 1.0, None),
        ];
        let stitched = stitch(parts);
        assert_eq!(stitched.text.len(), 4 * 3 + 2);
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("a.mp3")), "audio/mpeg");
        assert_eq!(mime_for_path(Path::new("a.WAV")), "audio/wav");
        assert_eq!(mime_for_path(Path::new("a.m4a")), "audio/m4a");
        assert_eq!(mime_for_path(Path::new("a")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_retry_with_backoff_succeeds_after_transient() {
        let attempts = AtomicUsize::new(0);
        let result = retry_with_backoff(3, 1, 0, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Transcription("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_permanent_short_circuits() {
        let attempts = AtomicUsize::new(0);
        let err = retry_with_backoff(3, 1, 0, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::Unauthorized("no".into())) }
        })
        .await
        .unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_exhausts_attempts() {
        let attempts = AtomicUsize::new(0);
        let err = retry_with_backoff(2, 1, 0, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::Transcription("still down".into())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Transcription(_)));
        // First attempt + 2 retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_direct_path_under_ceiling_skips_splitter() {
        let backend = MockTranscriptionBackend::new().with_max_payload_bytes(1024);
        let splitter = Arc::new(FixedSplitter::new(2));
        let transcriber =
            ChunkedTranscriber::new(Arc::new(backend.clone()), splitter.clone()).with_config(
                ChunkedConfig {
                    segment_stagger_ms: 0,
                    backoff_base_ms: 1,
                    backoff_jitter_ms: 0,
                    ..ChunkedConfig::default()
                },
            );

        let path = temp_audio(100).await;
        let result = transcriber
            .transcribe(&path, &TranscriptionOptions::default())
            .await
            .unwrap();

        assert_eq!(result.text, "mock transcript");
        assert_eq!(backend.call_count(), 1);
        assert_eq!(splitter.calls.load(Ordering::SeqCst), 0);
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_payload_splits_and_stitches() {
        // 40 "MB" input with a 25 "MB" ceiling, scaled down 1000x.
        let backend = MockTranscriptionBackend::new().with_max_payload_bytes(25_000);
        let splitter = Arc::new(FixedSplitter::new(2));
        let transcriber =
            ChunkedTranscriber::new(Arc::new(backend.clone()), splitter.clone()).with_config(
                ChunkedConfig {
                    segment_stagger_ms: 0,
                    backoff_base_ms: 1,
                    backoff_jitter_ms: 0,
                    ..ChunkedConfig::default()
                },
            );

        let path = temp_audio(40_000).await;
        let result = transcriber
            .transcribe(&path, &TranscriptionOptions::default())
            .await
            .unwrap();

        assert_eq!(backend.call_count(), 2);
        // Two segment transcripts joined by one space.
        assert_eq!(result.text.len(), "mock transcript".len() * 2 + 1);
        assert_eq!(result.duration_secs, 20.0);
        // Second segment's timeline starts after the first.
        assert_eq!(result.segments.last().unwrap().end_secs, 20.0);
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_segment_files_cleaned_up_on_success() {
        let backend = MockTranscriptionBackend::new().with_max_payload_bytes(10);
        let splitter = Arc::new(FixedSplitter::new(3));
        let transcriber = ChunkedTranscriber::new(Arc::new(backend), splitter.clone())
            .with_config(ChunkedConfig {
                segment_stagger_ms: 0,
                backoff_base_ms: 1,
                backoff_jitter_ms: 0,
                ..ChunkedConfig::default()
            });

        let path = temp_audio(99).await;
        transcriber
            .transcribe(&path, &TranscriptionOptions::default())
            .await
            .unwrap();

        assert_no_files_with_prefix(&splitter.prefix).await;
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_segment_failure_cleans_up_and_propagates() {
        let backend = MockTranscriptionBackend::new()
            .with_max_payload_bytes(10)
            .fail_next(1, MockFailure::Permanent);
        let splitter = Arc::new(FixedSplitter::new(2));
        let transcriber = ChunkedTranscriber::new(Arc::new(backend), splitter.clone())
            .with_config(ChunkedConfig {
                segment_stagger_ms: 0,
                backoff_base_ms: 1,
                backoff_jitter_ms: 0,
                ..ChunkedConfig::default()
            });

        let path = temp_audio(50).await;
        let err = transcriber
            .transcribe(&path, &TranscriptionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_permanent());

        assert_no_files_with_prefix(&splitter.prefix).await;
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_segment_transient_failures_are_retried() {
        let backend = MockTranscriptionBackend::new()
            .with_max_payload_bytes(10)
            .fail_next(2, MockFailure::Transient);
        let splitter = Arc::new(FixedSplitter::new(2));
        let transcriber = ChunkedTranscriber::new(Arc::new(backend.clone()), splitter)
            .with_config(ChunkedConfig {
                segment_stagger_ms: 0,
                backoff_base_ms: 1,
                backoff_jitter_ms: 0,
                max_retries: 3,
                ..ChunkedConfig::default()
            });

        let path = temp_audio(50).await;
        let result = transcriber
            .transcribe(&path, &TranscriptionOptions::default())
            .await
            .unwrap();
        assert_eq!(result.segments.len(), 2);
        // 2 segments + 2 retried calls.
        assert_eq!(backend.call_count(), 4);
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
