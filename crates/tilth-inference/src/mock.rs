//! Mock backends for deterministic testing.
//!
//! Gated behind the `mock` feature. Both mocks keep a call log for
//! assertions and can be scripted to fail, so retry and degradation paths
//! can be exercised without a live service.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tilth_core::models::MediaSegment;
use tilth_core::{EmbeddingBackend, Error, Result};

use crate::transcription::{TranscriptionBackend, TranscriptionOptions, TranscriptionResult};

// =============================================================================
// TRANSCRIPTION
// =============================================================================

/// Scripted error for a mock call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Retryable failure (maps to `Error::Transcription`).
    Transient,
    /// Permanent failure (maps to `Error::Unauthorized`).
    Permanent,
}

struct MockTranscriptionState {
    calls: usize,
    scripted_failures: VecDeque<MockFailure>,
}

/// Mock transcription backend with a configurable payload ceiling and a
/// scripted failure queue.
#[derive(Clone)]
pub struct MockTranscriptionBackend {
    state: Arc<Mutex<MockTranscriptionState>>,
    result: Arc<TranscriptionResult>,
    max_payload_bytes: u64,
    latency_ms: u64,
}

impl MockTranscriptionBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockTranscriptionState {
                calls: 0,
                scripted_failures: VecDeque::new(),
            })),
            result: Arc::new(TranscriptionResult {
                text: "mock transcript".to_string(),
                language: Some("en".to_string()),
                duration_secs: 10.0,
                confidence: Some(0.9),
                segments: vec![MediaSegment {
                    start_secs: 0.0,
                    end_secs: 10.0,
                    text: "mock transcript".to_string(),
                }],
            }),
            max_payload_bytes: u64::MAX,
            latency_ms: 0,
        }
    }

    /// Fixed result returned by every successful call.
    pub fn with_result(mut self, result: TranscriptionResult) -> Self {
        self.result = Arc::new(result);
        self
    }

    /// Payload ceiling reported to the chunked adapter.
    pub fn with_max_payload_bytes(mut self, bytes: u64) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// Simulated latency per call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Queue `n` failures to be emitted before calls start succeeding.
    pub fn fail_next(self, n: usize, kind: MockFailure) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for _ in 0..n {
                state.scripted_failures.push_back(kind);
            }
        }
        self
    }

    /// Number of transcribe calls made so far.
    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls
    }
}

impl Default for MockTranscriptionBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptionBackend for MockTranscriptionBackend {
    async fn transcribe(
        &self,
        _audio_data: &[u8],
        _mime_type: &str,
        _options: &TranscriptionOptions,
    ) -> Result<TranscriptionResult> {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }

        let failure = {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            state.scripted_failures.pop_front()
        };

        match failure {
            Some(MockFailure::Transient) => {
                Err(Error::Transcription("simulated transient failure".into()))
            }
            Some(MockFailure::Permanent) => {
                Err(Error::Unauthorized("simulated permanent failure".into()))
            }
            None => Ok((*self.result).clone()),
        }
    }

    fn max_payload_bytes(&self) -> u64 {
        self.max_payload_bytes
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn model_name(&self) -> &str {
        "mock-whisper"
    }
}

// =============================================================================
// EMBEDDING
// =============================================================================

/// Deterministic embedding generator: same text, same vector.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Generate a unit-norm pseudo-embedding seeded by the text bytes.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut seed: u64 = 1469598103934665603;
        for b in text.bytes() {
            seed ^= b as u64;
            seed = seed.wrapping_mul(1099511628211);
        }

        let mut values = Vec::with_capacity(dimension);
        let mut state = seed;
        for _ in 0..dimension {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            // Top 32 bits, mapped onto [-1, 1].
            let v = ((state >> 32) as u32 as f64 / u32::MAX as f64) * 2.0 - 1.0;
            values.push(v as f32);
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }
}

/// Mock embedding backend producing deterministic vectors.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    dimension: usize,
    calls: Arc<Mutex<usize>>,
    fail_all: bool,
}

impl MockEmbeddingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: Arc::new(Mutex::new(0)),
            fail_all: false,
        }
    }

    /// Every call fails (degradation tests).
    pub fn failing(dimension: usize) -> Self {
        Self {
            dimension,
            calls: Arc::new(Mutex::new(0)),
            fail_all: true,
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        *self.calls.lock().unwrap() += 1;
        if self.fail_all {
            return Err(Error::Embedding("simulated embedding failure".into()));
        }
        Ok(texts
            .iter()
            .map(|t| MockEmbeddingGenerator::generate(t, self.dimension))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}
