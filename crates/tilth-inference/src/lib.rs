//! # tilth-inference
//!
//! External AI collaborators for the tilth pipeline: the transcription
//! service (OpenAI-compatible Whisper server) and the embedding service
//! (Ollama). Both sit behind traits so the pipeline and tests can inject
//! alternatives.

pub mod embedding;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod transcription;

pub use embedding::OllamaEmbeddingBackend;
pub use transcription::{
    TranscriptionBackend, TranscriptionOptions, TranscriptionResult, WhisperBackend,
};
