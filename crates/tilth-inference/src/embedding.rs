//! Ollama embedding backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tilth_core::{defaults, EmbeddingBackend, Error, Result};

/// Embedding backend talking to an Ollama server.
pub struct OllamaEmbeddingBackend {
    base_url: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl OllamaEmbeddingBackend {
    pub fn new(base_url: String, model: String, dimension: usize) -> Self {
        Self {
            base_url,
            model,
            dimension,
            client: reqwest::Client::new(),
            timeout_secs: defaults::EMBED_TIMEOUT_SECS,
        }
    }

    /// Create with the stock nomic-embed-text configuration, honoring
    /// OLLAMA_URL when set.
    pub fn from_env() -> Self {
        let base_url = std::env::var(defaults::ENV_OLLAMA_URL)
            .unwrap_or_else(|_| defaults::OLLAMA_URL.to_string());
        Self::new(
            base_url,
            defaults::EMBED_MODEL.to_string(),
            defaults::EMBED_DIMENSION,
        )
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            result_count = result.embeddings.len(),
            duration_ms = elapsed,
            "Embedding complete"
        );
        if elapsed > 5000 {
            warn!(
                duration_ms = elapsed,
                input_count = texts.len(),
                slow = true,
                "Slow embedding operation"
            );
        }

        Ok(result.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
