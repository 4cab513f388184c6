//! # tilth-search
//!
//! Hybrid retrieval engine for the tilth knowledge base: blends
//! vector-similarity search over the pre-embedded corpus with keyword
//! relevance scoring over transcript chunks, then selects a diverse,
//! source-balanced top-K result set.

pub mod chunker;
pub mod hybrid;
pub mod relevance;

// Re-export core types
pub use tilth_core::*;

pub use chunker::{chunk_text, ChunkerConfig};
pub use hybrid::{select_diverse, HybridConfig, HybridRetriever};
pub use relevance::relevance_score;
