//! # tilth-core
//!
//! Core types, traits, and abstractions for the tilth pipeline.
//!
//! This crate provides the foundational data structures, the error
//! taxonomy with retry classification, and the collaborator trait
//! definitions that the other tilth crates depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{classify_message, Error, Result};
pub use models::*;
pub use traits::*;
