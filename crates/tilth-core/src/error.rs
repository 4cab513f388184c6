//! Error types for the tilth pipeline.

use thiserror::Error;

/// Result type alias using tilth's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tilth operations.
///
/// Variants are split into *permanent* and *transient* classes. Permanent
/// errors are never retried by the job scheduler or the transcription
/// backoff wrapper; everything else is retried until attempts run out.
/// See [`Error::is_permanent`].
#[derive(Error, Debug)]
pub enum Error {
    /// Authentication/authorization failed (permanent).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed or invalid input (permanent).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Payload exceeds the external service's size ceiling (permanent).
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Input format the external service cannot process (permanent).
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// HTTP/network request failed.
    #[error("Request error: {0}")]
    Request(String),

    /// Transcription service failed.
    #[error("Transcription error: {0}")]
    Transcription(String),

    /// Embedding generation failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Document store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Job queue error.
    #[error("Job error: {0}")]
    Job(String),

    /// Retrieval/search operation failed.
    #[error("Search error: {0}")]
    Search(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error should never be retried.
    ///
    /// The four permanent kinds short-circuit retry loops: re-sending the
    /// same request cannot succeed. Every other kind is treated as
    /// transient: the documented fallback is to retry, not to fail.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::Unauthorized(_)
                | Error::InvalidInput(_)
                | Error::PayloadTooLarge(_)
                | Error::UnsupportedInput(_)
        )
    }

    /// Whether a retry has any chance of succeeding.
    ///
    /// Combines the structured classification with the free-text heuristic,
    /// so errors that arrive as opaque messages from external tools are
    /// still caught when they carry a permanent-failure marker.
    pub fn is_retryable(&self) -> bool {
        !self.is_permanent() && !classify_message(&self.to_string())
    }
}

/// Classify a free-text error message as permanent.
///
/// Used at boundaries where all we have is the message text of an external
/// tool or service (stderr, unstructured API bodies). Unmatched messages are
/// retryable: the external service invents new failure strings faster than
/// any list can track, so the safe default is transient.
pub fn classify_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("unauthorized")
        || lower.contains("invalid")
        || lower.contains("too large")
        || lower.contains("unsupported")
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_unauthorized() {
        let err = Error::Unauthorized("bad token".to_string());
        assert_eq!(err.to_string(), "Unauthorized: bad token");
    }

    #[test]
    fn test_error_display_payload_too_large() {
        let err = Error::PayloadTooLarge("42MB > 25MB".to_string());
        assert_eq!(err.to_string(), "Payload too large: 42MB > 25MB");
    }

    #[test]
    fn test_error_display_transcription() {
        let err = Error::Transcription("server returned 500".to_string());
        assert_eq!(err.to_string(), "Transcription error: server returned 500");
    }

    #[test]
    fn test_permanent_kinds() {
        assert!(Error::Unauthorized("x".into()).is_permanent());
        assert!(Error::InvalidInput("x".into()).is_permanent());
        assert!(Error::PayloadTooLarge("x".into()).is_permanent());
        assert!(Error::UnsupportedInput("x".into()).is_permanent());
    }

    #[test]
    fn test_transient_kinds() {
        assert!(!Error::Request("timeout".into()).is_permanent());
        assert!(!Error::Transcription("rate limit".into()).is_permanent());
        assert!(!Error::Store("conflict".into()).is_permanent());
        assert!(!Error::Internal("oops".into()).is_permanent());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(!Error::Io(io).is_permanent());
    }

    #[test]
    fn test_classify_message_permanent_markers() {
        assert!(classify_message("401 Unauthorized"));
        assert!(classify_message("invalid file format"));
        assert!(classify_message("request body too large"));
        assert!(classify_message("Unsupported codec: opus"));
    }

    #[test]
    fn test_classify_message_case_insensitive() {
        assert!(classify_message("UNAUTHORIZED access"));
        assert!(classify_message("Payload Too Large"));
    }

    #[test]
    fn test_classify_message_unmatched_is_retryable() {
        assert!(!classify_message("connection reset by peer"));
        assert!(!classify_message("rate limit exceeded"));
        assert!(!classify_message("gateway timeout"));
        assert!(!classify_message(""));
    }

    #[test]
    fn test_is_retryable_structured() {
        assert!(!Error::Unauthorized("x".into()).is_retryable());
        assert!(Error::Request("timeout".into()).is_retryable());
    }

    #[test]
    fn test_is_retryable_message_heuristic() {
        // Transient variant, but the message carries a permanent marker.
        assert!(!Error::Internal("ffmpeg: Invalid data found".into()).is_retryable());
        assert!(!Error::Transcription("unsupported codec".into()).is_retryable());
        assert!(Error::Transcription("rate limit exceeded".into()).is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
