//! Error types for the kai pipeline.

use thiserror::Error;

/// Result type alias using KaiError.
pub type Result<T> = std::result::Result<T, KaiError>;

/// Errors raised by collaborators and the service layer.
///
/// The retrieval core never returns these outward; it maps each one to a
/// deterministic fallback. They surface only from stores, encoders, reasoning
/// clients, the timetable cache and the service facade.
#[derive(Error, Debug)]
pub enum KaiError {
    /// Document not found.
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Vector encoder error.
    #[error("Encoder error: {message}")]
    Encoder { message: String },

    /// Reasoning service error (transport, HTTP status, empty reply).
    #[error("Reasoning service error: {message}")]
    Reasoning { message: String },

    /// A bounded call did not finish in time.
    #[error("Timed out after {millis} ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    /// Structured output could not be parsed.
    #[error("Malformed output: {message}")]
    MalformedOutput { message: String },

    /// Timetable fetch or lookup error.
    #[error("Timetable error for {group}: {message}")]
    Timetable { group: String, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl KaiError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an encoder error.
    pub fn encoder(message: impl Into<String>) -> Self {
        Self::Encoder {
            message: message.into(),
        }
    }

    /// Create a reasoning service error.
    pub fn reasoning(message: impl Into<String>) -> Self {
        Self::Reasoning {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, millis: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            millis,
        }
    }

    /// Create a malformed output error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedOutput {
            message: message.into(),
        }
    }

    /// Create a timetable error.
    pub fn timetable(group: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timetable {
            group: group.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Reasoning { .. }
                | Self::Timeout { .. }
                | Self::MalformedOutput { .. }
                | Self::Timetable { .. }
                | Self::Io(_)
        )
    }

    /// Get the error code for tool responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DocumentNotFound { .. } => "DOCUMENT_NOT_FOUND",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Encoder { .. } => "ENCODER_ERROR",
            Self::Reasoning { .. } => "REASONING_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::MalformedOutput { .. } => "MALFORMED_OUTPUT",
            Self::Timetable { .. } => "TIMETABLE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KaiError::DocumentNotFound {
            id: "news-42".to_string(),
        };
        assert!(err.to_string().contains("news-42"));

        let err = KaiError::timeout("route", 30_000);
        assert_eq!(err.to_string(), "Timed out after 30000 ms: route");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            KaiError::DocumentNotFound {
                id: "x".to_string()
            }
            .error_code(),
            "DOCUMENT_NOT_FOUND"
        );
        assert_eq!(KaiError::database("test").error_code(), "DATABASE_ERROR");
        assert_eq!(KaiError::malformed("no json").error_code(), "MALFORMED_OUTPUT");
        assert_eq!(KaiError::timetable("К-101", "404").error_code(), "TIMETABLE_ERROR");
    }

    #[test]
    fn test_transient_classification() {
        assert!(KaiError::reasoning("connection refused").is_transient());
        assert!(KaiError::timeout("validate", 10).is_transient());
        assert!(!KaiError::config("bad toml").is_transient());
        assert!(!KaiError::invalid_argument("empty").is_transient());
    }
}
