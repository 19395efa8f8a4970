//! Error types for Memoria

use thiserror::Error;

/// Result type alias for Memoria operations
pub type Result<T> = std::result::Result<T, MemoriaError>;

/// Main error type for Memoria
#[derive(Error, Debug)]
pub enum MemoriaError {
    #[error("Validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "openai")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(not(feature = "openai"))]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MemoriaError {
    /// Convenience constructor for validation failures
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        MemoriaError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for missing resources
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        MemoriaError::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemoriaError::Database(_)
                | MemoriaError::VectorStore(_)
                | MemoriaError::Embedding(_)
                | MemoriaError::Llm(_)
                | MemoriaError::Http(_)
        )
    }

    /// HTTP status code the outer adapter should map this error to
    pub fn status_code(&self) -> u16 {
        match self {
            MemoriaError::Validation { .. } => 400,
            MemoriaError::NotFound { .. } | MemoriaError::TemplateNotFound(_) => 404,
            MemoriaError::Conflict(_) => 409,
            _ => 500,
        }
    }
}

impl From<rusqlite::Error> for MemoriaError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                MemoriaError::Conflict(e.to_string())
            }
            rusqlite::Error::QueryReturnedNoRows => MemoriaError::not_found("row", "?"),
            _ => MemoriaError::Database(e.to_string()),
        }
    }
}
