//! Error types for bibliography search.

use std::path::PathBuf;
use thiserror::Error;

/// A query string that could not be parsed.
///
/// Carried inside [`crate::search::SearchQuery`] instead of being raised, so
/// that half-typed queries simply match nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed query '{query}': {reason}")]
pub struct MalformedQuery {
    pub query: String,
    pub reason: String,
}

impl MalformedQuery {
    pub fn new(query: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            reason: reason.into(),
        }
    }
}

/// Main error type for search operations.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    MalformedQuery(#[from] MalformedQuery),

    #[error("Full-text index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Could not extract text from {path}: {message}")]
    DocumentExtraction { path: PathBuf, message: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("Index directory error: {0}")]
    OpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SearchError {
    /// Whether the caller should disable full-text search and fall back to
    /// field-only matching.
    pub fn is_index_failure(&self) -> bool {
        matches!(
            self,
            SearchError::IndexUnavailable(_)
                | SearchError::Tantivy(_)
                | SearchError::OpenDirectory(_)
        )
    }
}

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_query_message() {
        let err = MalformedQuery::new("title=", "missing value");
        assert_eq!(err.to_string(), "Malformed query 'title=': missing value");

        let wrapped: SearchError = err.into();
        assert!(matches!(wrapped, SearchError::MalformedQuery(_)));
        assert!(!wrapped.is_index_failure());
    }

    #[test]
    fn test_index_failure_classification() {
        let err = SearchError::IndexUnavailable("closed".to_string());
        assert!(err.is_index_failure());

        let err = SearchError::DocumentExtraction {
            path: PathBuf::from("paper.pdf"),
            message: "bad encoding".to_string(),
        };
        assert!(!err.is_index_failure());
        assert!(err.to_string().contains("paper.pdf"));
    }
}
