//! Report generation error taxonomy

use rtg_llm::LlmError;

/// Failure of a report generation request.
///
/// Cache tier failures never appear here; the cache absorbs them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReportError {
    /// Template or target missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// A stage exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The caller cancelled the request
    #[error("Report generation aborted")]
    Aborted,

    /// Completion backend failure, message kept verbatim
    #[error("LLM processing failed: {0}")]
    ProviderError(String),

    /// Malformed input rejected before any work started
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ReportError {
    /// Stable label used for metric tags and serialized results
    pub fn kind(&self) -> &'static str {
        match self {
            ReportError::NotFound(_) => "not_found",
            ReportError::Timeout(_) => "timeout",
            ReportError::Aborted => "aborted",
            ReportError::ProviderError(_) => "provider_error",
            ReportError::ValidationError(_) => "validation_error",
        }
    }
}

impl From<LlmError> for ReportError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout { .. } => ReportError::Timeout(err.to_string()),
            LlmError::Cancelled => ReportError::Aborted,
            other => ReportError::ProviderError(other.to_string()),
        }
    }
}

/// Failure of a relational datastore query
#[derive(Debug, thiserror::Error)]
pub enum DatastoreError {
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Row could not be decoded: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for DatastoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatastoreError::Decode(err.to_string())
            }
            other => DatastoreError::Query(other.to_string()),
        }
    }
}
