//! Error types for the engine
//!
//! Mirrors the report workflow's failure taxonomy:
//! - `SchemaError` at load (re-exported from the schema crate)
//! - `LookupError` from reference/data-source calls (absorbed by cascades)
//! - `UploadError` from the asset service (field left unset)
//! - `SubmissionError` from report generation (state preserved)
//! - `ValidationReport` as a value, wrapped by `SubmitError::Invalid`

use crate::types::ItemId;
use crate::validation::ValidationReport;
pub use reportform_schema::SchemaError;

/// Reference-data or data-source lookup failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// Entity does not exist
    #[error("not found: {endpoint}/{id}")]
    NotFound {
        /// Endpoint queried
        endpoint: String,
        /// Requested id
        id: String,
    },

    /// Service call failed
    #[error("lookup failed: {0}")]
    Unavailable(String),

    /// Data source is not declared by the active schema
    #[error("unknown data source: {0}")]
    UnknownSource(String),

    /// Response belongs to a superseded schema generation
    #[error("stale response for generation {ticket}, active generation is {active}")]
    Stale {
        /// Generation the request was issued under
        ticket: u64,
        /// Generation at arrival
        active: u64,
    },
}

impl LookupError {
    /// Create not-found error
    pub fn not_found(endpoint: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            endpoint: endpoint.into(),
            id: id.into(),
        }
    }
}

/// Image upload failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    /// Asset service refused or failed the upload
    #[error("upload failed: {0}")]
    Failed(String),

    /// Target is not an image field or image column
    #[error("'{0}' does not accept images")]
    NotAnImageField(String),

    /// Image list already holds `max` images
    #[error("'{field}' already holds the maximum of {max} images")]
    LimitReached {
        /// Image-list field
        field: String,
        /// Declared maximum
        max: u32,
    },
}

/// Report generation failures; the message is surfaced verbatim
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    /// Service reported an unsuccessful generation
    #[error("{0}")]
    Rejected(String),

    /// Service call failed
    #[error("{0}")]
    Failed(String),
}

/// Why a submission did not go through
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Validation blocked the submission
    #[error("validation failed: {}", .0.errors.join("; "))]
    Invalid(ValidationReport),

    /// Generation failed after validation passed
    #[error("submission failed: {0}")]
    Submission(#[from] SubmissionError),
}

/// Repeating-list addressing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListError {
    /// Key is not a repeating-list field
    #[error("'{0}' is not a repeating list")]
    NotAList(String),

    /// Item id is not (or no longer) in the list
    #[error("item {item} not found in '{list}'")]
    UnknownItem {
        /// List key
        list: String,
        /// Missing item
        item: ItemId,
    },

    /// Column is not declared for the list
    #[error("'{list}' has no column '{column}'")]
    UnknownColumn {
        /// List key
        list: String,
        /// Missing column
        column: String,
    },

    /// List has no reference library configured
    #[error("'{0}' has no reference library")]
    NoLibrary(String),
}

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Schema failed to load
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Template service could not deliver a schema
    #[error("template error: {0}")]
    Template(String),

    /// No schema is loaded
    #[error("no template loaded")]
    NoSchema,

    /// Field key is not declared
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// Field is readonly
    #[error("field is readonly: {0}")]
    Readonly(String),

    /// Group id is not declared
    #[error("unknown group: {0}")]
    UnknownGroup(String),

    /// Repeating-list error
    #[error("list error: {0}")]
    List(#[from] ListError),

    /// Lookup error
    #[error("lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Upload error
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    /// Submit error
    #[error("{0}")]
    Submit(#[from] SubmitError),
}

impl EngineError {
    /// Whether the failure must be shown to the operator as blocking
    #[inline]
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::Schema(_) | Self::Template(_) | Self::Submit(_) | Self::NoSchema
        )
    }

    /// Whether retrying the same operation may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Lookup(LookupError::Unavailable(_))
                | Self::Upload(UploadError::Failed(_))
                | Self::Submit(SubmitError::Submission(_))
                | Self::Template(_)
        )
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_error_display() {
        let err = LookupError::not_found("vulnerability", "SQL注入");
        assert_eq!(err.to_string(), "not found: vulnerability/SQL注入");
    }

    #[test]
    fn submission_error_is_verbatim() {
        let err = SubmissionError::Rejected("模板文件缺失".to_string());
        assert_eq!(err.to_string(), "模板文件缺失");
    }

    #[test]
    fn submit_error_lists_violations() {
        let err = SubmitError::Invalid(ValidationReport::from_errors(vec![
            "a is required".to_string(),
            "b is required".to_string(),
        ]));
        assert_eq!(err.to_string(), "validation failed: a is required; b is required");
    }

    #[test]
    fn classification() {
        let schema: EngineError = SchemaError::DuplicateKey("a".to_string()).into();
        assert!(schema.is_blocking());
        assert!(!schema.is_retryable());

        let lookup: EngineError = LookupError::Unavailable("timeout".to_string()).into();
        assert!(!lookup.is_blocking());
        assert!(lookup.is_retryable());

        let submit: EngineError =
            SubmitError::from(SubmissionError::Failed("disk full".to_string())).into();
        assert!(submit.is_blocking());
        assert!(submit.is_retryable());
    }
}
