//! Error types for schema loading
//!
//! A schema load either produces a fully consistent [`crate::Schema`] or one
//! of these errors. There is no partially loaded state.

/// Errors raised while loading a schema document
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Document is not structured data, or does not have the schema shape
    #[error("malformed schema document ({format}): {message}")]
    MalformedDocument {
        /// Format the document was parsed as
        format: &'static str,
        /// Parser message
        message: String,
    },

    /// Two fields declare the same key
    #[error("duplicate field key: '{0}'")]
    DuplicateKey(String),

    /// Field references a group id that is not declared
    #[error("field '{field}' references unknown group '{group}'")]
    UnknownGroupRef {
        /// Offending field key
        field: String,
        /// Group id it names
        group: String,
    },

    /// A compute, behavior, preset or aggregate entry names an undeclared field
    #[error("{context} references unknown field '{field}'")]
    UnknownFieldRef {
        /// Where the reference was found
        context: String,
        /// Missing field key
        field: String,
    },

    /// Field names a data source that is not declared
    #[error("field '{field}' references unknown data source '{source_id}'")]
    UnknownDataSource {
        /// Offending field key
        field: String,
        /// Data source id it names
        source_id: String,
    },

    /// A preset could re-trigger its own trigger field
    #[error("preset on '{trigger}' targets '{target}', which would re-trigger the cascade")]
    PresetCycle {
        /// Field declaring the preset
        trigger: String,
        /// Target that closes the loop
        target: String,
    },
}

impl SchemaError {
    /// Create malformed-document error
    pub fn malformed(format: &'static str, message: impl Into<String>) -> Self {
        Self::MalformedDocument {
            format,
            message: message.into(),
        }
    }

    /// Create unknown-field error
    pub fn unknown_field(context: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownFieldRef {
            context: context.into(),
            field: field.into(),
        }
    }
}

/// Result type alias for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;
