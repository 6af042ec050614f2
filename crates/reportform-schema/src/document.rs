//! Raw schema document shapes
//!
//! Mirrors the on-disk `schema.yaml` layout. Everything except field keys is
//! optional; [`crate::Schema::from_document`] fills in defaults and checks
//! cross references.

use crate::model::{
    AggregateSpec, Behavior, ColumnDefinition, DataSourceRef, FieldGroup, FieldType,
    LibrarySpec, ValidationRule,
};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// Whole schema document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaDocument {
    /// Template id
    #[serde(default)]
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Schema version
    #[serde(default)]
    pub version: Option<String>,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Field groups
    #[serde(default)]
    pub field_groups: Vec<FieldGroup>,
    /// Data source declarations
    #[serde(default)]
    pub data_sources: Vec<DataSourceRef>,
    /// Field declarations
    #[serde(default)]
    pub fields: Vec<FieldDocument>,
    /// Behavior declarations
    #[serde(default)]
    pub behaviors: Vec<Behavior>,
    /// Schema-level validation
    #[serde(default)]
    pub validation: ValidationDocument,
    /// Summary statistics
    #[serde(default)]
    pub aggregates: Option<AggregateSpec>,
}

/// `validation:` block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidationDocument {
    /// Cross-field rules
    #[serde(default)]
    pub rules: Vec<ValidationRule>,
}

/// Option entry, either a bare value or `{value, label}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OptionDocument {
    /// `{value: .., label: ..}`
    Labeled {
        /// Stored value
        value: Value,
        /// Display label
        #[serde(default)]
        label: Option<String>,
    },
    /// Bare value
    Plain(Value),
}

/// Per-field `validation:` block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldValidationDocument {
    /// Regex the value must match
    #[serde(default)]
    pub pattern: Option<String>,
    /// Message on mismatch
    #[serde(default)]
    pub message: Option<String>,
}

fn default_rows() -> u32 {
    3
}

fn default_max_count() -> u32 {
    5
}

/// One entry of `fields:`
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDocument {
    /// Unique key
    pub key: String,
    /// Display label
    #[serde(default)]
    pub label: String,
    /// Widget kind
    #[serde(default, rename = "type")]
    pub field_type: FieldType,
    /// Owning group
    #[serde(default)]
    pub group: Option<String>,
    /// Sort key; defaults to the declaration index
    #[serde(default)]
    pub order: Option<i64>,
    /// Must be filled
    #[serde(default)]
    pub required: bool,
    /// Not editable
    #[serde(default)]
    pub readonly: bool,
    /// Reset value, or `"today"`
    #[serde(default)]
    pub default: Value,
    /// Input hint
    #[serde(default)]
    pub placeholder: String,
    /// Help text
    #[serde(default)]
    pub help_text: String,
    /// Static options
    #[serde(default)]
    pub options: Vec<OptionDocument>,
    /// Data source reference
    #[serde(default)]
    pub source: Option<String>,
    /// Textarea rows
    #[serde(default = "default_rows")]
    pub rows: u32,
    /// Maximum image count
    #[serde(default = "default_max_count")]
    pub max_count: u32,
    /// Marks the field as computed
    #[serde(default)]
    pub computed: bool,
    /// Source field for computed values
    #[serde(default)]
    pub compute_from: String,
    /// Rule table for computed values
    #[serde(default)]
    pub compute_rule: IndexMap<String, Value>,
    /// Generate the default on reset
    #[serde(default)]
    pub auto_generate: bool,
    /// Generation template
    #[serde(default)]
    pub auto_generate_rule: String,
    /// Regex constraint
    #[serde(default)]
    pub validation: FieldValidationDocument,
    /// Trigger value to target assignments
    #[serde(default)]
    pub presets: IndexMap<String, IndexMap<String, Value>>,
    /// Repeating-list sub-fields
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    /// Repeating-list locator column
    #[serde(default)]
    pub locator: Option<String>,
    /// Repeating-list item label template
    #[serde(default)]
    pub item_label: Option<String>,
    /// Field mirroring the item count
    #[serde(default)]
    pub count_field: Option<String>,
    /// Library fill configuration
    #[serde(default)]
    pub library: Option<LibrarySpec>,
}
