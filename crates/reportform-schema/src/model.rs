//! Typed schema model
//!
//! These are the checked, immutable types handed to the engine. The raw
//! serde shapes they are built from live in [`crate::document`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the implicit group used by fields that do not declare one
pub const DEFAULT_GROUP: &str = "default";

/// Widget kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Single-line text
    #[default]
    Text,
    /// Multi-line text
    Textarea,
    /// Fixed option list
    Select,
    /// Option list with text filter
    SearchableSelect,
    /// Boolean toggle
    Checkbox,
    /// Multi-select over an option list
    CheckboxGroup,
    /// Calendar date, stored as `YYYY-MM-DD`
    Date,
    /// Single uploaded image
    Image,
    /// Bounded list of uploaded images
    ImageList,
    /// Repeating list of test targets (system, url, port, account)
    TargetList,
    /// Repeating list of testers
    TesterList,
    /// Repeating list of vulnerability detail entries
    VulnList,
    /// Generic repeating list
    RepeatingList,
    /// Stored but never rendered
    Hidden,
}

impl FieldType {
    /// True for every repeating-list variant
    #[inline]
    #[must_use]
    pub fn is_repeating(self) -> bool {
        matches!(
            self,
            Self::TargetList | Self::TesterList | Self::VulnList | Self::RepeatingList
        )
    }

    /// True for fields whose value is an array of scalars or image refs
    #[inline]
    #[must_use]
    pub fn is_array_valued(self) -> bool {
        matches!(self, Self::CheckboxGroup | Self::ImageList)
    }

    /// True for fields backed by an option list
    #[inline]
    #[must_use]
    pub fn has_options(self) -> bool {
        matches!(
            self,
            Self::Select | Self::SearchableSelect | Self::CheckboxGroup
        )
    }

    /// Schema spelling of the type
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Textarea => "textarea",
            Self::Select => "select",
            Self::SearchableSelect => "searchable_select",
            Self::Checkbox => "checkbox",
            Self::CheckboxGroup => "checkbox_group",
            Self::Date => "date",
            Self::Image => "image",
            Self::ImageList => "image_list",
            Self::TargetList => "target_list",
            Self::TesterList => "tester_list",
            Self::VulnList => "vuln_list",
            Self::RepeatingList => "repeating_list",
            Self::Hidden => "hidden",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a select-type option list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    /// Stored value
    pub value: String,
    /// Display label
    pub label: String,
}

/// How a field obtains its value on reset
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DefaultValue {
    /// No default; field starts empty
    #[default]
    Empty,
    /// Fixed value
    Literal(Value),
    /// Current date at reset time
    Today,
    /// Auto-generation rule, e.g. `YHBH-{date}-{seq}`
    Generated(String),
}

/// Computed field: derived from another field through a rule table
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeSpec {
    /// Source field key
    pub from: String,
    /// Source value (as text) to derived value
    pub rules: IndexMap<String, Value>,
}

/// Regex constraint attached to a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPattern {
    /// Regular expression the value must match
    pub pattern: String,
    /// Message reported on mismatch
    pub message: Option<String>,
}

/// Sub-field of a repeating-list item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Key inside the item record
    pub key: String,
    /// Display label
    #[serde(default)]
    pub label: String,
    /// Widget kind
    #[serde(default, rename = "type")]
    pub field_type: FieldType,
    /// Static options for select-type columns
    #[serde(default)]
    pub options: Vec<String>,
    /// Data source for the column's options
    #[serde(default)]
    pub source: Option<String>,
    /// Input hint
    #[serde(default)]
    pub placeholder: String,
}

/// Reference-library fill for one repeating list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySpec {
    /// Reference data endpoint, e.g. `vulnerability`
    pub endpoint: String,
    /// Item column to result path (dot notation)
    #[serde(default)]
    pub mapping: IndexMap<String, String>,
}

/// Repeating-list configuration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListSpec {
    /// Sub-fields of each item
    pub columns: Vec<ColumnDefinition>,
    /// Column holding the primary locator (URL/IP)
    pub locator: Option<String>,
    /// Display label template, `{n}` is the 1-based position
    pub item_label: Option<String>,
    /// Field that mirrors the item count
    pub count_field: Option<String>,
    /// Library fill configuration
    pub library: Option<LibrarySpec>,
}

impl ListSpec {
    /// Look up a column by key
    #[must_use]
    pub fn column(&self, key: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.key == key)
    }
}

/// A declared field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    /// Unique key
    pub key: String,
    /// Display label
    pub label: String,
    /// Widget kind
    pub field_type: FieldType,
    /// Owning group id
    pub group: String,
    /// Sort key within the group
    pub order: i64,
    /// Must be filled before submission
    pub required: bool,
    /// Not editable by the operator
    pub readonly: bool,
    /// Reset value
    pub default: DefaultValue,
    /// Input hint
    pub placeholder: String,
    /// Help text shown under the widget
    pub help_text: String,
    /// Static options
    pub options: Vec<SelectOption>,
    /// Data source reference
    pub source: Option<String>,
    /// Textarea rows
    pub rows: u32,
    /// Maximum image count for image lists
    pub max_count: u32,
    /// Computed-field rule
    pub compute: Option<ComputeSpec>,
    /// Trigger value to target assignments
    pub presets: IndexMap<String, IndexMap<String, Value>>,
    /// Regex constraint
    pub pattern: Option<FieldPattern>,
    /// Repeating-list configuration
    pub list: Option<ListSpec>,
    pub(crate) declared: usize,
}

impl FieldDefinition {
    /// Position in the source document
    #[inline]
    #[must_use]
    pub fn declared_index(&self) -> usize {
        self.declared
    }

    /// Whether the field is derived rather than edited
    #[inline]
    #[must_use]
    pub fn is_computed(&self) -> bool {
        self.compute.is_some()
    }

    /// Locator column for repeating lists
    ///
    /// Target lists fall back to `url` when none is declared.
    #[must_use]
    pub fn locator_column(&self) -> Option<&str> {
        let declared = self.list.as_ref().and_then(|l| l.locator.as_deref());
        match (declared, self.field_type) {
            (Some(col), _) => Some(col),
            (None, FieldType::TargetList) => Some("url"),
            (None, _) => None,
        }
    }
}

/// Display group of fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGroup {
    /// Unique id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Sort key
    #[serde(default)]
    pub order: i64,
    /// Collapsed on first render
    #[serde(default)]
    pub collapsed: bool,
}

/// Where a data source's payload comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Provenance {
    /// Static configuration value
    Config {
        /// Key in the global configuration
        #[serde(default)]
        config_key: String,
        /// Inline value; used without a remote call when present
        #[serde(default)]
        value: Value,
    },
    /// Remote list held by the template service
    Database,
    /// Remote computed lookup
    Api {
        /// Endpoint name
        #[serde(default)]
        endpoint: String,
    },
}

/// Named reference-data feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceRef {
    /// Unique id
    pub id: String,
    /// Payload origin
    #[serde(flatten)]
    pub provenance: Provenance,
    /// Free-form description
    #[serde(default)]
    pub description: String,
}

impl DataSourceRef {
    /// Inline payload for static sources
    #[must_use]
    pub fn inline_value(&self) -> Option<&Value> {
        match &self.provenance {
            Provenance::Config { value, .. } if !value.is_null() => Some(value),
            _ => None,
        }
    }
}

/// Event that fires a behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    /// Value committed
    #[default]
    Change,
    /// Focus left the widget
    Blur,
}

/// Behavior trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Field key
    pub field: String,
    /// Event kind
    #[serde(default)]
    pub event: TriggerEvent,
}

/// One step of a behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BehaviorAction {
    /// Derive a target value locally
    Compute {
        /// Field receiving the result
        target: String,
        /// Trigger value (as text) to result
        #[serde(default)]
        rules: IndexMap<String, Value>,
        /// Template with `${key}` placeholders
        #[serde(default)]
        expression: Option<String>,
    },
    /// Ask the reference-data service and map the result into fields
    ApiCall {
        /// Endpoint name passed to the reference-data service
        endpoint: String,
        /// Request parameters; `id` is a `${key}` template
        #[serde(default)]
        params: IndexMap<String, String>,
        /// Target field to result path (dot notation)
        #[serde(default)]
        result_mapping: IndexMap<String, String>,
    },
}

impl BehaviorAction {
    /// Fields this action writes
    #[must_use]
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::Compute { target, .. } => vec![target.as_str()],
            Self::ApiCall { result_mapping, .. } => {
                result_mapping.keys().map(String::as_str).collect()
            }
        }
    }
}

/// Trigger bound to an ordered list of actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Behavior {
    /// Unique id
    #[serde(default)]
    pub id: String,
    /// What fires the behavior
    pub trigger: Trigger,
    /// Steps in declared order
    #[serde(default)]
    pub actions: Vec<BehaviorAction>,
}

/// Schema-level validation rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Fields covered by the rule
    #[serde(default)]
    pub fields: Vec<String>,
    /// Rule name; only `required` is evaluated
    pub rule: String,
    /// Message reported once when the rule fails
    #[serde(default)]
    pub message: String,
}

/// Severity band of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// 超危
    Critical,
    /// 高危
    High,
    /// 中危
    Medium,
    /// 低危
    Low,
    /// 信息性
    Info,
}

impl Severity {
    /// All bands, most severe first
    pub const ALL: [Severity; 5] = [
        Self::Critical,
        Self::High,
        Self::Medium,
        Self::Low,
        Self::Info,
    ];
}

/// One value per severity band
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityMap<T> {
    /// Critical band
    pub critical: T,
    /// High band
    pub high: T,
    /// Medium band
    pub medium: T,
    /// Low band
    pub low: T,
    /// Informational band
    pub info: T,
}

impl<T> SeverityMap<T> {
    /// Value for a band
    #[must_use]
    pub fn get(&self, severity: Severity) -> &T {
        match severity {
            Severity::Critical => &self.critical,
            Severity::High => &self.high,
            Severity::Medium => &self.medium,
            Severity::Low => &self.low,
            Severity::Info => &self.info,
        }
    }

    /// Iterate bands in severity order
    pub fn iter(&self) -> impl Iterator<Item = (Severity, &T)> {
        Severity::ALL.into_iter().map(move |s| (s, self.get(s)))
    }
}

impl SeverityMap<String> {
    /// Band whose label equals `label`
    #[must_use]
    pub fn band_of(&self, label: &str) -> Option<Severity> {
        self.iter().find(|(_, l)| l.as_str() == label).map(|(s, _)| s)
    }
}

fn default_levels() -> SeverityMap<String> {
    SeverityMap {
        critical: "超危".to_string(),
        high: "高危".to_string(),
        medium: "中危".to_string(),
        low: "低危".to_string(),
        info: "信息性".to_string(),
    }
}

/// Labels for the derived risk rating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingLabels {
    /// High band label
    pub high: String,
    /// Medium band label
    pub medium: String,
    /// Low band label
    pub low: String,
}

impl Default for RatingLabels {
    fn default() -> Self {
        Self {
            high: "high".to_string(),
            medium: "medium".to_string(),
            low: "low".to_string(),
        }
    }
}

fn default_level_column() -> String {
    "vuln_level".to_string()
}

fn default_summary_item() -> String {
    "{label}{count}个".to_string()
}

fn default_empty_summary() -> String {
    "无漏洞".to_string()
}

/// Summary fields recomputed from vulnerability counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    /// Count field per band
    pub counts: SeverityMap<String>,
    /// Field receiving the sum of all bands
    #[serde(default)]
    pub total: Option<String>,
    /// Field receiving the summary text
    #[serde(default)]
    pub summary: Option<String>,
    /// Field receiving the risk rating
    #[serde(default)]
    pub rating: Option<String>,
    /// Rating labels
    #[serde(default)]
    pub rating_labels: RatingLabels,
    /// Repeating list the counts are derived from
    #[serde(default)]
    pub source_list: Option<String>,
    /// Item column holding the severity label
    #[serde(default = "default_level_column")]
    pub level_column: String,
    /// Severity label per band
    #[serde(default = "default_levels")]
    pub levels: SeverityMap<String>,
    /// Summary fragment, `{label}` and `{count}` placeholders
    #[serde(default = "default_summary_item")]
    pub summary_item: String,
    /// Summary when every band is zero
    #[serde(default = "default_empty_summary")]
    pub empty_summary: String,
}

impl AggregateSpec {
    /// Fields whose change requires a recompute
    #[must_use]
    pub fn inputs(&self) -> Vec<&str> {
        let mut inputs: Vec<&str> = self.counts.iter().map(|(_, k)| k.as_str()).collect();
        if let Some(list) = &self.source_list {
            inputs.push(list.as_str());
        }
        inputs
    }

    /// Fields written by the recompute
    #[must_use]
    pub fn outputs(&self) -> Vec<&str> {
        let mut outputs: Vec<&str> = Vec::new();
        if self.source_list.is_some() {
            outputs.extend(self.counts.iter().map(|(_, k)| k.as_str()));
        }
        outputs.extend(
            [&self.total, &self.summary, &self.rating]
                .into_iter()
                .flatten()
                .map(String::as_str),
        );
        outputs
    }
}

/// Template metadata
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TemplateMeta {
    /// Template id
    pub id: String,
    /// Display name
    pub name: String,
    /// Schema version
    pub version: String,
    /// Description
    pub description: String,
}

/// Render a JSON value as the text used for rule keys and substitutions
///
/// Strings are returned verbatim, `null` becomes the empty string, and other
/// values use their JSON spelling.
#[must_use]
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
