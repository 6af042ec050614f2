//! Checked schema and its load pipeline
//!
//! ```text
//! text → DocumentParser → SchemaDocument → Schema::from_document → Schema
//!                                               │
//!                        keys / groups / refs / preset cycles checked here
//! ```

use crate::document::{FieldDocument, OptionDocument, SchemaDocument};
use crate::error::{SchemaError, SchemaResult};
use crate::model::{
    value_as_text, AggregateSpec, Behavior, ComputeSpec, DataSourceRef,
    DefaultValue, FieldDefinition, FieldGroup, FieldPattern, ListSpec, Provenance, SelectOption,
    TemplateMeta, ValidationRule, DEFAULT_GROUP,
};
use crate::parsers::{default_parsers, sniff, DocumentParser, JsonParser, YamlParser};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Immutable, consistency-checked schema for one report template
#[derive(Debug, Clone)]
pub struct Schema {
    meta: TemplateMeta,
    groups: Vec<FieldGroup>,
    fields: Vec<FieldDefinition>,
    by_key: HashMap<String, usize>,
    group_members: HashMap<String, Vec<usize>>,
    computed_by: HashMap<String, Vec<usize>>,
    data_sources: Vec<DataSourceRef>,
    behaviors: Vec<Behavior>,
    validation_rules: Vec<ValidationRule>,
    aggregates: Option<AggregateSpec>,
}

impl Schema {
    /// Load a schema document, detecting JSON or YAML from its content
    ///
    /// # Errors
    /// - `SchemaError::MalformedDocument` if the text is not a schema document
    /// - `SchemaError::DuplicateKey` if two fields share a key
    /// - `SchemaError::UnknownGroupRef` if a field names an undeclared group
    /// - `SchemaError::UnknownFieldRef` / `UnknownDataSource` / `PresetCycle`
    ///   for inconsistent cross references
    pub fn load(document: &str) -> SchemaResult<Self> {
        Self::from_document(sniff(document).parse(document)?)
    }

    /// Load a document read from `path`, choosing the format by extension
    ///
    /// Unknown extensions fall back to content detection.
    ///
    /// # Errors
    /// Same as [`Schema::load`]
    pub fn load_path(path: &Path, document: &str) -> SchemaResult<Self> {
        Self::from_document(default_parsers().parse_path(path, document)?)
    }

    /// Load a YAML document
    pub fn load_yaml(document: &str) -> SchemaResult<Self> {
        Self::from_document(YamlParser.parse(document)?)
    }

    /// Load a JSON document
    pub fn load_json(document: &str) -> SchemaResult<Self> {
        Self::from_document(JsonParser.parse(document)?)
    }

    /// Check a raw document and build the schema
    pub fn from_document(doc: SchemaDocument) -> SchemaResult<Self> {
        let SchemaDocument {
            id,
            name,
            version,
            description,
            field_groups,
            mut data_sources,
            fields: raw_fields,
            behaviors,
            validation,
            aggregates,
        } = doc;

        let mut fields = Vec::with_capacity(raw_fields.len());
        let mut by_key = HashMap::with_capacity(raw_fields.len());
        for (idx, raw) in raw_fields.into_iter().enumerate() {
            if by_key.insert(raw.key.clone(), idx).is_some() {
                return Err(SchemaError::DuplicateKey(raw.key));
            }
            fields.push(build_field(raw, idx));
        }

        // Groups: declared ones sorted by order, plus the implicit default group
        let mut groups = field_groups;
        groups.sort_by_key(|g| g.order);
        for field in &fields {
            if groups.iter().any(|g| g.id == field.group) {
                continue;
            }
            if field.group == DEFAULT_GROUP {
                groups.push(FieldGroup {
                    id: DEFAULT_GROUP.to_string(),
                    name: String::new(),
                    order: i64::MAX,
                    collapsed: false,
                });
            } else {
                return Err(SchemaError::UnknownGroupRef {
                    field: field.key.clone(),
                    group: field.group.clone(),
                });
            }
        }

        let mut group_members: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, field) in fields.iter().enumerate() {
            group_members.entry(field.group.clone()).or_default().push(idx);
        }
        for members in group_members.values_mut() {
            // stable: ties keep declaration order
            members.sort_by_key(|&i| fields[i].order);
        }

        let mut computed_by: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, field) in fields.iter().enumerate() {
            if let Some(compute) = &field.compute {
                if !by_key.contains_key(&compute.from) {
                    return Err(SchemaError::unknown_field(
                        format!("computed field '{}'", field.key),
                        compute.from.clone(),
                    ));
                }
                computed_by.entry(compute.from.clone()).or_default().push(idx);
            }
        }

        resolve_sources(&fields, &mut data_sources)?;

        let schema = Self {
            meta: TemplateMeta {
                id,
                name,
                version: version.unwrap_or_else(|| "1.0.0".to_string()),
                description,
            },
            groups,
            fields,
            by_key,
            group_members,
            computed_by,
            data_sources,
            behaviors,
            validation_rules: validation.rules,
            aggregates,
        };
        schema.check_references()?;

        tracing::info!(
            "Loaded schema {} v{} ({} fields, {} groups)",
            schema.meta.id,
            schema.meta.version,
            schema.fields.len(),
            schema.groups.len()
        );
        Ok(schema)
    }

    fn check_references(&self) -> SchemaResult<()> {
        let known = |context: String, key: &str| -> SchemaResult<()> {
            if self.by_key.contains_key(key) {
                Ok(())
            } else {
                Err(SchemaError::unknown_field(context, key))
            }
        };

        for behavior in &self.behaviors {
            let context = format!("behavior '{}'", behavior.id);
            known(context.clone(), &behavior.trigger.field)?;
            for action in &behavior.actions {
                for target in action.targets() {
                    known(context.clone(), target)?;
                }
            }
        }

        for field in &self.fields {
            for (trigger_value, targets) in &field.presets {
                for target in targets.keys() {
                    known(
                        format!("preset '{}' on '{}'", trigger_value, field.key),
                        target,
                    )?;
                    if target == &field.key {
                        return Err(SchemaError::PresetCycle {
                            trigger: field.key.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
            if let Some(count_field) = field.list.as_ref().and_then(|l| l.count_field.as_ref()) {
                known(format!("count_field of '{}'", field.key), count_field)?;
            }
        }

        for rule in &self.validation_rules {
            for key in &rule.fields {
                known(format!("validation rule '{}'", rule.rule), key)?;
            }
        }

        if let Some(agg) = &self.aggregates {
            let inputs = agg.inputs();
            for key in inputs.iter().chain(agg.outputs().iter()) {
                known("aggregates".to_string(), *key)?;
            }
            // Rating presets run once after the recompute; they must not feed it again
            if let Some(rating) = agg.rating.as_deref().and_then(|k| self.field(k)) {
                for targets in rating.presets.values() {
                    if let Some(target) = targets.keys().find(|t| inputs.contains(&t.as_str())) {
                        return Err(SchemaError::PresetCycle {
                            trigger: rating.key.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Template metadata
    #[inline]
    #[must_use]
    pub fn meta(&self) -> &TemplateMeta {
        &self.meta
    }

    /// Template id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Groups in display order
    #[inline]
    #[must_use]
    pub fn groups(&self) -> &[FieldGroup] {
        &self.groups
    }

    /// Fields in declaration order
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    /// Look up a field by key
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&FieldDefinition> {
        self.by_key.get(key).map(|&i| &self.fields[i])
    }

    /// Whether `key` is declared
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Fields of one group, stable-sorted by `order`
    #[must_use]
    pub fn fields_in_group(&self, group_id: &str) -> Vec<&FieldDefinition> {
        self.group_members
            .get(group_id)
            .map(|members| members.iter().map(|&i| &self.fields[i]).collect())
            .unwrap_or_default()
    }

    /// All fields, group by group in display order
    #[must_use]
    pub fn ordered_fields(&self) -> Vec<&FieldDefinition> {
        self.groups
            .iter()
            .flat_map(|g| self.fields_in_group(&g.id))
            .collect()
    }

    /// Fields computed from `key`
    #[must_use]
    pub fn computed_from(&self, key: &str) -> Vec<&FieldDefinition> {
        self.computed_by
            .get(key)
            .map(|members| members.iter().map(|&i| &self.fields[i]).collect())
            .unwrap_or_default()
    }

    /// Behaviors triggered by `key`, in declaration order
    pub fn behaviors_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Behavior> + 'a {
        self.behaviors.iter().filter(move |b| b.trigger.field == key)
    }

    /// All behaviors
    #[inline]
    #[must_use]
    pub fn behaviors(&self) -> &[Behavior] {
        &self.behaviors
    }

    /// Data source declarations, including implicit `config.*` sources
    #[inline]
    #[must_use]
    pub fn data_sources(&self) -> &[DataSourceRef] {
        &self.data_sources
    }

    /// Look up a data source
    #[must_use]
    pub fn data_source(&self, id: &str) -> Option<&DataSourceRef> {
        self.data_sources.iter().find(|d| d.id == id)
    }

    /// Schema-level validation rules
    #[inline]
    #[must_use]
    pub fn validation_rules(&self) -> &[ValidationRule] {
        &self.validation_rules
    }

    /// Summary statistics configuration
    #[inline]
    #[must_use]
    pub fn aggregates(&self) -> Option<&AggregateSpec> {
        self.aggregates.as_ref()
    }
}

fn build_field(raw: FieldDocument, declared: usize) -> FieldDefinition {
    let default = if raw.auto_generate && !raw.auto_generate_rule.is_empty() {
        DefaultValue::Generated(raw.auto_generate_rule)
    } else {
        match raw.default {
            Value::Null => DefaultValue::Empty,
            Value::String(s) if s == "today" => DefaultValue::Today,
            Value::String(s) if s.is_empty() => DefaultValue::Empty,
            other => DefaultValue::Literal(other),
        }
    };

    let compute = (raw.computed || !raw.compute_from.is_empty())
        .then(|| ComputeSpec {
            from: raw.compute_from.clone(),
            rules: raw.compute_rule,
        })
        .filter(|c| !c.from.is_empty());

    let list = raw.field_type.is_repeating().then(|| ListSpec {
        columns: raw.columns,
        locator: raw.locator,
        item_label: raw.item_label,
        count_field: raw.count_field,
        library: raw.library,
    });

    let options = raw
        .options
        .into_iter()
        .map(|opt| match opt {
            OptionDocument::Labeled { value, label } => {
                let value = value_as_text(&value);
                SelectOption {
                    label: label.unwrap_or_else(|| value.clone()),
                    value,
                }
            }
            OptionDocument::Plain(value) => {
                let value = value_as_text(&value);
                SelectOption {
                    label: value.clone(),
                    value,
                }
            }
        })
        .collect();

    FieldDefinition {
        key: raw.key,
        label: raw.label,
        field_type: raw.field_type,
        group: raw.group.unwrap_or_else(|| DEFAULT_GROUP.to_string()),
        order: raw.order.unwrap_or(declared as i64),
        required: raw.required,
        readonly: raw.readonly || compute.is_some(),
        default,
        placeholder: raw.placeholder,
        help_text: raw.help_text,
        options,
        source: raw.source.filter(|s| !s.is_empty()),
        rows: raw.rows,
        max_count: raw.max_count,
        compute,
        presets: raw.presets,
        pattern: raw.validation.pattern.map(|pattern| FieldPattern {
            pattern,
            message: raw.validation.message,
        }),
        list,
        declared,
    }
}

/// Check field and column `source` references, adding implicit `config.*` sources
fn resolve_sources(fields: &[FieldDefinition], sources: &mut Vec<DataSourceRef>) -> SchemaResult<()> {
    let column_sources = fields.iter().flat_map(|f| {
        f.list
            .iter()
            .flat_map(|l| l.columns.iter())
            .filter_map(move |c| c.source.as_deref().map(|s| (f.key.as_str(), s)))
    });
    let field_sources = fields
        .iter()
        .filter_map(|f| f.source.as_deref().map(|s| (f.key.as_str(), s)));

    for (field, source) in field_sources.chain(column_sources) {
        if sources.iter().any(|d| d.id == source) {
            continue;
        }
        match source.strip_prefix("config.") {
            Some(config_key) => sources.push(DataSourceRef {
                id: source.to_string(),
                provenance: Provenance::Config {
                    config_key: config_key.to_string(),
                    value: Value::Null,
                },
                description: String::new(),
            }),
            None => {
                return Err(SchemaError::UnknownDataSource {
                    field: field.to_string(),
                    source_id: source.to_string(),
                })
            }
        }
    }
    Ok(())
}
