//! Form state: the operator's working copy of one report
//!
//! Values are stored in a `BTreeMap`, so iteration and serialization order
//! only depend on the keys. Together with [`DefaultsContext`] this makes two
//! resets on the same day produce identical output.

use crate::dependency::{Cascade, DependencyEngine};
use crate::list::RepeatingList;
use crate::types::{DefaultsContext, ItemId};
use reportform_schema::{value_as_text, DefaultValue, FieldDefinition, FieldType, Schema};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Stored value of one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Scalar, array of scalars or image reference
    Value(Value),
    /// Repeating-list records
    Records(RepeatingList),
}

impl FieldValue {
    /// Scalar value, if this is not a list
    #[inline]
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Records(_) => None,
        }
    }

    /// Records, if this is a list
    #[inline]
    #[must_use]
    pub fn as_records(&self) -> Option<&RepeatingList> {
        match self {
            Self::Records(list) => Some(list),
            Self::Value(_) => None,
        }
    }

    /// JSON form; lists become arrays of records
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Records(list) => list.to_json(),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<RepeatingList> for FieldValue {
    fn from(list: RepeatingList) -> Self {
        Self::Records(list)
    }
}

/// Working copy of one report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormState {
    values: BTreeMap<String, FieldValue>,
    next_item: u64,
}

impl FormState {
    /// Create empty state
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored value for `key`
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }

    /// Scalar value for `key`
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key).and_then(FieldValue::as_value)
    }

    /// Scalar value rendered as text; missing keys and lists read as ""
    #[must_use]
    pub fn text(&self, key: &str) -> String {
        self.value(key).map(value_as_text).unwrap_or_default()
    }

    /// Records of a list field
    #[must_use]
    pub fn records(&self, key: &str) -> Option<&RepeatingList> {
        self.values.get(key).and_then(FieldValue::as_records)
    }

    /// Mutable records of a list field
    pub fn records_mut(&mut self, key: &str) -> Option<&mut RepeatingList> {
        match self.values.get_mut(key) {
            Some(FieldValue::Records(list)) => Some(list),
            _ => None,
        }
    }

    /// Store a value; never fails, unknown keys are kept as-is
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Whether `key` has an entry
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Stored keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of stored entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is stored
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Next item identity; identities are never handed out twice
    pub fn allocate_item_id(&mut self) -> ItemId {
        self.next_item += 1;
        ItemId(self.next_item)
    }

    /// Flatten to the submission payload
    ///
    /// Only keys declared by `schema` are emitted. Lists become arrays of
    /// records; item identities are not part of the payload.
    #[must_use]
    pub fn collect(&self, schema: &Schema) -> Map<String, Value> {
        schema
            .fields()
            .iter()
            .map(|field| {
                let value = self
                    .values
                    .get(&field.key)
                    .map_or(Value::Null, FieldValue::to_json);
                (field.key.clone(), value)
            })
            .collect()
    }

    /// Reinstate schema defaults and settle derived fields
    ///
    /// Entered values and list items are dropped; the item id allocator keeps
    /// counting.
    pub fn reset(&mut self, schema: &Schema, ctx: &DefaultsContext) -> Cascade {
        self.values.clear();
        for field in schema.fields() {
            let value = default_for(field, ctx);
            self.values.insert(field.key.clone(), value);
        }
        let cascade = DependencyEngine::new(schema).settle(self);
        tracing::debug!(
            "Reset {} ({} fields, {} derived)",
            schema.id(),
            self.values.len(),
            cascade.changed.len()
        );
        cascade
    }
}

/// Reset value of one field
#[must_use]
pub fn default_for(field: &FieldDefinition, ctx: &DefaultsContext) -> FieldValue {
    if field.field_type.is_repeating() {
        return FieldValue::Records(RepeatingList::new());
    }
    let value = match &field.default {
        DefaultValue::Literal(v) => v.clone(),
        DefaultValue::Today => Value::String(ctx.today.format("%Y-%m-%d").to_string()),
        DefaultValue::Generated(rule) => Value::String(expand_rule(rule, ctx)),
        DefaultValue::Empty => crate::list::empty_cell(field.field_type),
    };
    let value = match (field.field_type, value) {
        (FieldType::Checkbox, Value::String(s)) => Value::Bool(matches!(s.as_str(), "true" | "1")),
        (_, v) => v,
    };
    FieldValue::Value(value)
}

/// Expand an auto-generation rule
///
/// Placeholders: `{date}` (`YYYYMMDD`), `{date:<strftime>}`, `{today}`
/// (`YYYY-MM-DD`), `{template}` and `{seq}` (4 digits). Anything else is
/// copied through.
#[must_use]
pub fn expand_rule(rule: &str, ctx: &DefaultsContext) -> String {
    let mut out = String::with_capacity(rule.len() + 8);
    let mut rest = rule;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let token = &after[..close];
        match expand_token(token, ctx) {
            Some(text) => out.push_str(&text),
            None => {
                out.push('{');
                out.push_str(token);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn expand_token(token: &str, ctx: &DefaultsContext) -> Option<String> {
    match token {
        "date" => Some(ctx.today.format("%Y%m%d").to_string()),
        "today" => Some(ctx.today.format("%Y-%m-%d").to_string()),
        "template" => Some(ctx.template_id.clone()),
        "seq" => Some(format!("{:04}", ctx.sequence)),
        _ => {
            let fmt = token.strip_prefix("date:")?;
            let mut text = String::new();
            if write!(text, "{}", ctx.today.format(fmt)).is_err() {
                tracing::warn!("Invalid date format in auto-generation rule: {}", fmt);
                return None;
            }
            Some(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn ctx() -> DefaultsContext {
        DefaultsContext::new(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(), "vuln_report", 7)
    }

    #[test]
    fn expand_rule_placeholders() {
        let ctx = ctx();
        assert_eq!(expand_rule("YHBH-{date}-{seq}", &ctx), "YHBH-20240305-0007");
        assert_eq!(expand_rule("{template}/{today}", &ctx), "vuln_report/2024-03-05");
        assert_eq!(expand_rule("R{date:%Y}", &ctx), "R2024");
    }

    #[test]
    fn expand_rule_keeps_unknown_tokens() {
        let ctx = ctx();
        assert_eq!(expand_rule("{other}-{seq", &ctx), "{other}-{seq");
        assert_eq!(expand_rule("{date:%H}", &ctx), "{date:%H}");
    }

    #[test]
    fn set_accepts_unknown_keys() {
        let mut state = FormState::new();
        state.set("anything", json!("x"));
        assert_eq!(state.text("anything"), "x");
        assert_eq!(state.text("missing"), "");
    }

    #[test]
    fn reset_applies_defaults() {
        let schema = Schema::load(
            r#"
id: vuln_report
fields:
  - {key: discovery_date, type: date, default: today}
  - {key: vulnerability_id, auto_generate: true, auto_generate_rule: "YHBH-{date}-{seq}"}
  - {key: city, default: 北京}
  - {key: confirmed, type: checkbox}
  - {key: shots, type: image_list}
  - {key: targets, type: target_list, columns: [{key: url}]}
"#,
        )
        .unwrap();
        let mut state = FormState::new();
        state.set("stale", json!("old"));
        state.reset(&schema, &ctx());

        assert_eq!(state.text("discovery_date"), "2024-03-05");
        assert_eq!(state.text("vulnerability_id"), "YHBH-20240305-0007");
        assert_eq!(state.text("city"), "北京");
        assert_eq!(state.value("confirmed"), Some(&json!(false)));
        assert_eq!(state.value("shots"), Some(&json!([])));
        assert!(state.records("targets").unwrap().is_empty());
        assert!(!state.contains("stale"));
    }

    #[test]
    fn reset_keeps_item_counter() {
        let schema = Schema::load("fields:\n  - {key: a}\n").unwrap();
        let mut state = FormState::new();
        let first = state.allocate_item_id();
        state.reset(&schema, &ctx());
        assert!(state.allocate_item_id() > first);
    }

    #[test]
    fn collect_emits_declared_keys_only() {
        let schema = Schema::load("fields:\n  - {key: a}\n  - {key: b}\n").unwrap();
        let mut state = FormState::new();
        state.set("a", json!("1"));
        state.set("undeclared", json!("x"));

        let payload = state.collect(&schema);
        assert_eq!(payload.len(), 2);
        assert_eq!(payload["a"], json!("1"));
        assert_eq!(payload["b"], Value::Null);
        assert!(!payload.contains_key("undeclared"));
    }
}
