//! Submission gate
//!
//! Validation reads the state and reports; it never writes. Callers decide
//! whether a failing report blocks (submission) or only warns.

use crate::state::{FieldValue, FormState};
use reportform_schema::{FieldDefinition, FieldType, Schema};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Result of a validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// No violations
    pub valid: bool,
    /// Human-readable violations, in field order
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Build from a list of violations
    #[must_use]
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

fn blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn has_image_path(value: &Value) -> bool {
    value
        .get("path")
        .and_then(Value::as_str)
        .is_some_and(|p| !p.trim().is_empty())
}

fn label(field: &FieldDefinition) -> &str {
    if field.label.is_empty() {
        &field.key
    } else {
        &field.label
    }
}

/// Field and rule checks for one schema
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    patterns: HashMap<String, Regex>,
}

impl ValidationEngine {
    /// Compile the schema's field patterns
    ///
    /// A pattern that does not compile is logged and skipped.
    #[must_use]
    pub fn new(schema: &Schema) -> Self {
        let mut patterns = HashMap::new();
        for field in schema.fields() {
            let Some(pattern) = &field.pattern else {
                continue;
            };
            // anchored at the start, like a prefix match
            match Regex::new(&format!("^(?:{})", pattern.pattern)) {
                Ok(re) => {
                    patterns.insert(field.key.clone(), re);
                }
                Err(e) => {
                    tracing::warn!("Ignoring invalid pattern on {}: {}", field.key, e);
                }
            }
        }
        Self { patterns }
    }

    /// Check `state` against `schema`
    #[must_use]
    pub fn validate(&self, schema: &Schema, state: &FormState) -> ValidationReport {
        let mut errors = Vec::new();

        for field in schema.fields() {
            if field.required {
                if let Some(message) = Self::required_violation(field, state) {
                    errors.push(message);
                }
            }
            if let (Some(re), Some(value)) = (self.patterns.get(&field.key), state.value(&field.key)) {
                if !blank(value) && !re.is_match(&reportform_schema::value_as_text(value)) {
                    let message = field
                        .pattern
                        .as_ref()
                        .and_then(|p| p.message.clone())
                        .unwrap_or_else(|| format!("字段 '{}' 格式不正确", label(field)));
                    errors.push(message);
                }
            }
        }

        for rule in schema.validation_rules() {
            if rule.rule != "required" {
                tracing::debug!("Skipping unsupported validation rule '{}'", rule.rule);
                continue;
            }
            let missing = rule.fields.iter().any(|key| match state.get(key) {
                Some(FieldValue::Value(v)) => blank(v),
                Some(FieldValue::Records(list)) => list.is_empty(),
                None => true,
            });
            if missing {
                let message = if rule.message.is_empty() {
                    format!("字段 {} 为必填项", rule.fields.join(", "))
                } else {
                    rule.message.clone()
                };
                errors.push(message);
            }
        }

        if !errors.is_empty() {
            tracing::debug!("Validation of {} failed: {} errors", schema.id(), errors.len());
        }
        ValidationReport::from_errors(errors)
    }

    fn required_violation(field: &FieldDefinition, state: &FormState) -> Option<String> {
        let required = || format!("字段 '{}' 为必填项", label(field));
        match state.get(&field.key) {
            None => Some(required()),
            Some(FieldValue::Records(list)) => {
                if list.is_empty() {
                    return Some(required());
                }
                let locator = match field.field_type {
                    FieldType::TargetList => field.locator_column(),
                    _ => None,
                }?;
                let located = list.iter().any(|item| {
                    item.record.get(locator).is_some_and(|v| !blank(v))
                });
                (!located).then(|| {
                    format!("字段 '{}' 至少需要一个有效的 {}", label(field), locator)
                })
            }
            Some(FieldValue::Value(value)) => {
                let missing = match field.field_type {
                    FieldType::Image => !has_image_path(value),
                    FieldType::Checkbox => value != &Value::Bool(true),
                    _ => blank(value),
                };
                missing.then(required)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::RepeatingListController;
    use serde_json::json;

    const FORM: &str = r#"
id: form
fields:
  - {key: unit_name, label: 单位名称, required: true}
  - {key: screenshot, type: image, required: true}
  - {key: shots, type: image_list, required: true}
  - {key: targets, label: 测试目标, type: target_list, required: true, columns: [{key: system}, {key: url}]}
  - key: phone
    validation: {pattern: "1[0-9]{10}$", message: 手机号格式不正确}
  - {key: optional}
validation:
  rules:
    - {fields: [phone, optional], rule: required, message: 请填写联系方式}
"#;

    fn filled() -> (Schema, FormState) {
        let schema = Schema::load(FORM).unwrap();
        let mut state = FormState::new();
        state.set("unit_name", json!("某单位"));
        state.set("screenshot", json!({"path": "uploads/a.png", "url": "/a.png"}));
        state.set("shots", json!([{"path": "uploads/b.png"}]));
        state.set("phone", json!("13800000000"));
        state.set("optional", json!("x"));
        let ctl = RepeatingListController::new(&schema, "Item {n}");
        let id = ctl.add_item(&mut state, "targets").unwrap();
        ctl.set_item_field(&mut state, "targets", id, "url", json!("10.0.0.1")).unwrap();
        (schema, state)
    }

    #[test]
    fn complete_form_is_valid() {
        let (schema, state) = filled();
        let report = ValidationEngine::new(&schema).validate(&schema, &state);
        assert!(report.valid, "{:?}", report.errors);
    }

    #[test]
    fn whitespace_is_empty() {
        let (schema, mut state) = filled();
        state.set("unit_name", json!("   "));
        let report = ValidationEngine::new(&schema).validate(&schema, &state);
        assert_eq!(report.errors, vec!["字段 '单位名称' 为必填项"]);
    }

    #[test]
    fn image_needs_path() {
        let (schema, mut state) = filled();
        state.set("screenshot", json!({"url": "/a.png"}));
        state.set("shots", json!([]));
        let report = ValidationEngine::new(&schema).validate(&schema, &state);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn target_list_needs_a_locator() {
        let (schema, mut state) = filled();
        let ctl = RepeatingListController::new(&schema, "Item {n}");
        let engine = ValidationEngine::new(&schema);

        let id = state.records("targets").unwrap().ids()[0];
        ctl.set_item_field(&mut state, "targets", id, "url", json!(" ")).unwrap();
        ctl.set_item_field(&mut state, "targets", id, "system", json!("OA")).unwrap();
        let report = engine.validate(&schema, &state);
        assert_eq!(report.errors, vec!["字段 '测试目标' 至少需要一个有效的 url"]);

        ctl.remove_item(&mut state, "targets", id).unwrap();
        let report = engine.validate(&schema, &state);
        assert_eq!(report.errors, vec!["字段 '测试目标' 为必填项"]);
    }

    #[test]
    fn pattern_and_rule_messages() {
        let (schema, mut state) = filled();
        state.set("phone", json!("12345"));
        state.set("optional", json!(""));
        let report = ValidationEngine::new(&schema).validate(&schema, &state);
        assert_eq!(report.errors, vec!["手机号格式不正确", "请填写联系方式"]);
    }

    #[test]
    fn validate_does_not_mutate() {
        let (schema, state) = filled();
        let before = state.clone();
        let _ = ValidationEngine::new(&schema).validate(&schema, &state);
        assert_eq!(state, before);
    }
}
