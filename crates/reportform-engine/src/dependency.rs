//! Cross-field cascade
//!
//! A change to one field runs four phases, in this order and at most once each:
//!
//! ```text
//! set(key) → computed fields of key
//!          → behaviors on key (compute now, api_call as PendingLookup)
//!          → presets of key (+ computed fields of preset targets)
//!          → aggregates, when an input changed (+ presets of the rating)
//! ```
//!
//! Preset cycles are rejected when the schema loads, so the cascade needs no
//! runtime cycle detection. Nothing here blocks on I/O: reference lookups are
//! returned to the caller, which resolves them later and writes the results
//! back through [`DependencyEngine::on_field_changed`].

use crate::aggregate;
use crate::state::FormState;
use crate::types::SchemaGeneration;
use indexmap::IndexMap;
use reportform_schema::{value_as_text, BehaviorAction, FieldDefinition, Schema, TriggerEvent};
use serde_json::Value;

/// Reference lookup requested by an `api_call` action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLookup {
    /// Generation the lookup was issued under
    pub generation: SchemaGeneration,
    /// Field whose change issued the lookup
    pub trigger: String,
    /// Reference endpoint
    pub endpoint: String,
    /// Entity id
    pub id: String,
    /// Target field to result path
    pub result_mapping: IndexMap<String, String>,
}

/// Outcome of one cascade
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cascade {
    /// Keys written, first write order, no duplicates
    pub changed: Vec<String>,
    /// Lookups to resolve after the cascade
    pub lookups: Vec<PendingLookup>,
    /// Absorbed problems, for display
    pub warnings: Vec<String>,
}

impl Cascade {
    fn touch(&mut self, key: &str) {
        if !self.touched(key) {
            self.changed.push(key.to_string());
        }
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    /// Whether `key` was written
    #[must_use]
    pub fn touched(&self, key: &str) -> bool {
        self.changed.iter().any(|k| k == key)
    }

    /// Whether nothing happened
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.lookups.is_empty() && self.warnings.is_empty()
    }

    /// Fold a follow-up cascade into this one
    pub fn merge(&mut self, other: Cascade) {
        for key in &other.changed {
            self.touch(key);
        }
        self.lookups.extend(other.lookups);
        self.warnings.extend(other.warnings);
    }
}

/// Runs cascades against one schema
#[derive(Debug, Clone, Copy)]
pub struct DependencyEngine<'a> {
    schema: &'a Schema,
    generation: SchemaGeneration,
}

impl<'a> DependencyEngine<'a> {
    /// Create engine for `schema`
    #[must_use]
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            generation: SchemaGeneration::default(),
        }
    }

    /// Stamp issued lookups with `generation`
    #[must_use]
    pub fn with_generation(mut self, generation: SchemaGeneration) -> Self {
        self.generation = generation;
        self
    }

    /// Store `new_value` under `key` and run the cascade
    pub fn on_field_changed(&self, state: &mut FormState, key: &str, new_value: Value) -> Cascade {
        let mut cascade = Cascade::default();
        if self.is_list(key) {
            cascade.warn(format!("'{key}' is a repeating list and cannot take a plain value"));
            return cascade;
        }
        tracing::debug!("Cascade from {}", key);

        let trigger_text = value_as_text(&new_value);
        state.set(key, new_value);
        cascade.touch(key);

        self.derive_computed(state, key, &mut cascade);
        self.run_behaviors(state, key, &trigger_text, TriggerEvent::Change, &mut cascade);
        self.apply_presets(state, key, &mut cascade);
        let needed = self.aggregate_input_touched(&cascade);
        self.recompute_aggregates(state, needed, &mut cascade);
        cascade
    }

    /// Run behaviors bound to the blur event of `key`
    pub fn on_field_blurred(&self, state: &mut FormState, key: &str) -> Cascade {
        let mut cascade = Cascade::default();
        let trigger_text = state.text(key);
        self.run_behaviors(state, key, &trigger_text, TriggerEvent::Blur, &mut cascade);
        cascade
    }

    /// Follow-up after items were added, removed or moved
    ///
    /// `count_field` is the counter written by reindex, if any.
    pub fn on_list_changed(
        &self,
        state: &mut FormState,
        list_key: &str,
        count_field: Option<&str>,
    ) -> Cascade {
        let mut cascade = Cascade::default();
        cascade.touch(list_key);
        if let Some(count_field) = count_field {
            cascade.touch(count_field);
            self.derive_computed(state, count_field, &mut cascade);
            self.apply_presets(state, count_field, &mut cascade);
        }
        let needed = self.aggregate_input_touched(&cascade);
        self.recompute_aggregates(state, needed, &mut cascade);
        cascade
    }

    /// Follow-up after one item cell was written
    pub fn on_item_changed(&self, state: &mut FormState, list_key: &str, column: &str) -> Cascade {
        let mut cascade = Cascade::default();
        cascade.touch(list_key);
        let needed = self.schema.aggregates().is_some_and(|spec| {
            spec.source_list.as_deref() == Some(list_key) && spec.level_column == column
        });
        self.recompute_aggregates(state, needed, &mut cascade);
        cascade
    }

    /// Settle every derived field once, used after a reset
    ///
    /// Behaviors are not run; no lookups are issued.
    pub fn settle(&self, state: &mut FormState) -> Cascade {
        let mut cascade = Cascade::default();
        for field in self.schema.fields() {
            if let Some(compute) = &field.compute {
                let value = rule_value(&compute.rules, &state.text(&compute.from));
                state.set(&field.key, value);
                cascade.touch(&field.key);
            }
        }
        for field in self.schema.fields().iter().filter(|f| !f.presets.is_empty()) {
            self.apply_presets(state, &field.key, &mut cascade);
        }
        self.recompute_aggregates(state, true, &mut cascade);
        cascade
    }

    fn is_list(&self, key: &str) -> bool {
        self.schema
            .field(key)
            .is_some_and(|f| f.field_type.is_repeating())
    }

    fn derive_computed(&self, state: &mut FormState, source: &str, cascade: &mut Cascade) {
        let text = state.text(source);
        for field in self.schema.computed_from(source) {
            let Some(compute) = &field.compute else {
                continue;
            };
            state.set(&field.key, rule_value(&compute.rules, &text));
            cascade.touch(&field.key);
        }
    }

    fn run_behaviors(
        &self,
        state: &mut FormState,
        key: &str,
        trigger_text: &str,
        event: TriggerEvent,
        cascade: &mut Cascade,
    ) {
        for behavior in self.schema.behaviors_for(key) {
            if behavior.trigger.event != event {
                continue;
            }
            for action in &behavior.actions {
                match action {
                    BehaviorAction::Compute {
                        target,
                        rules,
                        expression,
                    } => {
                        if self.is_list(target) {
                            cascade.warn(format!(
                                "behavior '{}' cannot compute repeating list '{target}'",
                                behavior.id
                            ));
                            continue;
                        }
                        let value = match expression {
                            Some(expr) => Value::String(substitute_expression(expr, state)),
                            None => rule_value(rules, trigger_text),
                        };
                        state.set(target, value);
                        cascade.touch(target);
                    }
                    BehaviorAction::ApiCall {
                        endpoint,
                        params,
                        result_mapping,
                    } => {
                        let id = params.get("id").map_or_else(
                            || trigger_text.to_string(),
                            |template| substitute_expression(template, state),
                        );
                        if id.trim().is_empty() {
                            tracing::debug!("Skipping {} lookup for empty {}", endpoint, key);
                            continue;
                        }
                        cascade.lookups.push(PendingLookup {
                            generation: self.generation,
                            trigger: key.to_string(),
                            endpoint: endpoint.clone(),
                            id: id.trim().to_string(),
                            result_mapping: result_mapping.clone(),
                        });
                    }
                }
            }
        }
    }

    fn apply_presets(&self, state: &mut FormState, key: &str, cascade: &mut Cascade) {
        let Some(field) = self.schema.field(key) else {
            return;
        };
        let trigger = state.text(key);
        let Some(targets) = field.presets.get(&trigger) else {
            return;
        };
        tracing::debug!("Applying preset '{}' of {}", trigger, key);

        for (target, preset) in targets {
            let Some(def) = self.schema.field(target) else {
                continue;
            };
            if def.field_type.is_repeating() {
                cascade.warn(format!(
                    "preset '{trigger}' of '{key}' targets repeating list '{target}'; ignored"
                ));
                continue;
            }
            let value = match preset {
                Value::Array(items) => Value::Array(selectable(def, items)),
                Value::String(text) => Value::String(substitute_markers(text, state)),
                other => other.clone(),
            };
            state.set(target, value);
            cascade.touch(target);
            self.derive_computed(state, target, cascade);
        }
    }

    fn aggregate_input_touched(&self, cascade: &Cascade) -> bool {
        self.schema
            .aggregates()
            .is_some_and(|spec| spec.inputs().iter().any(|k| cascade.touched(k)))
    }

    fn recompute_aggregates(&self, state: &mut FormState, needed: bool, cascade: &mut Cascade) {
        let Some(spec) = self.schema.aggregates() else {
            return;
        };
        if !needed {
            return;
        }
        for (key, value) in aggregate::recompute(spec, state) {
            state.set(&key, value);
            cascade.touch(&key);
        }
        if let Some(rating) = &spec.rating {
            self.apply_presets(state, rating, cascade);
        }
    }
}

fn rule_value(rules: &IndexMap<String, Value>, key: &str) -> Value {
    rules
        .get(key)
        .cloned()
        .unwrap_or_else(|| Value::String(String::new()))
}

/// Checkbox-group selection limited to the field's static options
fn selectable(field: &FieldDefinition, items: &[Value]) -> Vec<Value> {
    if field.options.is_empty() {
        return items.to_vec();
    }
    items
        .iter()
        .filter(|item| {
            let text = value_as_text(item);
            field.options.iter().any(|o| o.value == text)
        })
        .cloned()
        .collect()
}

fn is_key(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Replace `${key}` with the field's text; unknown keys read as ""
#[must_use]
pub fn substitute_expression(template: &str, state: &FormState) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        out.push_str(&state.text(after[..close].trim()));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Replace `#key#` with the field's text; other `#` are kept
#[must_use]
pub fn substitute_markers(template: &str, state: &FormState) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('#') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('#') {
            Some(close) if is_key(&after[..close]) => {
                out.push_str(&state.text(&after[..close]));
                rest = &after[close + 1..];
            }
            _ => {
                out.push('#');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const CASCADE: &str = r##"
id: cascade
fields:
  - {key: system_name}
  - {key: hazard_level, type: select, options: [高危, 中危, 低危]}
  - key: alert_level
    computed: true
    compute_from: hazard_level
    compute_rule: {高危: 2级, 中危: 3级}
  - key: vuln_type
    presets:
      弱口令:
        hazard_level: 高危
        description: "#system_name# 存在弱口令"
        checks: [登录, 不存在的项, 审计]
  - {key: description, type: textarea}
  - {key: checks, type: checkbox_group, options: [登录, 审计, 备份]}
  - {key: url}
  - {key: domain}
  - {key: unit_name}
  - {key: targets, type: target_list, columns: [{key: url}]}
behaviors:
  - id: domain_from_url
    trigger: {field: url}
    actions:
      - {type: compute, target: domain, expression: "host=${url}${ghost}"}
      - type: api_call
        endpoint: process-url
        params: {id: "${url}"}
        result_mapping: {unit_name: icp_info.unitName}
"##;

    const STATS: &str = r##"
id: stats
fields:
  - {key: system_name}
  - {key: critical}
  - {key: high}
  - {key: medium}
  - {key: low}
  - {key: info}
  - {key: total}
  - {key: vuln_summary}
  - key: risk
    presets:
      高风险: {conclusion: "#system_name# 存在高风险"}
  - {key: conclusion}
  - key: vulns
    type: vuln_list
    columns: [{key: vuln_name}, {key: vuln_level}]
aggregates:
  counts: {critical: critical, high: high, medium: medium, low: low, info: info}
  total: total
  summary: vuln_summary
  rating: risk
  rating_labels: {high: 高风险, medium: 中风险, low: 低风险}
"##;

    #[test]
    fn computed_field_follows_rule_table() {
        let schema = Schema::load(CASCADE).unwrap();
        let engine = DependencyEngine::new(&schema);
        let mut state = FormState::new();

        let cascade = engine.on_field_changed(&mut state, "hazard_level", json!("高危"));
        assert_eq!(state.text("alert_level"), "2级");
        assert_eq!(cascade.changed, vec!["hazard_level", "alert_level"]);

        // missing rule entry degrades to ""
        engine.on_field_changed(&mut state, "hazard_level", json!("低危"));
        assert_eq!(state.value("alert_level"), Some(&json!("")));
    }

    #[test]
    fn presets_substitute_and_filter() {
        let schema = Schema::load(CASCADE).unwrap();
        let engine = DependencyEngine::new(&schema);
        let mut state = FormState::new();
        state.set("system_name", json!("OA系统"));

        let cascade = engine.on_field_changed(&mut state, "vuln_type", json!("弱口令"));
        assert_eq!(state.text("description"), "OA系统 存在弱口令");
        assert_eq!(state.value("checks"), Some(&json!(["登录", "审计"])));
        // computed field of a preset target is re-derived
        assert_eq!(state.text("alert_level"), "2级");
        assert_eq!(
            cascade.changed,
            vec!["vuln_type", "hazard_level", "alert_level", "description", "checks"]
        );
    }

    #[test]
    fn behaviors_compute_and_queue_lookups() {
        let schema = Schema::load(CASCADE).unwrap();
        let engine = DependencyEngine::new(&schema).with_generation(SchemaGeneration(3));
        let mut state = FormState::new();

        let cascade = engine.on_field_changed(&mut state, "url", json!("oa.example.com"));
        assert_eq!(state.text("domain"), "host=oa.example.com");
        assert_eq!(cascade.lookups.len(), 1);
        let lookup = &cascade.lookups[0];
        assert_eq!(lookup.generation, SchemaGeneration(3));
        assert_eq!(lookup.endpoint, "process-url");
        assert_eq!(lookup.id, "oa.example.com");
        assert_eq!(lookup.result_mapping["unit_name"], "icp_info.unitName");
        // nothing written for the lookup yet
        assert!(!state.contains("unit_name"));
    }

    #[test]
    fn empty_lookup_id_is_skipped() {
        let schema = Schema::load(CASCADE).unwrap();
        let engine = DependencyEngine::new(&schema);
        let mut state = FormState::new();
        let cascade = engine.on_field_changed(&mut state, "url", json!("  "));
        assert!(cascade.lookups.is_empty());
    }

    #[test]
    fn list_key_rejects_plain_value() {
        let schema = Schema::load(CASCADE).unwrap();
        let engine = DependencyEngine::new(&schema);
        let mut state = FormState::new();
        let cascade = engine.on_field_changed(&mut state, "targets", json!("x"));
        assert_eq!(cascade.warnings.len(), 1);
        assert!(!state.contains("targets"));
    }

    #[test]
    fn aggregates_recompute_and_rating_preset() {
        let schema = Schema::load(STATS).unwrap();
        let engine = DependencyEngine::new(&schema);
        let mut state = FormState::new();
        state.set("system_name", json!("OA系统"));

        engine.on_field_changed(&mut state, "high", json!("2"));
        assert_eq!(state.value("total"), Some(&json!(2)));
        assert_eq!(state.text("vuln_summary"), "高危2个");
        assert_eq!(state.text("risk"), "高风险");
        assert_eq!(state.text("conclusion"), "OA系统 存在高风险");

        engine.on_field_changed(&mut state, "high", json!("0"));
        assert_eq!(state.text("vuln_summary"), "无漏洞");
        assert_eq!(state.text("risk"), "低风险");
    }

    #[test]
    fn unrelated_edit_skips_aggregates() {
        let schema = Schema::load(STATS).unwrap();
        let engine = DependencyEngine::new(&schema);
        let mut state = FormState::new();
        let cascade = engine.on_field_changed(&mut state, "system_name", json!("CRM"));
        assert_eq!(cascade.changed, vec!["system_name"]);
        assert!(!state.contains("risk"));
    }

    #[test]
    fn settle_is_deterministic() {
        let schema = Schema::load(STATS).unwrap();
        let engine = DependencyEngine::new(&schema);
        let mut a = FormState::new();
        let mut b = FormState::new();
        engine.settle(&mut a);
        engine.settle(&mut b);
        assert_eq!(a, b);
        assert_eq!(a.text("risk"), "低风险");
    }

    #[test]
    fn marker_substitution_keeps_stray_hashes() {
        let mut state = FormState::new();
        state.set("name", json!("OA"));
        assert_eq!(substitute_markers("#name# C# #x y#", &state), "OA C# #x y#");
        assert_eq!(substitute_markers("#missing#!", &state), "!");
        assert_eq!(substitute_expression("${name}-${open", &state), "OA-${open");
    }
}
