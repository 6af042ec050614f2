//! Repeating lists with stable item identity
//!
//! Items are addressed by [`ItemId`] only. Positions exist for display
//! numbering and nothing else, so removing item N never disturbs the
//! bindings of the items after it.

use crate::error::ListError;
use crate::state::{FieldValue, FormState};
use crate::types::{ItemId, SchemaGeneration};
use indexmap::IndexMap;
use reportform_schema::{get_path, ColumnDefinition, FieldDefinition, FieldType, Schema};
use serde_json::{Map, Value};

/// One record of a repeating list
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatingItem {
    /// Identity assigned at creation
    pub id: ItemId,
    /// Column values
    pub record: Map<String, Value>,
    /// Display label, recomputed by reindex
    pub label: String,
}

/// Ordered items of one list field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepeatingList {
    items: IndexMap<ItemId, RepeatingItem>,
}

impl RepeatingList {
    /// Create empty list
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list has no items
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item by identity
    #[must_use]
    pub fn get(&self, id: ItemId) -> Option<&RepeatingItem> {
        self.items.get(&id)
    }

    /// Mutable item by identity
    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut RepeatingItem> {
        self.items.get_mut(&id)
    }

    /// Items in display order
    pub fn iter(&self) -> impl Iterator<Item = &RepeatingItem> {
        self.items.values()
    }

    /// Identities in display order
    #[must_use]
    pub fn ids(&self) -> Vec<ItemId> {
        self.items.keys().copied().collect()
    }

    /// Current display position of an item
    #[must_use]
    pub fn position(&self, id: ItemId) -> Option<usize> {
        self.items.get_index_of(&id)
    }

    fn push(&mut self, item: RepeatingItem) {
        self.items.insert(item.id, item);
    }

    fn remove(&mut self, id: ItemId) -> Option<RepeatingItem> {
        self.items.shift_remove(&id)
    }

    fn move_to(&mut self, id: ItemId, position: usize) -> bool {
        match self.items.get_index_of(&id) {
            Some(from) => {
                let to = position.min(self.items.len().saturating_sub(1));
                self.items.move_index(from, to);
                true
            }
            None => false,
        }
    }

    /// Records as a JSON array, without identities
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.items
                .values()
                .map(|item| Value::Object(item.record.clone()))
                .collect(),
        )
    }
}

/// Pending library fill for one item
///
/// Issued by [`RepeatingListController::begin_library_fill`]; the result is
/// applied to `item_id` only, and only while `generation` is still active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryTicket {
    /// Schema generation at issue time
    pub generation: SchemaGeneration,
    /// List field
    pub list_key: String,
    /// Item to fill
    pub item_id: ItemId,
    /// Reference endpoint
    pub endpoint: String,
    /// Entity requested from the library
    pub entity_id: String,
}

/// Empty value for a column of the given type
#[must_use]
pub fn empty_cell(field_type: FieldType) -> Value {
    match field_type {
        FieldType::ImageList | FieldType::CheckboxGroup => Value::Array(Vec::new()),
        FieldType::Checkbox => Value::Bool(false),
        FieldType::Image => Value::Null,
        _ => Value::String(String::new()),
    }
}

/// Add, remove, move and fill items of repeating lists
#[derive(Debug, Clone, Copy)]
pub struct RepeatingListController<'a> {
    schema: &'a Schema,
    label_fallback: &'a str,
}

impl<'a> RepeatingListController<'a> {
    /// Create controller; `label_fallback` is used when a list declares no `item_label`
    #[must_use]
    pub fn new(schema: &'a Schema, label_fallback: &'a str) -> Self {
        Self {
            schema,
            label_fallback,
        }
    }

    fn list_field(&self, list_key: &str) -> Result<&'a FieldDefinition, ListError> {
        self.schema
            .field(list_key)
            .filter(|f| f.field_type.is_repeating())
            .ok_or_else(|| ListError::NotAList(list_key.to_string()))
    }

    fn columns(field: &FieldDefinition) -> &[ColumnDefinition] {
        field.list.as_ref().map_or(&[], |l| l.columns.as_slice())
    }

    fn list_mut<'s>(
        state: &'s mut FormState,
        list_key: &str,
    ) -> Result<&'s mut RepeatingList, ListError> {
        if !matches!(state.get(list_key), Some(FieldValue::Records(_))) {
            state.set(list_key, FieldValue::Records(RepeatingList::new()));
        }
        state
            .records_mut(list_key)
            .ok_or_else(|| ListError::NotAList(list_key.to_string()))
    }

    /// Append a blank item and return its identity
    ///
    /// # Errors
    /// `ListError::NotAList` if `list_key` is not a repeating-list field
    pub fn add_item(&self, state: &mut FormState, list_key: &str) -> Result<ItemId, ListError> {
        let field = self.list_field(list_key)?;
        let record: Map<String, Value> = Self::columns(field)
            .iter()
            .map(|c| (c.key.clone(), empty_cell(c.field_type)))
            .collect();
        let id = state.allocate_item_id();
        Self::list_mut(state, list_key)?.push(RepeatingItem {
            id,
            record,
            label: String::new(),
        });
        self.reindex(state, list_key)?;
        tracing::debug!("Added {} to {}", id, list_key);
        Ok(id)
    }

    /// Remove an item; siblings keep their identities and records
    ///
    /// # Errors
    /// `ListError::UnknownItem` if the item is not in the list
    pub fn remove_item(
        &self,
        state: &mut FormState,
        list_key: &str,
        item_id: ItemId,
    ) -> Result<(), ListError> {
        self.list_field(list_key)?;
        Self::list_mut(state, list_key)?
            .remove(item_id)
            .ok_or_else(|| ListError::UnknownItem {
                list: list_key.to_string(),
                item: item_id,
            })?;
        self.reindex(state, list_key)?;
        tracing::debug!("Removed {} from {}", item_id, list_key);
        Ok(())
    }

    /// Move an item to `position`, clamped to the end of the list
    ///
    /// # Errors
    /// `ListError::UnknownItem` if the item is not in the list
    pub fn move_item(
        &self,
        state: &mut FormState,
        list_key: &str,
        item_id: ItemId,
        position: usize,
    ) -> Result<(), ListError> {
        self.list_field(list_key)?;
        if !Self::list_mut(state, list_key)?.move_to(item_id, position) {
            return Err(ListError::UnknownItem {
                list: list_key.to_string(),
                item: item_id,
            });
        }
        self.reindex(state, list_key)?;
        Ok(())
    }

    /// Recompute display labels and the declared item counter
    ///
    /// Returns the counter field when one was written. Identities are never
    /// touched.
    ///
    /// # Errors
    /// `ListError::NotAList` if `list_key` is not a repeating-list field
    pub fn reindex(&self, state: &mut FormState, list_key: &str) -> Result<Option<String>, ListError> {
        let field = self.list_field(list_key)?;
        let spec = field.list.as_ref();
        let template = spec
            .and_then(|l| l.item_label.as_deref())
            .unwrap_or(self.label_fallback);

        let list = Self::list_mut(state, list_key)?;
        for (position, item) in list.items.values_mut().enumerate() {
            item.label = template.replace("{n}", &(position + 1).to_string());
        }
        let count = list.len();

        match spec.and_then(|l| l.count_field.as_ref()) {
            Some(count_field) => {
                state.set(count_field, Value::from(count as u64));
                Ok(Some(count_field.clone()))
            }
            None => Ok(None),
        }
    }

    /// Write one column of one item
    ///
    /// # Errors
    /// - `ListError::UnknownColumn` if the column is not declared
    /// - `ListError::UnknownItem` if the item is not in the list
    pub fn set_item_field(
        &self,
        state: &mut FormState,
        list_key: &str,
        item_id: ItemId,
        column: &str,
        value: Value,
    ) -> Result<(), ListError> {
        let field = self.list_field(list_key)?;
        if !Self::columns(field).iter().any(|c| c.key == column) {
            return Err(ListError::UnknownColumn {
                list: list_key.to_string(),
                column: column.to_string(),
            });
        }
        let item = Self::list_mut(state, list_key)?
            .get_mut(item_id)
            .ok_or_else(|| ListError::UnknownItem {
                list: list_key.to_string(),
                item: item_id,
            })?;
        item.record.insert(column.to_string(), value);
        Ok(())
    }

    /// Read one column of one item
    ///
    /// # Errors
    /// `ListError::UnknownItem` if the item is not in the list
    pub fn item_field<'s>(
        &self,
        state: &'s FormState,
        list_key: &str,
        item_id: ItemId,
        column: &str,
    ) -> Result<Option<&'s Value>, ListError> {
        self.list_field(list_key)?;
        let item = state
            .records(list_key)
            .and_then(|list| list.get(item_id))
            .ok_or_else(|| ListError::UnknownItem {
                list: list_key.to_string(),
                item: item_id,
            })?;
        Ok(item.record.get(column))
    }

    /// Start filling one item from the list's reference library
    ///
    /// # Errors
    /// - `ListError::NoLibrary` if the list declares no library
    /// - `ListError::UnknownItem` if the item is not in the list
    pub fn begin_library_fill(
        &self,
        state: &FormState,
        generation: SchemaGeneration,
        list_key: &str,
        item_id: ItemId,
        entity_id: &str,
    ) -> Result<LibraryTicket, ListError> {
        let field = self.list_field(list_key)?;
        let library = field
            .list
            .as_ref()
            .and_then(|l| l.library.as_ref())
            .ok_or_else(|| ListError::NoLibrary(list_key.to_string()))?;
        if state.records(list_key).and_then(|l| l.get(item_id)).is_none() {
            return Err(ListError::UnknownItem {
                list: list_key.to_string(),
                item: item_id,
            });
        }
        Ok(LibraryTicket {
            generation,
            list_key: list_key.to_string(),
            item_id,
            endpoint: library.endpoint.clone(),
            entity_id: entity_id.to_string(),
        })
    }

    /// Apply a library record to the ticket's item
    ///
    /// Returns the columns written. Nothing is written, and `None` is
    /// returned, when the generation moved on or the item was removed in the
    /// meantime.
    pub fn complete_library_fill(
        &self,
        state: &mut FormState,
        active: SchemaGeneration,
        ticket: &LibraryTicket,
        record: &Value,
    ) -> Option<Vec<String>> {
        if ticket.generation != active {
            tracing::debug!(
                "Discarding library fill for {} from {} (active {})",
                ticket.item_id,
                ticket.generation,
                active
            );
            return None;
        }
        let field = self.list_field(&ticket.list_key).ok()?;
        let spec = field.list.as_ref()?;
        let mapping = spec.library.as_ref().map(|l| &l.mapping);

        let writes: Vec<(String, Value)> = match mapping {
            Some(mapping) if !mapping.is_empty() => mapping
                .iter()
                .filter(|(column, _)| spec.column(column).is_some())
                .filter_map(|(column, path)| {
                    get_path(record, path).map(|v| (column.clone(), v.clone()))
                })
                .collect(),
            _ => spec
                .columns
                .iter()
                .filter_map(|c| record.get(&c.key).map(|v| (c.key.clone(), v.clone())))
                .collect(),
        };

        let Some(item) = state
            .records_mut(&ticket.list_key)
            .and_then(|l| l.get_mut(ticket.item_id))
        else {
            tracing::debug!(
                "Discarding library fill for removed {} in {}",
                ticket.item_id,
                ticket.list_key
            );
            return None;
        };
        let columns = writes.iter().map(|(c, _)| c.clone()).collect();
        for (column, value) in writes {
            item.record.insert(column, value);
        }
        Some(columns)
    }
}

/// Widget id of one item cell
#[must_use]
pub fn cell_widget_id(list_key: &str, item_id: ItemId, column: &str) -> String {
    format!("{list_key}::{}::{column}", item_id.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LISTS: &str = r#"
id: lists
fields:
  - key: vulns
    type: vuln_list
    item_label: "漏洞 {n}"
    count_field: vuln_count
    columns:
      - {key: vuln_name}
      - {key: vuln_level, type: select, options: [高危, 中危]}
      - {key: evidence, type: image_list}
    library:
      endpoint: vulnerability
      mapping: {vuln_name: name, vuln_level: detail.level}
  - {key: vuln_count}
  - {key: testers, type: tester_list, columns: [{key: name}]}
  - {key: plain}
"#;

    fn schema() -> Schema {
        Schema::load(LISTS).unwrap()
    }

    #[test]
    fn add_item_allocates_fresh_ids_and_labels() {
        let schema = schema();
        let ctl = RepeatingListController::new(&schema, "Item {n}");
        let mut state = FormState::new();

        let a = ctl.add_item(&mut state, "vulns").unwrap();
        let b = ctl.add_item(&mut state, "vulns").unwrap();
        assert_ne!(a, b);

        let list = state.records("vulns").unwrap();
        assert_eq!(list.get(b).unwrap().label, "漏洞 2");
        assert_eq!(list.get(a).unwrap().record["evidence"], json!([]));
        assert_eq!(state.value("vuln_count"), Some(&json!(2)));
    }

    #[test]
    fn fallback_label_without_item_label() {
        let schema = schema();
        let ctl = RepeatingListController::new(&schema, "Item {n}");
        let mut state = FormState::new();
        let id = ctl.add_item(&mut state, "testers").unwrap();
        assert_eq!(state.records("testers").unwrap().get(id).unwrap().label, "Item 1");
    }

    #[test]
    fn remove_keeps_sibling_identity() {
        let schema = schema();
        let ctl = RepeatingListController::new(&schema, "Item {n}");
        let mut state = FormState::new();
        let ids: Vec<_> = (0..3).map(|_| ctl.add_item(&mut state, "vulns").unwrap()).collect();
        ctl.set_item_field(&mut state, "vulns", ids[2], "vuln_name", json!("XSS")).unwrap();

        ctl.remove_item(&mut state, "vulns", ids[1]).unwrap();
        let list = state.records("vulns").unwrap();
        assert_eq!(list.ids(), vec![ids[0], ids[2]]);
        assert_eq!(list.get(ids[2]).unwrap().record["vuln_name"], json!("XSS"));
        assert_eq!(list.get(ids[2]).unwrap().label, "漏洞 2");

        // ids are never reused
        let d = ctl.add_item(&mut state, "vulns").unwrap();
        assert!(!ids.contains(&d));
    }

    #[test]
    fn remove_unknown_item_fails() {
        let schema = schema();
        let ctl = RepeatingListController::new(&schema, "Item {n}");
        let mut state = FormState::new();
        let err = ctl.remove_item(&mut state, "vulns", ItemId(99)).unwrap_err();
        assert!(matches!(err, ListError::UnknownItem { .. }));
    }

    #[test]
    fn non_list_field_is_rejected() {
        let schema = schema();
        let ctl = RepeatingListController::new(&schema, "Item {n}");
        let mut state = FormState::new();
        assert_eq!(
            ctl.add_item(&mut state, "plain").unwrap_err(),
            ListError::NotAList("plain".to_string())
        );
    }

    #[test]
    fn move_item_clamps_and_relabels() {
        let schema = schema();
        let ctl = RepeatingListController::new(&schema, "Item {n}");
        let mut state = FormState::new();
        let a = ctl.add_item(&mut state, "vulns").unwrap();
        let b = ctl.add_item(&mut state, "vulns").unwrap();

        ctl.move_item(&mut state, "vulns", a, 10).unwrap();
        let list = state.records("vulns").unwrap();
        assert_eq!(list.ids(), vec![b, a]);
        assert_eq!(list.get(a).unwrap().label, "漏洞 2");
    }

    #[test]
    fn unknown_column_is_rejected() {
        let schema = schema();
        let ctl = RepeatingListController::new(&schema, "Item {n}");
        let mut state = FormState::new();
        let a = ctl.add_item(&mut state, "vulns").unwrap();
        let err = ctl
            .set_item_field(&mut state, "vulns", a, "ghost", json!("x"))
            .unwrap_err();
        assert!(matches!(err, ListError::UnknownColumn { .. }));
    }

    #[test]
    fn library_fill_targets_one_item() {
        let schema = schema();
        let ctl = RepeatingListController::new(&schema, "Item {n}");
        let mut state = FormState::new();
        let a = ctl.add_item(&mut state, "vulns").unwrap();
        let b = ctl.add_item(&mut state, "vulns").unwrap();

        let generation = SchemaGeneration(1);
        let ticket = ctl
            .begin_library_fill(&state, generation, "vulns", b, "SQL注入")
            .unwrap();
        let record = json!({"name": "SQL注入", "detail": {"level": "高危"}});
        let written = ctl
            .complete_library_fill(&mut state, generation, &ticket, &record)
            .unwrap();
        assert_eq!(written, vec!["vuln_name", "vuln_level"]);

        assert_eq!(ctl.item_field(&state, "vulns", b, "vuln_level").unwrap(), Some(&json!("高危")));
        assert_eq!(ctl.item_field(&state, "vulns", a, "vuln_name").unwrap(), Some(&json!("")));
    }

    #[test]
    fn library_fill_discarded_after_remove_or_reload() {
        let schema = schema();
        let ctl = RepeatingListController::new(&schema, "Item {n}");
        let mut state = FormState::new();
        let a = ctl.add_item(&mut state, "vulns").unwrap();
        let record = json!({"name": "XSS"});

        let ticket = ctl
            .begin_library_fill(&state, SchemaGeneration(1), "vulns", a, "XSS")
            .unwrap();
        assert!(ctl
            .complete_library_fill(&mut state, SchemaGeneration(2), &ticket, &record)
            .is_none());

        ctl.remove_item(&mut state, "vulns", a).unwrap();
        assert!(ctl
            .complete_library_fill(&mut state, SchemaGeneration(1), &ticket, &record)
            .is_none());
    }

    #[test]
    fn library_requires_configuration() {
        let schema = schema();
        let ctl = RepeatingListController::new(&schema, "Item {n}");
        let mut state = FormState::new();
        let a = ctl.add_item(&mut state, "testers").unwrap();
        assert_eq!(
            ctl.begin_library_fill(&state, SchemaGeneration(1), "testers", a, "x")
                .unwrap_err(),
            ListError::NoLibrary("testers".to_string())
        );
    }

    #[test]
    fn widget_ids_encode_identity() {
        assert_eq!(cell_widget_id("vulns", ItemId(4), "vuln_name"), "vulns::4::vuln_name");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    const LIST: &str = r#"
id: lists
fields:
  - key: vulns
    type: vuln_list
    item_label: "漏洞 {n}"
    count_field: vuln_count
    columns: [{key: vuln_name}]
  - {key: vuln_count}
"#;

    #[derive(Debug, Clone)]
    enum Op {
        Add,
        Remove(usize),
        Move(usize, usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Add),
            (0usize..8).prop_map(Op::Remove),
            (0usize..8, 0usize..10).prop_map(|(i, p)| Op::Move(i, p)),
        ]
    }

    proptest! {
        #[test]
        fn labels_track_positions_and_ids_stay_unique(ops in prop::collection::vec(op(), 0..40)) {
            let schema = Schema::load(LIST).unwrap();
            let ctl = RepeatingListController::new(&schema, "Item {n}");
            let mut state = FormState::new();
            let mut issued = Vec::new();

            for op in ops {
                let ids = state.records("vulns").map(RepeatingList::ids).unwrap_or_default();
                match op {
                    Op::Add => issued.push(ctl.add_item(&mut state, "vulns").unwrap()),
                    Op::Remove(i) if !ids.is_empty() => {
                        ctl.remove_item(&mut state, "vulns", ids[i % ids.len()]).unwrap();
                    }
                    Op::Move(i, p) if !ids.is_empty() => {
                        ctl.move_item(&mut state, "vulns", ids[i % ids.len()], p).unwrap();
                    }
                    _ => {}
                }
            }

            let mut sorted = issued.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), issued.len());

            if let Some(list) = state.records("vulns") {
                for (position, item) in list.iter().enumerate() {
                    prop_assert_eq!(&item.label, &format!("漏洞 {}", position + 1));
                    prop_assert!(issued.contains(&item.id));
                }
                prop_assert_eq!(state.value("vuln_count"), Some(&Value::from(list.len() as u64)));
            }
        }
    }
}
