//! Render tree: groups, fields and item cells bound to form state
//!
//! The tree is a plain value. The engine rebuilds single field nodes after a
//! cascade instead of the whole tree.

use crate::list::{cell_widget_id, RepeatingList};
use crate::services::ImageRef;
use crate::state::{FieldValue, FormState};
use crate::types::ItemId;
use reportform_schema::{
    value_as_text, ColumnDefinition, FieldDefinition, FieldType, Schema, SelectOption,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Widget of one field or cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Widget {
    /// Text input or textarea
    Text {
        /// Current text
        value: String,
        /// Rendered as a textarea
        multiline: bool,
        /// Textarea rows
        rows: u32,
    },
    /// Date picker
    Date {
        /// `YYYY-MM-DD` or empty
        value: String,
    },
    /// Dropdown, optionally with a filter box
    Select {
        /// Options after filtering
        options: Vec<SelectOption>,
        /// Selected value
        selected: String,
        /// Has a filter box
        searchable: bool,
        /// Active filter text
        query: String,
    },
    /// Toggle
    Checkbox {
        /// State
        checked: bool,
    },
    /// Multi-select
    CheckboxGroup {
        /// Available options
        options: Vec<SelectOption>,
        /// Selected values
        selected: Vec<String>,
    },
    /// Single image slot
    Image {
        /// Uploaded image
        image: Option<ImageRef>,
    },
    /// Bounded image gallery
    ImageList {
        /// Uploaded images
        images: Vec<ImageRef>,
        /// Maximum count
        max: u32,
    },
    /// Repeating list with at least one item
    List {
        /// Items in display order
        items: Vec<ItemNode>,
    },
    /// Repeating list without items
    EmptyList {
        /// Placeholder text
        message: String,
    },
}

/// One bound field or item cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldNode {
    /// Field or column key
    pub key: String,
    /// Binding id; `{list}::{item}::{column}` for cells
    pub widget_id: String,
    /// Display label
    pub label: String,
    /// Marked as required
    pub required: bool,
    /// Not editable
    pub readonly: bool,
    /// Input hint
    pub placeholder: String,
    /// Help text
    pub help_text: String,
    /// Widget
    pub widget: Widget,
}

/// One repeating-list item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemNode {
    /// Item identity
    pub id: ItemId,
    /// Display label, e.g. "漏洞 2"
    pub label: String,
    /// Cells in column order
    pub cells: Vec<FieldNode>,
}

/// One field group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupNode {
    /// Group id
    pub id: String,
    /// Display name
    pub name: String,
    /// Collapsed
    pub collapsed: bool,
    /// Visible fields in order
    pub fields: Vec<FieldNode>,
}

/// Inputs that are not part of the form state
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Resolved data-source options by source id
    pub source_options: &'a HashMap<String, Vec<SelectOption>>,
    /// Active search filters by field key
    pub filters: &'a HashMap<String, String>,
    /// Placeholder for empty lists
    pub empty_list_message: &'a str,
}

/// Whole editing surface for one schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderTree {
    /// Template id
    pub template_id: String,
    /// Template display name
    pub template_name: String,
    /// Groups in display order
    pub groups: Vec<GroupNode>,
}

impl RenderTree {
    /// Build the full tree
    #[must_use]
    pub fn build(schema: &Schema, state: &FormState, ctx: &RenderContext<'_>) -> Self {
        let groups = schema
            .groups()
            .iter()
            .map(|group| GroupNode {
                id: group.id.clone(),
                name: group.name.clone(),
                collapsed: group.collapsed,
                fields: schema
                    .fields_in_group(&group.id)
                    .into_iter()
                    .filter(|f| f.field_type != FieldType::Hidden)
                    .map(|f| field_node(f, state, ctx))
                    .collect(),
            })
            .collect();
        Self {
            template_id: schema.id().to_string(),
            template_name: schema.meta().name.clone(),
            groups,
        }
    }

    /// Rebuild the whole tree, keeping collapsed flags of surviving groups
    pub fn rebuild(&mut self, schema: &Schema, state: &FormState, ctx: &RenderContext<'_>) {
        let collapsed: HashMap<String, bool> = self
            .groups
            .iter()
            .map(|g| (g.id.clone(), g.collapsed))
            .collect();
        *self = Self::build(schema, state, ctx);
        for group in &mut self.groups {
            if let Some(flag) = collapsed.get(&group.id) {
                group.collapsed = *flag;
            }
        }
    }

    /// Rebuild the nodes of `keys`; returns the widget ids replaced
    pub fn patch(
        &mut self,
        schema: &Schema,
        state: &FormState,
        ctx: &RenderContext<'_>,
        keys: &[String],
    ) -> Vec<String> {
        let mut patched = Vec::new();
        for key in keys {
            let Some(field) = schema.field(key) else {
                continue;
            };
            if let Some(node) = self.field_mut(key) {
                *node = field_node(field, state, ctx);
                patched.push(node.widget_id.clone());
            }
        }
        patched
    }

    /// Flip the collapsed flag of a group; returns the new flag
    pub fn toggle_group(&mut self, group_id: &str) -> Option<bool> {
        let group = self.groups.iter_mut().find(|g| g.id == group_id)?;
        group.collapsed = !group.collapsed;
        Some(group.collapsed)
    }

    /// Group by id
    #[must_use]
    pub fn group(&self, group_id: &str) -> Option<&GroupNode> {
        self.groups.iter().find(|g| g.id == group_id)
    }

    /// Field node by key
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&FieldNode> {
        self.groups
            .iter()
            .flat_map(|g| g.fields.iter())
            .find(|f| f.key == key)
    }

    fn field_mut(&mut self, key: &str) -> Option<&mut FieldNode> {
        self.groups
            .iter_mut()
            .flat_map(|g| g.fields.iter_mut())
            .find(|f| f.key == key)
    }

    /// Cell node by widget id
    #[must_use]
    pub fn cell(&self, widget_id: &str) -> Option<&FieldNode> {
        self.groups
            .iter()
            .flat_map(|g| g.fields.iter())
            .filter_map(|f| match &f.widget {
                Widget::List { items } => Some(items),
                _ => None,
            })
            .flat_map(|items| items.iter().flat_map(|i| i.cells.iter()))
            .find(|c| c.widget_id == widget_id)
    }
}

fn filtered(options: Vec<SelectOption>, query: &str) -> Vec<SelectOption> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return options;
    }
    options
        .into_iter()
        .filter(|o| o.label.to_lowercase().contains(&query) || o.value.to_lowercase().contains(&query))
        .collect()
}

fn field_options(field: &FieldDefinition, ctx: &RenderContext<'_>) -> Vec<SelectOption> {
    if !field.options.is_empty() {
        return field.options.clone();
    }
    field
        .source
        .as_ref()
        .and_then(|s| ctx.source_options.get(s))
        .cloned()
        .unwrap_or_default()
}

fn column_options(column: &ColumnDefinition, ctx: &RenderContext<'_>) -> Vec<SelectOption> {
    if !column.options.is_empty() {
        return column
            .options
            .iter()
            .map(|o| SelectOption {
                value: o.clone(),
                label: o.clone(),
            })
            .collect();
    }
    column
        .source
        .as_ref()
        .and_then(|s| ctx.source_options.get(s))
        .cloned()
        .unwrap_or_default()
}

fn images(value: Option<&Value>) -> Vec<ImageRef> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(ImageRef::from_value).collect())
        .unwrap_or_default()
}

fn scalar_widget(
    field_type: FieldType,
    value: Option<&Value>,
    options: Vec<SelectOption>,
    query: &str,
    rows: u32,
    max_count: u32,
) -> Widget {
    let text = value.map(value_as_text).unwrap_or_default();
    match field_type {
        FieldType::Textarea => Widget::Text {
            value: text,
            multiline: true,
            rows,
        },
        FieldType::Date => Widget::Date { value: text },
        FieldType::Select | FieldType::SearchableSelect => {
            let searchable = field_type == FieldType::SearchableSelect;
            Widget::Select {
                options: if searchable { filtered(options, query) } else { options },
                selected: text,
                searchable,
                query: query.to_string(),
            }
        }
        FieldType::Checkbox => Widget::Checkbox {
            checked: value.and_then(Value::as_bool).unwrap_or(false),
        },
        FieldType::CheckboxGroup => Widget::CheckboxGroup {
            options,
            selected: value
                .and_then(Value::as_array)
                .map(|items| items.iter().map(value_as_text).collect())
                .unwrap_or_default(),
        },
        FieldType::Image => Widget::Image {
            image: value.and_then(ImageRef::from_value),
        },
        FieldType::ImageList => Widget::ImageList {
            images: images(value),
            max: max_count,
        },
        _ => Widget::Text {
            value: text,
            multiline: false,
            rows: 1,
        },
    }
}

fn list_widget(
    field: &FieldDefinition,
    list: Option<&RepeatingList>,
    ctx: &RenderContext<'_>,
) -> Widget {
    let Some(list) = list.filter(|l| !l.is_empty()) else {
        return Widget::EmptyList {
            message: ctx.empty_list_message.to_string(),
        };
    };
    let columns = field.list.as_ref().map_or(&[][..], |l| l.columns.as_slice());
    let items = list
        .iter()
        .map(|item| ItemNode {
            id: item.id,
            label: item.label.clone(),
            cells: columns
                .iter()
                .map(|column| FieldNode {
                    key: column.key.clone(),
                    widget_id: cell_widget_id(&field.key, item.id, &column.key),
                    label: column.label.clone(),
                    required: false,
                    readonly: field.readonly,
                    placeholder: column.placeholder.clone(),
                    help_text: String::new(),
                    widget: scalar_widget(
                        column.field_type,
                        item.record.get(&column.key),
                        column_options(column, ctx),
                        "",
                        3,
                        field.max_count,
                    ),
                })
                .collect(),
        })
        .collect();
    Widget::List { items }
}

/// Node for one top-level field
#[must_use]
pub fn field_node(field: &FieldDefinition, state: &FormState, ctx: &RenderContext<'_>) -> FieldNode {
    let widget = if field.field_type.is_repeating() {
        list_widget(field, state.records(&field.key), ctx)
    } else {
        let value = state.get(&field.key).and_then(FieldValue::as_value);
        let query = ctx.filters.get(&field.key).map_or("", String::as_str);
        scalar_widget(
            field.field_type,
            value,
            field_options(field, ctx),
            query,
            field.rows,
            field.max_count,
        )
    };
    FieldNode {
        key: field.key.clone(),
        widget_id: field.key.clone(),
        label: field.label.clone(),
        required: field.required,
        readonly: field.readonly,
        placeholder: field.placeholder.clone(),
        help_text: field.help_text.clone(),
        widget,
    }
}
