//! reportform schema model
//!
//! Parses report template documents into an immutable, checked [`Schema`]:
//! fields, groups, behaviors, presets, validation rules and data-source
//! references.
//!
//! # Architecture
//!
//! ```text
//! schema.yaml / schema.json → DocumentParser → SchemaDocument → Schema
//!                                                   │
//!                                   DuplicateKey / UnknownGroupRef / ...
//! ```
//!
//! # Example
//!
//! ```rust
//! use reportform_schema::Schema;
//!
//! let schema = Schema::load(
//!     "id: demo\nfields:\n  - {key: system_name, required: true}\n",
//! )
//! .unwrap();
//! assert!(schema.contains("system_name"));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod document;
pub mod error;
pub mod model;
pub mod parsers;
mod schema;

pub use error::{SchemaError, SchemaResult};
pub use model::{
    value_as_text, AggregateSpec, Behavior, BehaviorAction, ColumnDefinition, ComputeSpec,
    DataSourceRef, DefaultValue, FieldDefinition, FieldGroup, FieldPattern, FieldType,
    LibrarySpec, ListSpec, Provenance, RatingLabels, SelectOption, Severity, SeverityMap,
    TemplateMeta, Trigger, TriggerEvent, ValidationRule, DEFAULT_GROUP,
};
pub use parsers::{default_parsers, get_path, DocumentParser, ParserRegistry};
pub use schema::Schema;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn document(orders: &[(i64, bool)]) -> String {
        let mut doc = String::from("field_groups:\n  - {id: a, order: 1}\n  - {id: b, order: 0}\nfields:\n");
        for (i, (order, in_a)) in orders.iter().enumerate() {
            let group = if *in_a { "a" } else { "b" };
            doc.push_str(&format!("  - {{key: f{i}, group: {group}, order: {order}}}\n"));
        }
        doc
    }

    proptest! {
        #[test]
        fn ordering_is_deterministic_and_stable(orders in proptest::collection::vec((-3i64..3, any::<bool>()), 0..24)) {
            let doc = document(&orders);
            let first = Schema::load(&doc).unwrap();
            let second = Schema::load(&doc).unwrap();

            for group in ["a", "b"] {
                let a: Vec<_> = first.fields_in_group(group).iter().map(|f| (f.order, f.declared_index())).collect();
                let b: Vec<_> = second.fields_in_group(group).iter().map(|f| (f.order, f.declared_index())).collect();
                prop_assert_eq!(&a, &b);
                // sorted by order, ties by declaration index
                prop_assert!(a.windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }
}
