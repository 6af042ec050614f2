//! JSON schema parser
//!
//! Uses serde_json. Schemas fetched from a remote template service usually
//! arrive in this form.

use crate::document::SchemaDocument;
use crate::error::SchemaError;
use crate::parsers::DocumentParser;
use serde_json::Value;

/// JSON parser
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl DocumentParser for JsonParser {
    fn format(&self) -> &'static str {
        "json"
    }

    fn parse(&self, content: &str) -> Result<SchemaDocument, SchemaError> {
        serde_json::from_str(content)
            .map_err(|e| SchemaError::malformed("json", format!("JSON parse error: {}", e)))
    }

    fn extensions(&self) -> &[&str] {
        &["json"]
    }
}

/// Get value at path (dot notation)
///
/// Array elements are addressed by numeric segments, e.g. `records.0.name`.
#[must_use]
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_parser_valid() {
        let doc = JsonParser
            .parse(r#"{"id": "vuln_report", "fields": [{"key": "url"}]}"#)
            .unwrap();
        assert_eq!(doc.id, "vuln_report");
        assert_eq!(doc.fields.len(), 1);
    }

    #[test]
    fn json_parser_invalid() {
        let result = JsonParser.parse(r#"{"fields": [}"#);
        assert!(matches!(
            result,
            Err(SchemaError::MalformedDocument { format: "json", .. })
        ));
    }

    #[test]
    fn json_parser_empty() {
        assert!(JsonParser.parse("").is_err());
    }

    #[test]
    fn json_get_path() {
        let root = json!({
            "domain": "example.com",
            "icp_info": {"unitName": "示例单位", "natureName": "企业"},
            "records": [{"name": "first"}]
        });

        assert_eq!(get_path(&root, "domain"), Some(&json!("example.com")));
        assert_eq!(get_path(&root, "icp_info.unitName"), Some(&json!("示例单位")));
        assert_eq!(get_path(&root, "records.0.name"), Some(&json!("first")));
        assert_eq!(get_path(&root, "icp_info.missing"), None);
        assert_eq!(get_path(&root, "domain.deeper"), None);
    }
}
