//! YAML schema parser
//!
//! Uses serde_yaml. Anchors and aliases are resolved by the parser, so
//! templates may share column blocks between lists.

use crate::document::SchemaDocument;
use crate::error::SchemaError;
use crate::parsers::DocumentParser;

/// YAML parser
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlParser;

impl DocumentParser for YamlParser {
    fn format(&self) -> &'static str {
        "yaml"
    }

    fn parse(&self, content: &str) -> Result<SchemaDocument, SchemaError> {
        if content.trim().is_empty() {
            return Err(SchemaError::malformed("yaml", "empty document"));
        }
        serde_yaml::from_str(content)
            .map_err(|e| SchemaError::malformed("yaml", format!("YAML parse error: {}", e)))
    }

    fn extensions(&self) -> &[&str] {
        &["yaml", "yml"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldType;

    #[test]
    fn yaml_parser_valid() {
        let doc = YamlParser
            .parse(
                r#"
id: intrusion_report
name: 入侵报告
fields:
  - key: attack_time
    type: date
    default: today
  - key: targets
    type: target_list
    columns:
      - key: url
"#,
            )
            .unwrap();
        assert_eq!(doc.id, "intrusion_report");
        assert_eq!(doc.fields[0].field_type, FieldType::Date);
        assert_eq!(doc.fields[1].columns[0].key, "url");
    }

    #[test]
    fn yaml_parser_resolves_anchors() {
        let doc = YamlParser
            .parse(
                r#"
fields:
  - key: primary
    type: target_list
    columns: &cols
      - key: url
      - key: port
  - key: secondary
    type: target_list
    columns: *cols
"#,
            )
            .unwrap();
        assert_eq!(doc.fields[1].columns.len(), 2);
    }

    #[test]
    fn yaml_parser_invalid() {
        assert!(YamlParser.parse("fields: [ {key: a").is_err());
        assert!(YamlParser.parse("fields: 42").is_err());
    }

    #[test]
    fn yaml_parser_empty() {
        assert!(YamlParser.parse("   \n").is_err());
    }
}
