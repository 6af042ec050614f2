//! Schema document parsers
//!
//! Provides parsing from external document formats into [`SchemaDocument`]:
//! - YAML (`schema.yaml`, the usual template layout)
//! - JSON (schemas served by a remote template service)

use crate::document::SchemaDocument;
use crate::error::SchemaError;
use std::path::Path;

mod json;
mod yaml;

pub use json::{get_path, JsonParser};
pub use yaml::YamlParser;

/// Parser trait for converting document text into a raw schema document
///
/// Implement this trait to add support for new document formats.
pub trait DocumentParser: Send + Sync + 'static {
    /// Format name used in error messages
    fn format(&self) -> &'static str;

    /// Parse document text
    fn parse(&self, content: &str) -> Result<SchemaDocument, SchemaError>;

    /// Check if this parser can handle the given path
    fn can_parse(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions().contains(&ext))
            .unwrap_or(false)
    }

    /// Supported file extensions (without dot)
    fn extensions(&self) -> &[&str];
}

/// Parser registration keyed by file extension
pub struct ParserRegistry {
    parsers: Vec<Box<dyn DocumentParser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        default_parsers()
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("parser_count", &self.parsers.len())
            .field("extensions", &self.all_extensions())
            .finish()
    }
}

impl ParserRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Register a parser; earlier registrations win on shared extensions
    pub fn register<P: DocumentParser>(&mut self, parser: P) {
        self.parsers.push(Box::new(parser));
    }

    /// Find parser for path
    #[must_use]
    pub fn find_for_path(&self, path: &Path) -> Option<&dyn DocumentParser> {
        self.parsers.iter().find(|p| p.can_parse(path)).map(|p| &**p)
    }

    /// Parse content read from `path`, choosing the parser by extension
    ///
    /// Falls back to content sniffing for unknown extensions.
    pub fn parse_path(&self, path: &Path, content: &str) -> Result<SchemaDocument, SchemaError> {
        match self.find_for_path(path) {
            Some(parser) => parser.parse(content),
            None => sniff(content).parse(content),
        }
    }

    /// Get all registered extensions
    #[must_use]
    pub fn all_extensions(&self) -> Vec<&str> {
        self.parsers
            .iter()
            .flat_map(|p| p.extensions())
            .copied()
            .collect()
    }
}

/// Create default parser registry with built-in parsers
#[inline]
#[must_use]
pub fn default_parsers() -> ParserRegistry {
    let mut registry = ParserRegistry::new();
    registry.register(YamlParser);
    registry.register(JsonParser);
    registry
}

/// Pick a parser from the document text
///
/// JSON documents start with `{`; everything else is treated as YAML.
#[must_use]
pub fn sniff(content: &str) -> &'static dyn DocumentParser {
    if content.trim_start().starts_with('{') {
        &JsonParser
    } else {
        &YamlParser
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_finds_by_extension() {
        let registry = default_parsers();
        assert_eq!(
            registry.find_for_path(Path::new("templates/vuln_report/schema.yaml")).map(|p| p.format()),
            Some("yaml")
        );
        assert_eq!(
            registry.find_for_path(Path::new("schema.yml")).map(|p| p.format()),
            Some("yaml")
        );
        assert_eq!(
            registry.find_for_path(Path::new("schema.json")).map(|p| p.format()),
            Some("json")
        );
        assert!(registry.find_for_path(Path::new("schema.txt")).is_none());
    }

    #[test]
    fn registry_all_extensions() {
        let registry = default_parsers();
        let exts = registry.all_extensions();
        assert!(exts.contains(&"yaml"));
        assert!(exts.contains(&"json"));
    }

    #[test]
    fn sniff_detects_json() {
        assert_eq!(sniff("  {\"fields\": []}").format(), "json");
        assert_eq!(sniff("fields: []").format(), "yaml");
    }

    #[test]
    fn parse_path_falls_back_to_sniffing() {
        let registry = default_parsers();
        let doc = registry
            .parse_path(Path::new("schema.txt"), "{\"id\": \"t\", \"fields\": []}")
            .unwrap();
        assert_eq!(doc.id, "t");
    }

    #[test]
    fn registry_debug() {
        let registry = default_parsers();
        let debug_str = format!("{:?}", registry);
        assert!(debug_str.contains("ParserRegistry"));
    }
}
