//! Core types for the engine
//!
//! Defines:
//! - Engine configuration
//! - Stable item identities and schema generations
//! - The clock used for `today` defaults

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stable identity of a repeating-list item
///
/// Allocated once at creation and never reused or renumbered, including
/// after removals, moves and resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "item-{}", self.0)
    }
}

/// Identifies one schema load; bumped on every load and hot-reload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SchemaGeneration(pub u64);

impl SchemaGeneration {
    /// Next generation
    #[inline]
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for SchemaGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Data-source cache time-to-live in seconds
    pub cache_ttl_secs: u64,
    /// Maximum cached data-source entries
    pub cache_capacity: u64,
    /// Search filter debounce in milliseconds
    pub search_debounce_ms: u64,
    /// Text of the empty repeating-list placeholder
    pub empty_list_message: String,
    /// Item label used when a list declares none; `{n}` is the position
    pub item_label_fallback: String,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With cache time-to-live
    #[inline]
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs().max(1);
        self
    }

    /// With cache capacity
    #[inline]
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// With search debounce delay
    #[inline]
    #[must_use]
    pub fn with_search_debounce(mut self, delay: Duration) -> Self {
        self.search_debounce_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Cache time-to-live
    #[inline]
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Search debounce delay
    #[inline]
    #[must_use]
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            cache_capacity: 1024,
            search_debounce_ms: 200,
            empty_list_message: "no items yet".to_string(),
            item_label_fallback: "Item {n}".to_string(),
        }
    }
}

/// Source of the current date
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Today's date
    fn today(&self) -> NaiveDate;
}

/// Local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to one date
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Inputs for evaluating defaults on reset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultsContext {
    /// Date substituted for `today` and `{date}`
    pub today: NaiveDate,
    /// Template id substituted for `{template}`
    pub template_id: String,
    /// Report sequence substituted for `{seq}`
    pub sequence: u32,
}

impl DefaultsContext {
    /// Create context
    #[inline]
    #[must_use]
    pub fn new(today: NaiveDate, template_id: impl Into<String>, sequence: u32) -> Self {
        Self {
            today,
            template_id: template_id.into(),
            sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.search_debounce(), Duration::from_millis(200));
        assert_eq!(config.empty_list_message, "no items yet");
    }

    #[test]
    fn config_builders() {
        let config = EngineConfig::new()
            .with_cache_ttl(Duration::from_secs(60))
            .with_cache_capacity(16)
            .with_search_debounce(Duration::from_millis(50));
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.search_debounce_ms, 50);
    }

    #[test]
    fn config_partial_deserialize() {
        let config: EngineConfig = serde_json::from_str(r#"{"cache_ttl_secs": 30}"#).unwrap();
        assert_eq!(config.cache_ttl_secs, 30);
        assert_eq!(config.search_debounce_ms, 200);
    }

    #[test]
    fn item_id_display() {
        assert_eq!(ItemId(7).to_string(), "item-7");
        assert_eq!(SchemaGeneration(1).next(), SchemaGeneration(2));
    }
}
