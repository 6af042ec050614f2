//! Vulnerability statistics: per-band counts, total, summary text, rating

use crate::state::FormState;
use reportform_schema::{value_as_text, AggregateSpec, Severity, SeverityMap};
use serde_json::Value;

/// Derived risk band of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskRating {
    /// Any critical or high finding, or more than six medium ones
    High,
    /// One to six medium findings, or more than eight low ones
    Medium,
    /// Everything else
    Low,
}

impl RiskRating {
    /// Evaluate the thresholds in order
    #[must_use]
    pub fn from_counts(counts: &SeverityMap<u64>) -> Self {
        if counts.critical >= 1 || counts.high >= 1 || counts.medium > 6 {
            Self::High
        } else if (1..=6).contains(&counts.medium) || counts.low > 8 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Display label from the aggregate configuration
    #[must_use]
    pub fn label(self, spec: &AggregateSpec) -> &str {
        let labels = &spec.rating_labels;
        match self {
            Self::High => &labels.high,
            Self::Medium => &labels.medium,
            Self::Low => &labels.low,
        }
    }
}

/// All-zero counts
#[must_use]
pub fn zero_counts() -> SeverityMap<u64> {
    SeverityMap {
        critical: 0,
        high: 0,
        medium: 0,
        low: 0,
        info: 0,
    }
}

fn bump(counts: &mut SeverityMap<u64>, severity: Severity) {
    let slot = match severity {
        Severity::Critical => &mut counts.critical,
        Severity::High => &mut counts.high,
        Severity::Medium => &mut counts.medium,
        Severity::Low => &mut counts.low,
        Severity::Info => &mut counts.info,
    };
    *slot = slot.saturating_add(1);
}

/// Current counts
///
/// With a `source_list` the counts come from the items' level column;
/// otherwise they are read from the count fields, non-numeric text counting
/// as zero.
#[must_use]
pub fn counts(spec: &AggregateSpec, state: &FormState) -> SeverityMap<u64> {
    let mut counts = zero_counts();
    if let Some(list_key) = &spec.source_list {
        if let Some(list) = state.records(list_key) {
            for item in list.iter() {
                let level = item
                    .record
                    .get(&spec.level_column)
                    .map(value_as_text)
                    .unwrap_or_default();
                if let Some(severity) = spec.levels.band_of(level.trim()) {
                    bump(&mut counts, severity);
                }
            }
        }
        return counts;
    }
    for severity in Severity::ALL {
        let text = state.text(spec.counts.get(severity));
        let n = text.trim().parse::<u64>().unwrap_or(0);
        match severity {
            Severity::Critical => counts.critical = n,
            Severity::High => counts.high = n,
            Severity::Medium => counts.medium = n,
            Severity::Low => counts.low = n,
            Severity::Info => counts.info = n,
        }
    }
    counts
}

/// Summary text listing the non-zero bands
#[must_use]
pub fn summary(spec: &AggregateSpec, counts: &SeverityMap<u64>) -> String {
    let parts: Vec<String> = counts
        .iter()
        .filter(|(_, n)| **n > 0)
        .map(|(severity, n)| {
            spec.summary_item
                .replace("{label}", spec.levels.get(severity))
                .replace("{count}", &n.to_string())
        })
        .collect();
    if parts.is_empty() {
        spec.empty_summary.clone()
    } else {
        parts.join(" ")
    }
}

/// Field writes for the current counts, in a fixed order
#[must_use]
pub fn recompute(spec: &AggregateSpec, state: &FormState) -> Vec<(String, Value)> {
    let counts = counts(spec, state);
    let mut writes = Vec::new();
    if spec.source_list.is_some() {
        for (severity, key) in spec.counts.iter() {
            writes.push((key.clone(), Value::from(*counts.get(severity))));
        }
    }
    if let Some(total) = &spec.total {
        let sum = counts.iter().fold(0u64, |acc, (_, n)| acc.saturating_add(*n));
        writes.push((total.clone(), Value::from(sum)));
    }
    if let Some(key) = &spec.summary {
        writes.push((key.clone(), Value::String(summary(spec, &counts))));
    }
    if let Some(key) = &spec.rating {
        let rating = RiskRating::from_counts(&counts);
        writes.push((key.clone(), Value::String(rating.label(spec).to_string())));
    }
    writes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(c: u64, h: u64, m: u64, l: u64, i: u64) -> SeverityMap<u64> {
        SeverityMap {
            critical: c,
            high: h,
            medium: m,
            low: l,
            info: i,
        }
    }

    fn spec(source_list: Option<&str>) -> AggregateSpec {
        let mut value = json!({
            "counts": {"critical": "c", "high": "h", "medium": "m", "low": "l", "info": "i"},
            "total": "total",
            "summary": "summary",
            "rating": "rating",
            "rating_labels": {"high": "高风险", "medium": "中风险", "low": "低风险"}
        });
        if let Some(list) = source_list {
            value["source_list"] = json!(list);
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn rating_thresholds() {
        assert_eq!(RiskRating::from_counts(&map(0, 0, 7, 0, 0)), RiskRating::High);
        assert_eq!(RiskRating::from_counts(&map(0, 0, 3, 0, 0)), RiskRating::Medium);
        assert_eq!(RiskRating::from_counts(&map(0, 0, 0, 0, 0)), RiskRating::Low);
        assert_eq!(RiskRating::from_counts(&map(1, 0, 0, 0, 0)), RiskRating::High);
        assert_eq!(RiskRating::from_counts(&map(0, 1, 0, 0, 0)), RiskRating::High);
        assert_eq!(RiskRating::from_counts(&map(0, 0, 6, 0, 0)), RiskRating::Medium);
        assert_eq!(RiskRating::from_counts(&map(0, 0, 0, 9, 0)), RiskRating::Medium);
        assert_eq!(RiskRating::from_counts(&map(0, 0, 0, 8, 40)), RiskRating::Low);
    }

    #[test]
    fn summary_lists_nonzero_bands() {
        let spec = spec(None);
        assert_eq!(summary(&spec, &map(1, 2, 0, 0, 0)), "超危1个 高危2个");
        assert_eq!(summary(&spec, &map(0, 0, 0, 0, 0)), "无漏洞");
    }

    #[test]
    fn counts_from_fields_ignore_garbage() {
        let spec = spec(None);
        let mut state = FormState::new();
        state.set("m", json!("3"));
        state.set("l", json!(2));
        state.set("h", json!("many"));
        assert_eq!(counts(&spec, &state), map(0, 0, 3, 2, 0));
    }

    #[test]
    fn recompute_writes_outputs() {
        let spec = spec(None);
        let mut state = FormState::new();
        state.set("m", json!("7"));
        let writes = recompute(&spec, &state);
        assert_eq!(
            writes,
            vec![
                ("total".to_string(), json!(7)),
                ("summary".to_string(), json!("中危7个")),
                ("rating".to_string(), json!("高风险")),
            ]
        );
    }

    #[test]
    fn total_saturates_on_huge_typed_counts() {
        let spec = spec(None);
        let mut state = FormState::new();
        state.set("l", json!(u64::MAX.to_string()));
        state.set("i", json!("1"));
        let writes = recompute(&spec, &state);
        assert_eq!(writes[0], ("total".to_string(), json!(u64::MAX)));
        assert_eq!(writes[2], ("rating".to_string(), json!("中风险")));
    }
}
