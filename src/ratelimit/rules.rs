//! Flow rule configuration and storage.
//!
//! Rules are loaded as a whole batch and published as an immutable snapshot,
//! so a reload is never partially visible to an in-flight admission check.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{FlowgateError, Result};

/// Window size applied when a rule does not specify one (per-second QPS).
pub const DEFAULT_WINDOW_SIZE_MS: u64 = 1000;

/// Largest window a rule may use; window arithmetic is done on `i64` timestamps.
pub const MAX_WINDOW_SIZE_MS: u64 = i64::MAX as u64;

/// What a flow rule counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "GradeRepr")]
pub enum Grade {
    /// Requests admitted per window.
    #[default]
    Qps,
}

/// Accepts both the symbolic name and the numeric grade constant used by
/// Sentinel-style rule files (`1` is QPS).
#[derive(Deserialize)]
#[serde(untagged)]
enum GradeRepr {
    Name(String),
    Code(i64),
}

impl TryFrom<GradeRepr> for Grade {
    type Error = String;

    fn try_from(repr: GradeRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            GradeRepr::Name(name) if name.eq_ignore_ascii_case("qps") => Ok(Grade::Qps),
            GradeRepr::Code(1) => Ok(Grade::Qps),
            GradeRepr::Name(name) => Err(format!("unsupported grade '{}'", name)),
            GradeRepr::Code(code) => Err(format!("unsupported grade {}", code)),
        }
    }
}

/// A flow rule limiting how many requests a resource admits per window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowRule {
    /// Resource name the rule applies to
    pub resource: String,
    /// What is being counted
    #[serde(default)]
    pub grade: Grade,
    /// Maximum number of requests admitted per window
    pub count: f64,
    /// Window length in milliseconds
    #[serde(default = "default_window_size_ms", alias = "windowSizeMs")]
    pub window_size_ms: u64,
}

fn default_window_size_ms() -> u64 {
    DEFAULT_WINDOW_SIZE_MS
}

impl FlowRule {
    /// Create a QPS rule with the default one second window.
    pub fn qps(resource: impl Into<String>, count: f64) -> Self {
        Self {
            resource: resource.into(),
            grade: Grade::Qps,
            count,
            window_size_ms: DEFAULT_WINDOW_SIZE_MS,
        }
    }

    /// Override the window size.
    pub fn with_window_size_ms(mut self, window_size_ms: u64) -> Self {
        self.window_size_ms = window_size_ms;
        self
    }

    /// Check the rule's invariants.
    pub fn validate(&self) -> Result<()> {
        if self.resource.is_empty() {
            return Err(FlowgateError::InvalidConfiguration(
                "rule resource name must not be empty".to_string(),
            ));
        }
        if !self.count.is_finite() || self.count <= 0.0 {
            return Err(FlowgateError::InvalidConfiguration(format!(
                "rule for '{}' has non-positive threshold {}",
                self.resource, self.count
            )));
        }
        if self.window_size_ms == 0 {
            return Err(FlowgateError::InvalidConfiguration(format!(
                "rule for '{}' has a zero window size",
                self.resource
            )));
        }
        if self.window_size_ms > MAX_WINDOW_SIZE_MS {
            return Err(FlowgateError::InvalidConfiguration(format!(
                "rule for '{}' has window size {}ms, above the maximum of {}ms",
                self.resource, self.window_size_ms, MAX_WINDOW_SIZE_MS
            )));
        }
        Ok(())
    }
}

/// A batch of flow rules as read from configuration.
///
/// Rule files hold either a bare list of rules or a mapping whose only key
/// is `rules`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSet {
    /// The rule records
    pub rules: Vec<FlowRule>,
}

impl RuleSet {
    /// Create a rule set from a list of rules.
    pub fn new(rules: Vec<FlowRule>) -> Self {
        Self { rules }
    }

    /// Load rules from a file. Files ending in `.json` are parsed as JSON,
    /// anything else as YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading flow rules");

        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json(&contents)
        } else {
            Self::from_yaml(&contents)
        }
    }

    /// Parse rules from YAML, either a bare list or a `rules:` mapping.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(parse_error)?;

        // Dispatch on the document shape so errors name the offending field
        match value {
            serde_yaml::Value::Sequence(_) => serde_yaml::from_value(value).map(Self::new),
            serde_yaml::Value::Mapping(_) => serde_yaml::from_value(value),
            _ => return Err(unexpected_shape()),
        }
        .map_err(parse_error)
    }

    /// Parse rules from JSON, either a bare array or a `rules` object.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json).map_err(parse_error)?;

        match value {
            serde_json::Value::Array(_) => serde_json::from_value(value).map(Self::new),
            serde_json::Value::Object(_) => serde_json::from_value(value),
            _ => return Err(unexpected_shape()),
        }
        .map_err(parse_error)
    }

    /// Number of rules in the set.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn parse_error(e: impl std::fmt::Display) -> FlowgateError {
    FlowgateError::InvalidConfiguration(format!("Failed to parse flow rules: {}", e))
}

fn unexpected_shape() -> FlowgateError {
    FlowgateError::InvalidConfiguration(
        "Failed to parse flow rules: expected a list of rules or a `rules` mapping".to_string(),
    )
}

impl IntoIterator for RuleSet {
    type Item = FlowRule;
    type IntoIter = std::vec::IntoIter<FlowRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.into_iter()
    }
}

impl FromIterator<FlowRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = FlowRule>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

type RuleMap = HashMap<String, Arc<FlowRule>>;

/// The active flow rules, keyed by resource name.
///
/// Readers take a snapshot of the whole map; `load` validates a complete
/// replacement before publishing it, and leaves the previous rules in place
/// when validation fails.
#[derive(Default)]
pub struct RuleStore {
    rules: RwLock<Arc<RuleMap>>,
}

impl RuleStore {
    /// Create an empty store. Every resource is unrestricted until rules load.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire active rule set.
    pub fn load<I>(&self, rules: I) -> Result<()>
    where
        I: IntoIterator<Item = FlowRule>,
    {
        let mut next = RuleMap::new();
        for rule in rules {
            rule.validate()?;
            if next.contains_key(&rule.resource) {
                return Err(FlowgateError::InvalidConfiguration(format!(
                    "duplicate rule for resource '{}'",
                    rule.resource
                )));
            }
            debug!(
                resource = %rule.resource,
                count = rule.count,
                window_size_ms = rule.window_size_ms,
                "Accepted flow rule"
            );
            next.insert(rule.resource.clone(), Arc::new(rule));
        }

        let loaded = next.len();
        *self.rules.write() = Arc::new(next);
        info!(rules = loaded, "Flow rules loaded");
        Ok(())
    }

    /// The current rule set as a single consistent view.
    pub fn snapshot(&self) -> RuleSnapshot {
        RuleSnapshot {
            rules: self.rules.read().clone(),
        }
    }

    /// Find the rule for a resource, if any.
    pub fn lookup(&self, resource: &str) -> Option<Arc<FlowRule>> {
        self.snapshot().lookup(resource)
    }

    /// All active rules, sorted by resource name.
    pub fn rules(&self) -> Vec<FlowRule> {
        let snapshot = self.snapshot();
        let mut rules: Vec<FlowRule> = snapshot.rules.values().map(|r| (**r).clone()).collect();
        rules.sort_by(|a, b| a.resource.cmp(&b.resource));
        rules
    }

    /// Number of active rules.
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Whether no rules are active.
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

/// An immutable view of the rules that were active when it was taken.
#[derive(Clone)]
pub struct RuleSnapshot {
    rules: Arc<RuleMap>,
}

impl RuleSnapshot {
    /// Find the rule for a resource in this view.
    pub fn lookup(&self, resource: &str) -> Option<Arc<FlowRule>> {
        self.rules.get(resource).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rule_list() {
        let yaml = r#"
- resource: /sayHello
  grade: qps
  count: 2
- resource: /orders
  count: 50
  window_size_ms: 500
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.rules[0], FlowRule::qps("/sayHello", 2.0));
        assert_eq!(rules.rules[1].window_size_ms, 500);
        assert_eq!(rules.rules[1].grade, Grade::Qps);
    }

    #[test]
    fn test_parse_rules_mapping() {
        let yaml = r#"
rules:
  - resource: /sayHello
    count: 2
    windowSizeMs: 2000
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.rules[0].window_size_ms, 2000);
    }

    #[test]
    fn test_parse_json_with_numeric_grade() {
        let json = r#"[{"resource": "/sayHello", "grade": 1, "count": 2}]"#;
        let rules = RuleSet::from_json(json).unwrap();
        assert_eq!(rules.rules[0].grade, Grade::Qps);
        assert_eq!(rules.rules[0].window_size_ms, DEFAULT_WINDOW_SIZE_MS);
    }

    #[test]
    fn test_parse_unsupported_numeric_grade() {
        for json in [
            r#"[{"resource": "/sayHello", "grade": 0, "count": 2}]"#,
            r#"[{"resource": "/sayHello", "grade": 2, "count": 2}]"#,
        ] {
            let result = RuleSet::from_json(json);
            assert!(matches!(result, Err(FlowgateError::InvalidConfiguration(_))));
        }
    }

    #[test]
    fn test_mapping_without_rules_key_rejected() {
        for yaml in [
            "rule:\n  - resource: /sayHello\n    count: 2\n",
            "rulez: []\n",
            "{}\n",
            "",
            "42\n",
        ] {
            let result = RuleSet::from_yaml(yaml);
            assert!(
                matches!(result, Err(FlowgateError::InvalidConfiguration(_))),
                "{:?} parsed as {:?}",
                yaml,
                result
            );
        }

        for json in ["{}", r#"{"rule": []}"#, "null"] {
            let result = RuleSet::from_json(json);
            assert!(matches!(result, Err(FlowgateError::InvalidConfiguration(_))));
        }
    }

    #[test]
    fn test_misspelled_field_is_named_in_error() {
        let result = RuleSet::from_yaml("- resource: /a\n  cout: 2\n");
        match result {
            Err(FlowgateError::InvalidConfiguration(message)) => {
                assert!(message.contains("cout"), "unexpected message: {}", message);
            }
            other => panic!("expected InvalidConfiguration, got {:?}", other),
        }

        let result = RuleSet::from_json(r#"{"rules": [{"resource": "/a", "count": 2, "grad": 1}]}"#);
        assert!(matches!(result, Err(FlowgateError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_empty_rule_list_is_allowed() {
        assert!(RuleSet::from_yaml("rules: []\n").unwrap().is_empty());
        assert!(RuleSet::from_json("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_unsupported_grade() {
        let yaml = r#"
- resource: /sayHello
  grade: thread
  count: 2
"#;
        let result = RuleSet::from_yaml(yaml);
        assert!(matches!(result, Err(FlowgateError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_lookup_missing_rule() {
        let store = RuleStore::new();
        assert!(store.lookup("/anything").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_and_lookup() {
        let store = RuleStore::new();
        store
            .load(vec![FlowRule::qps("/a", 1.0), FlowRule::qps("/b", 5.0)])
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.lookup("/b").unwrap().count, 5.0);
        assert!(store.lookup("/c").is_none());
    }

    #[test]
    fn test_duplicate_resource_keeps_previous_rules() {
        let store = RuleStore::new();
        store.load(vec![FlowRule::qps("/a", 1.0)]).unwrap();

        let result = store.load(vec![FlowRule::qps("/b", 3.0), FlowRule::qps("/b", 4.0)]);
        assert!(matches!(result, Err(FlowgateError::InvalidConfiguration(_))));

        assert_eq!(store.rules(), vec![FlowRule::qps("/a", 1.0)]);
        assert!(store.lookup("/b").is_none());
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let store = RuleStore::new();
        for rule in [
            FlowRule::qps("/a", 0.0),
            FlowRule::qps("/a", -1.0),
            FlowRule::qps("/a", f64::NAN),
            FlowRule::qps("/a", 1.0).with_window_size_ms(0),
            FlowRule::qps("/a", 1.0).with_window_size_ms(u64::MAX),
            FlowRule::qps("", 1.0),
        ] {
            assert!(matches!(
                store.load(vec![rule]),
                Err(FlowgateError::InvalidConfiguration(_))
            ));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_reload_replaces_whole_set() {
        let store = RuleStore::new();
        store
            .load(vec![FlowRule::qps("/a", 1.0), FlowRule::qps("/b", 1.0)])
            .unwrap();
        store.load(vec![FlowRule::qps("/c", 1.0)]).unwrap();

        assert!(store.lookup("/a").is_none());
        assert!(store.lookup("/b").is_none());
        assert!(store.lookup("/c").is_some());
    }

    #[test]
    fn test_snapshot_unaffected_by_reload() {
        let store = RuleStore::new();
        store.load(vec![FlowRule::qps("/a", 1.0)]).unwrap();

        let snapshot = store.snapshot();
        store.load(vec![FlowRule::qps("/b", 1.0)]).unwrap();

        assert!(snapshot.lookup("/a").is_some());
        assert!(snapshot.lookup("/b").is_none());
    }

    #[test]
    fn test_rules_sorted() {
        let store = RuleStore::new();
        store
            .load(vec![FlowRule::qps("/z", 1.0), FlowRule::qps("/a", 1.0)])
            .unwrap();
        let names: Vec<String> = store.rules().into_iter().map(|r| r.resource).collect();
        assert_eq!(names, vec!["/a".to_string(), "/z".to_string()]);
    }
}
