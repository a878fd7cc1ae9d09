//! Messages and the metadata map threaded between agents
//!
//! Metadata is the mechanism by which agents communicate: each step
//! merges its reply metadata into the accumulated map, and loop
//! conditions and result summaries read well-known keys back out.
//! The map stays open (any JSON value under any key) but the keys the
//! engine itself depends on get typed accessors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message roles in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message flowing through a workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Well-known metadata keys shared between the engine and agents
pub mod keys {
    /// Number of results the last retrieval step produced
    pub const RESULT_COUNT: &str = "result_count";
    /// Free-form assessment of retrieved results
    pub const ASSESSMENT: &str = "assessment";
    /// Whether a safety check passed
    pub const SAFETY_CHECK_PASSED: &str = "safety_check_passed";
    /// Set by an agent to stop the workflow from advancing
    pub const BLOCKED: &str = "blocked";
    /// The user's original query, preserved across rewrites
    pub const ORIGINAL_QUERY: &str = "original_query";
    /// Marker set when a fallback agent rewrote the query
    pub const QUERY_REWRITE_ATTEMPTED: &str = "query_rewrite_attempted";
    /// How many rewrites the fallback agent has attempted
    pub const REWRITE_COUNT: &str = "rewrite_count";
}

/// Open string-keyed metadata with typed accessors for the keys the
/// engine reads. Keys are unique; insertion order is irrelevant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(serde_json::Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Merge another map into this one, overwriting existing keys
    pub fn merge(&mut self, other: &Metadata) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    // Typed accessors for the well-known keys

    pub fn result_count(&self) -> Option<i64> {
        self.0.get(keys::RESULT_COUNT).and_then(Value::as_i64)
    }

    pub fn assessment(&self) -> Option<&str> {
        self.0.get(keys::ASSESSMENT).and_then(Value::as_str)
    }

    pub fn safety_check_passed(&self) -> Option<bool> {
        self.0.get(keys::SAFETY_CHECK_PASSED).and_then(Value::as_bool)
    }

    pub fn blocked(&self) -> bool {
        self.0
            .get(keys::BLOCKED)
            .map(is_truthy)
            .unwrap_or(false)
    }

    /// Truthiness of an arbitrary key: absent, null, false, 0 and ""
    /// all count as falsy. Used by loops with no condition_value.
    pub fn is_truthy(&self, key: &str) -> bool {
        self.0.get(key).map(is_truthy).unwrap_or(false)
    }
}

impl From<serde_json::Map<String, Value>> for Metadata {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Metadata> for serde_json::Map<String, Value> {
    fn from(m: Metadata) -> Self {
        m.0
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overwrites() {
        let mut a = Metadata::new();
        a.insert("x", 1);
        a.insert("y", "keep");

        let mut b = Metadata::new();
        b.insert("x", 2);

        a.merge(&b);
        assert_eq!(a.get("x"), Some(&json!(2)));
        assert_eq!(a.get("y"), Some(&json!("keep")));
    }

    #[test]
    fn test_typed_accessors() {
        let mut m = Metadata::new();
        m.insert(keys::RESULT_COUNT, 7);
        m.insert(keys::ASSESSMENT, "good");
        m.insert(keys::SAFETY_CHECK_PASSED, true);

        assert_eq!(m.result_count(), Some(7));
        assert_eq!(m.assessment(), Some("good"));
        assert_eq!(m.safety_check_passed(), Some(true));
        assert!(!m.blocked());
    }

    #[test]
    fn test_truthiness() {
        let mut m = Metadata::new();
        m.insert("zero", 0);
        m.insert("empty", "");
        m.insert("null", Value::Null);
        m.insert("off", false);
        m.insert("n", 3);
        m.insert("s", "yes");

        assert!(!m.is_truthy("zero"));
        assert!(!m.is_truthy("empty"));
        assert!(!m.is_truthy("null"));
        assert!(!m.is_truthy("off"));
        assert!(!m.is_truthy("absent"));
        assert!(m.is_truthy("n"));
        assert!(m.is_truthy("s"));
    }

    #[test]
    fn test_metadata_round_trips_as_plain_object() {
        let mut m = Metadata::new();
        m.insert("k", json!({"nested": [1, 2]}));

        let s = serde_json::to_string(&m).unwrap();
        assert_eq!(s, r#"{"k":{"nested":[1,2]}}"#);

        let back: Metadata = serde_json::from_str(&s).unwrap();
        assert_eq!(back.get("k"), m.get("k"));
    }
}
