//! Workflow Context
//!
//! A typed key-value store shared by the steps of a workflow instance.
//! Values are stored as JSON and read back through `serde`, so each step can
//! ask for the type it expects instead of poking at an untyped bag.
//!
//! Step results are published under `step_<id>_result`; see
//! [`step_result_key`].

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Returns the context key a step's result is stored under.
pub fn step_result_key(step_id: &str) -> String {
    format!("step_{}_result", step_id)
}

/// Insertion-ordered key-value store for workflow data.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Context {
    values: IndexMap<String, Value>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from an iterator of key/value pairs.
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Converts a JSON object into a context. Non-object values yield `None`.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self {
                values: map.into_iter().collect(),
            }),
            _ => None,
        }
    }

    /// Returns the context as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone().into_iter().collect())
    }

    /// Inserts a raw JSON value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    /// Serializes and inserts a typed value.
    pub fn set<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        self.values.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Returns the raw JSON value for a key.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Reads a key as `T`. Missing keys and type mismatches both yield `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Reads a string value, returning `default` when absent or not a string.
    pub fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
    }

    /// Returns the result a step published, if any.
    pub fn step_result(&self, step_id: &str) -> Option<&Value> {
        self.values.get(&step_result_key(step_id))
    }

    /// Returns true if the key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Removes a key.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.shift_remove(key)
    }

    /// Copies every entry of `other` into `self`; `other` wins on collision.
    pub fn merge(&mut self, other: &Context) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Returns a new context equal to `self` overlaid with `other`.
    pub fn merged(&self, other: &Context) -> Context {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Iterates keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_result_key_convention() {
        assert_eq!(step_result_key("market_analysis"), "step_market_analysis_result");
    }

    #[test]
    fn test_merge_later_source_wins() {
        let mut base = Context::from_pairs([("price", json!(10)), ("sku", json!("A-1"))]);
        let overlay = Context::from_pairs([("price", json!(12))]);

        base.merge(&overlay);

        assert_eq!(base.get::<i64>("price"), Some(12));
        assert_eq!(base.get::<String>("sku"), Some("A-1".to_string()));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn test_typed_get_mismatch_is_none() {
        let ctx = Context::from_pairs([("price", json!("not a number"))]);
        assert_eq!(ctx.get::<f64>("price"), None);
        assert_eq!(ctx.get::<String>("price"), Some("not a number".to_string()));
    }

    #[test]
    fn test_set_typed_value() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Listing {
            title: String,
            price: f64,
        }

        let mut ctx = Context::new();
        let listing = Listing {
            title: "Desk lamp".to_string(),
            price: 24.5,
        };
        ctx.set("listing", &listing).unwrap();

        assert_eq!(ctx.get::<Listing>("listing"), Some(listing));
    }

    #[test]
    fn test_from_json_requires_object() {
        assert!(Context::from_json(json!([1, 2])).is_none());

        let ctx = Context::from_json(json!({"a": 1})).unwrap();
        assert_eq!(ctx.to_json(), json!({"a": 1}));
    }

    #[test]
    fn test_insertion_order_preserved() {
        let ctx = Context::from_pairs([("z", json!(1)), ("a", json!(2)), ("m", json!(3))]);
        let keys: Vec<&String> = ctx.keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_step_result_lookup() {
        let mut ctx = Context::new();
        ctx.insert(step_result_key("s1"), json!({"ok": true}));
        assert_eq!(ctx.step_result("s1"), Some(&json!({"ok": true})));
        assert!(ctx.step_result("s2").is_none());
    }

    #[test]
    fn test_get_str_or_default() {
        let ctx = Context::from_pairs([("reason", json!("escalation"))]);
        assert_eq!(ctx.get_str_or("reason", ""), "escalation");
        assert_eq!(ctx.get_str_or("missing", "none"), "none");
    }
}
