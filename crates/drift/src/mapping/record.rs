//! Canonical flat records handed to the resolution engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A flat record whose JSON keys keep their insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalRecord {
    fields: Map<String, Value>,
}

impl CanonicalRecord {
    pub fn new(data_source: &str, record_id: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("DATA_SOURCE".to_string(), json!(data_source));
        fields.insert("RECORD_ID".to_string(), json!(record_id));
        Self { fields }
    }

    pub fn data_source(&self) -> Option<&str> {
        self.get_str("DATA_SOURCE")
    }

    pub fn record_id(&self) -> Option<&str> {
        self.get_str("RECORD_ID")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Set a scalar field, skipping empty values.
    pub fn set(&mut self, key: &str, value: &str) {
        if !value.is_empty() {
            self.fields.insert(key.to_string(), json!(value));
        }
    }

    /// Set a list field such as `NAME_LIST`, skipping empty lists.
    pub fn set_list(&mut self, key: &str, entries: Vec<Value>) {
        if !entries.is_empty() {
            self.fields.insert(key.to_string(), Value::Array(entries));
        }
    }

    /// Apply the single/multi rule to a multi-valued attribute.
    ///
    /// No values leaves the record untouched, one value sets `field` as a
    /// scalar, several set only `<field>_LIST` as `[{field: v}, ...]`.
    pub fn set_multi<'a, I>(&mut self, field: &str, values: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let values: Vec<&str> = values.into_iter().filter(|v| !v.is_empty()).collect();
        match values.as_slice() {
            [] => {}
            [only] => self.set(field, only),
            many => {
                let list = many.iter().map(|v| single(field, v)).collect();
                self.fields.insert(format!("{field}_LIST"), Value::Array(list));
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// `{key: value}` as a JSON object.
pub fn single(key: &str, value: &str) -> Value {
    let mut entry = Map::new();
    entry.insert(key.to_string(), json!(value));
    Value::Object(entry)
}

impl From<Map<String, Value>> for CanonicalRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bifurcation_none() {
        let mut record = CanonicalRecord::new("TEST", "1");
        record.set_multi("EMAIL_ADDRESS", Vec::<&str>::new());
        record.set_multi("PHONE_NUMBER", [""]);
        assert!(!record.contains("EMAIL_ADDRESS"));
        assert!(!record.contains("EMAIL_ADDRESS_LIST"));
        assert!(!record.contains("PHONE_NUMBER"));
    }

    #[test]
    fn test_bifurcation_single_is_inlined() {
        let mut record = CanonicalRecord::new("TEST", "1");
        record.set_multi("EMAIL_ADDRESS", ["a@example.org"]);
        assert_eq!(record.get_str("EMAIL_ADDRESS"), Some("a@example.org"));
        assert!(!record.contains("EMAIL_ADDRESS_LIST"));
    }

    #[test]
    fn test_bifurcation_many_is_list_only() {
        let mut record = CanonicalRecord::new("TEST", "1");
        record.set_multi("CITIZENSHIP", ["US", "FR"]);
        assert!(!record.contains("CITIZENSHIP"));
        assert_eq!(
            record.get("CITIZENSHIP_LIST"),
            Some(&json!([{"CITIZENSHIP": "US"}, {"CITIZENSHIP": "FR"}]))
        );
    }

    #[test]
    fn test_keys_keep_insertion_order() {
        let mut record = CanonicalRecord::new("TEST", "1");
        record.set("RECORD_TYPE", "PERSON");
        record.set("GENDER", "F");
        record.set("DATE_OF_BIRTH", "");

        let keys: Vec<_> = record.keys().collect();
        assert_eq!(keys, ["DATA_SOURCE", "RECORD_ID", "RECORD_TYPE", "GENDER"]);
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"DATA_SOURCE":"TEST","RECORD_ID":"1","RECORD_TYPE":"PERSON","GENDER":"F"}"#
        );
    }
}
