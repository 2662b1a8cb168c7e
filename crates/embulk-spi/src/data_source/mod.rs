//! Ordered, JSON-shaped values shared by configuration, tasks, and reports.
//!
//! [`DataSource`] wraps an insertion-ordered mapping. Two families of writes
//! are deliberately kept apart:
//!
//! - [`DataSource::set`] and [`DataSource::set_all`] replace whole attribute
//!   values;
//! - [`DataSource::merge`] recurses into nested mappings and merges arrays
//!   index-wise.
//!
//! Config diffs are applied with `merge`; plugin task assembly uses `set`.

mod roles;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConfigError, json_kind};

pub use self::roles::{ConfigDiff, ConfigSource, TaskReport, TaskSource};

/// An ordered mapping from attribute name to JSON value.
///
/// # Example
///
/// ```
/// use embulk_spi::DataSource;
///
/// let mut base = DataSource::from_json_str(r#"{"in": {"path": "/tmp"}}"#).expect("json");
/// let diff = DataSource::from_json_str(r#"{"in": {"last_path": "/tmp/b.csv"}}"#).expect("json");
/// base.merge(&diff);
/// assert_eq!(base.to_json_string(), r#"{"in":{"path":"/tmp","last_path":"/tmp/b.csv"}}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSource {
    attributes: Map<String, Value>,
}

impl DataSource {
    /// Creates an empty value.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing mapping.
    #[must_use]
    pub const fn from_map(attributes: Map<String, Value>) -> Self {
        Self { attributes }
    }

    /// Wraps a JSON value that must be a mapping.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotAnObject`] for any other JSON kind.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(attributes) => Ok(Self { attributes }),
            other => Err(ConfigError::NotAnObject {
                found: json_kind(&other),
            }),
        }
    }

    /// Parses JSON text that must contain a mapping.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for malformed text and
    /// [`ConfigError::NotAnObject`] for a non-mapping document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Decodes an attribute into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingKey`] when the attribute is absent and
    /// [`ConfigError::InvalidValue`] when it cannot be decoded.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self
            .attributes
            .get(key)
            .ok_or_else(|| ConfigError::MissingKey {
                key: key.to_owned(),
            })?;
        decode(key, value)
    }

    /// Decodes an attribute into `T`, falling back to `default` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a present value cannot be
    /// decoded.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.get_optional(key)?.unwrap_or(default))
    }

    /// Decodes an attribute into `T`, treating absence and `null` as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a present value cannot be
    /// decoded.
    pub fn get_optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.attributes.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => decode(key, value).map(Some),
        }
    }

    /// Returns the raw JSON value of an attribute.
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Returns a copy of a nested mapping.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingKey`] when absent and
    /// [`ConfigError::NotAnObject`] when the attribute is not a mapping.
    pub fn get_nested(&self, key: &str) -> Result<Self, ConfigError> {
        let value = self
            .attributes
            .get(key)
            .ok_or_else(|| ConfigError::MissingKey {
                key: key.to_owned(),
            })?;
        Self::from_value(value.clone())
    }

    /// Returns a copy of a nested mapping, or an empty value when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotAnObject`] when the attribute is present but
    /// not a mapping.
    pub fn get_nested_or_empty(&self, key: &str) -> Result<Self, ConfigError> {
        match self.attributes.get(key) {
            None | Some(Value::Null) => Ok(Self::new()),
            Some(value) => Self::from_value(value.clone()),
        }
    }

    /// Returns the nested mapping stored under `key`, inserting an empty one
    /// when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotAnObject`] when the attribute holds a
    /// non-mapping value.
    pub fn get_nested_or_set_empty(
        &mut self,
        key: &str,
    ) -> Result<&mut Map<String, Value>, ConfigError> {
        let slot = self
            .attributes
            .entry(key.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if slot.is_null() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(map) => Ok(map),
            other => Err(ConfigError::NotAnObject {
                found: json_kind(other),
            }),
        }
    }

    /// Encodes `value` and stores it under `key`, replacing any previous
    /// value wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when `value` cannot be encoded.
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), ConfigError> {
        let encoded = serde_json::to_value(value).map_err(|source| ConfigError::InvalidValue {
            key: key.to_owned(),
            source,
        })?;
        self.set_value(key, encoded);
        Ok(())
    }

    /// Stores a raw JSON value under `key`, replacing any previous value.
    pub fn set_value(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_owned(), value);
    }

    /// Stores a nested mapping under `key`, replacing any previous value.
    pub fn set_nested(&mut self, key: &str, nested: Self) {
        self.set_value(key, Value::Object(nested.attributes));
    }

    /// Copies every attribute of `other` into this value, replacing
    /// same-named attributes wholesale.
    pub fn set_all(&mut self, other: &Self) {
        for (key, value) in &other.attributes {
            self.attributes.insert(key.clone(), value.clone());
        }
    }

    /// Merges `other` into this value.
    ///
    /// Nested mappings merge recursively. Arrays merge index-wise: an element
    /// recurses when both sides hold mappings or both hold arrays, is replaced
    /// otherwise, and trailing elements of `other` are appended. Any other
    /// combination replaces the attribute with the value from `other`.
    pub fn merge(&mut self, other: &Self) {
        merge_maps(&mut self.attributes, &other.attributes);
    }

    /// Returns an independent copy of this value.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    /// Removes an attribute and returns its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.attributes.shift_remove(key)
    }

    /// Returns `true` when the attribute is present.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Iterates attribute names in insertion order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Iterates attributes in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Returns `true` when no attributes are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Returns the number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Borrows the underlying mapping.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Consumes the value, returning the underlying mapping.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.attributes
    }

    /// Returns a JSON copy of this value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.attributes.clone())
    }

    /// Renders this value as compact JSON.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        self.to_value().to_string()
    }

    /// Reinterprets this value as user configuration.
    #[must_use]
    pub fn into_config(self) -> ConfigSource {
        ConfigSource::from(self)
    }

    /// Reinterprets this value as a bound task.
    #[must_use]
    pub fn into_task(self) -> TaskSource {
        TaskSource::from(self)
    }

    /// Reinterprets this value as a partition report.
    #[must_use]
    pub fn into_report(self) -> TaskReport {
        TaskReport::from(self)
    }

    /// Reinterprets this value as a config diff.
    #[must_use]
    pub fn into_diff(self) -> ConfigDiff {
        ConfigDiff::from(self)
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T, ConfigError> {
    T::deserialize(value).map_err(|source| ConfigError::InvalidValue {
        key: key.to_owned(),
        source,
    })
}

fn merge_maps(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, incoming) in source {
        match (target.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_maps(existing, nested),
            (Some(Value::Array(existing)), Value::Array(items)) => merge_arrays(existing, items),
            _ => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
}

fn merge_arrays(target: &mut Vec<Value>, source: &[Value]) {
    for (index, incoming) in source.iter().enumerate() {
        match (target.get_mut(index), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_maps(existing, nested),
            (Some(Value::Array(existing)), Value::Array(items)) => merge_arrays(existing, items),
            (Some(slot), _) => *slot = incoming.clone(),
            (None, _) => target.push(incoming.clone()),
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}

impl From<Map<String, Value>> for DataSource {
    fn from(attributes: Map<String, Value>) -> Self {
        Self { attributes }
    }
}

impl TryFrom<Value> for DataSource {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

#[cfg(test)]
mod tests;
