//! Materialised task values.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::{TaskBinder, TaskDescriptor};
use crate::data_source::{DataSource, TaskSource};
use crate::error::ConfigError;

/// A task whose every described field holds a value.
///
/// Equality and hashing consider only the field map; the descriptor name
/// appears in [`fmt::Display`] output. Serialisation always uses field names.
#[derive(Debug, Clone)]
pub struct BoundTask {
    descriptor: String,
    fields: Map<String, Value>,
}

impl BoundTask {
    pub(crate) fn new(descriptor: &str, fields: Map<String, Value>) -> Self {
        Self {
            descriptor: descriptor.to_owned(),
            fields,
        }
    }

    /// Name of the descriptor this task was bound with.
    #[must_use]
    pub fn descriptor_name(&self) -> &str {
        &self.descriptor
    }

    /// Field values keyed by field name.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Raw value of a field.
    #[must_use]
    pub fn get_value(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Decodes a field into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownField`] when the field is not described
    /// and [`ConfigError::InvalidValue`] when it cannot be decoded.
    pub fn get<T: DeserializeOwned>(&self, field: &str) -> Result<T, ConfigError> {
        let value = self.fields.get(field).ok_or_else(|| self.unknown(field))?;
        T::deserialize(value).map_err(|source| ConfigError::InvalidValue {
            key: field.to_owned(),
            source,
        })
    }

    /// Re-binds a nested task field with its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownField`] for an undescribed field,
    /// [`ConfigError::NotAnObject`] when the field does not hold a task, or
    /// any binding error raised by `descriptor`.
    pub fn nested(&self, field: &str, descriptor: &TaskDescriptor) -> Result<Self, ConfigError> {
        let value = self.fields.get(field).ok_or_else(|| self.unknown(field))?;
        let source = DataSource::from_value(value.clone())?;
        TaskBinder::task().bind(descriptor, &source)
    }

    /// Returns a copy with `field` replaced by `value`.
    ///
    /// Plugins use this to fill keyless fields they own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownField`] when the field is not described
    /// and [`ConfigError::InvalidValue`] when `value` cannot be encoded.
    pub fn with_field<T: Serialize + ?Sized>(
        &self,
        field: &str,
        value: &T,
    ) -> Result<Self, ConfigError> {
        if !self.fields.contains_key(field) {
            return Err(self.unknown(field));
        }
        let encoded = serde_json::to_value(value).map_err(|source| ConfigError::InvalidValue {
            key: field.to_owned(),
            source,
        })?;
        let mut updated = self.clone();
        updated.fields.insert(field.to_owned(), encoded);
        Ok(updated)
    }

    /// Decodes the whole task into a plain struct whose fields are named
    /// after the descriptor's field names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when decoding fails.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        T::deserialize(Value::Object(self.fields.clone())).map_err(|source| {
            ConfigError::InvalidValue {
                key: self.descriptor.clone(),
                source,
            }
        })
    }

    /// Dumps the task keyed by field names.
    #[must_use]
    pub fn dump(&self) -> TaskSource {
        DataSource::from_map(self.fields.clone()).into_task()
    }

    pub(crate) fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    fn unknown(&self, field: &str) -> ConfigError {
        ConfigError::UnknownField {
            task: self.descriptor.clone(),
            field: field.to_owned(),
        }
    }
}

impl PartialEq for BoundTask {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for BoundTask {}

impl Hash for BoundTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_map(&self.fields, state);
    }
}

// Map equality ignores key order, so hashing visits keys sorted.
fn hash_map<H: Hasher>(map: &Map<String, Value>, state: &mut H) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys.len().hash(state);
    for key in keys {
        key.hash(state);
        if let Some(value) = map.get(key) {
            hash_value(value, state);
        }
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0_u8.hash(state),
        Value::Bool(flag) => {
            1_u8.hash(state);
            flag.hash(state);
        }
        Value::Number(number) => {
            2_u8.hash(state);
            number.to_string().hash(state);
        }
        Value::String(text) => {
            3_u8.hash(state);
            text.hash(state);
        }
        Value::Array(items) => {
            4_u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            5_u8.hash(state);
            hash_map(map, state);
        }
    }
}

impl Serialize for BoundTask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl fmt::Display for BoundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = Value::Object(self.fields.clone());
        write!(f, "{}{rendered}", self.descriptor)
    }
}
