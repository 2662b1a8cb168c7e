//! Errors raised while reading, binding, or checkpointing configuration.
//!
//! Binding errors aggregate every offending field in a single value so a user
//! fixing a configuration sees the whole list at once.

use thiserror::Error;

use crate::task::Violation;

/// Errors arising from configuration values and task binding.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Text could not be parsed as JSON.
    #[error("invalid JSON: {source}")]
    Json {
        /// Underlying parser error.
        #[source]
        source: serde_json::Error,
    },

    /// A JSON value other than a mapping was supplied where a mapping is
    /// required.
    #[error("expected a JSON object but found {found}")]
    NotAnObject {
        /// JSON kind that was found instead.
        found: &'static str,
    },

    /// A required attribute was absent.
    #[error("attribute '{key}' is required but not set")]
    MissingKey {
        /// Attribute that was looked up.
        key: String,
    },

    /// An attribute was present but could not be decoded into the requested
    /// type.
    #[error("attribute '{key}' has an invalid value: {source}")]
    InvalidValue {
        /// Attribute that was decoded.
        key: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// One or more described fields had neither an input value nor a default.
    #[error("task '{task}' is missing required fields: {}", .fields.join(", "))]
    MissingRequiredFields {
        /// Name of the task descriptor.
        task: String,
        /// Every missing field path, in declaration order.
        fields: Vec<String>,
    },

    /// A field value does not match its declared type.
    #[error("field '{field}' expects {expected} but found {found}")]
    InvalidField {
        /// Path of the offending field.
        field: String,
        /// Declared field type.
        expected: String,
        /// Offending value rendered as JSON.
        found: String,
    },

    /// A task descriptor is malformed.
    #[error("invalid task descriptor '{task}': {message}")]
    InvalidDescriptor {
        /// Name of the task descriptor.
        task: String,
        /// Description of the problem.
        message: String,
    },

    /// A bound task violated one or more validation rules.
    #[error("task '{task}' failed validation: {}", render_violations(.violations))]
    ValidationFailed {
        /// Name of the task descriptor.
        task: String,
        /// Every violation reported by the validators.
        violations: Vec<Violation>,
    },

    /// A field name is not part of the bound task.
    #[error("task '{task}' has no field '{field}'")]
    UnknownField {
        /// Name of the task descriptor.
        task: String,
        /// Field that was requested.
        field: String,
    },

    /// A plugin reference could not be decoded.
    #[error("invalid plugin type: {message}")]
    PluginType {
        /// Description of the problem.
        message: String,
    },

    /// A partition index is outside the recorded partition count.
    #[error("partition {index} is out of range for {count} {side} partitions")]
    PartitionOutOfRange {
        /// Requested partition index.
        index: usize,
        /// Number of recorded partitions.
        count: usize,
        /// Either `input` or `output`.
        side: &'static str,
    },
}

fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for ConfigError {
    fn from(source: serde_json::Error) -> Self {
        Self::Json { source }
    }
}

/// Returns a short name for the kind of a JSON value.
#[must_use]
pub const fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
