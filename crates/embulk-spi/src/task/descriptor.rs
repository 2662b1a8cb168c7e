//! Field-descriptor tables describing task types.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use super::validate::TaskValidator;
use crate::error::ConfigError;

/// Resolves the descriptor of a nested task type.
///
/// Descriptors are built once per type, typically inside a
/// `once_cell::sync::OnceCell`, so the resolver hands out a `'static`
/// reference.
pub type DescriptorResolver = fn() -> &'static TaskDescriptor;

/// Declared type of a task field.
#[derive(Debug, Clone)]
pub enum FieldType {
    /// JSON boolean; the strings `"true"` and `"false"` are accepted.
    Bool,
    /// Signed integer; numeric strings are accepted.
    Integer,
    /// Floating point number; numeric strings are accepted.
    Float,
    /// Text; numbers and booleans are rendered as text.
    String,
    /// Any JSON value, stored unchanged.
    Json,
    /// A plugin reference in string or mapping form.
    PluginType,
    /// A JSON array whose elements share one type.
    List(Box<FieldType>),
    /// A value that may be absent; absence binds to `null`.
    Optional(Box<FieldType>),
    /// A nested task bound with its own descriptor.
    Task(DescriptorResolver),
}

impl FieldType {
    /// Creates a list type.
    #[must_use]
    pub fn list(element: Self) -> Self {
        Self::List(Box::new(element))
    }

    /// Creates an optional type.
    #[must_use]
    pub fn optional(inner: Self) -> Self {
        Self::Optional(Box::new(inner))
    }

    /// Returns `true` for [`FieldType::Optional`].
    #[must_use]
    pub const fn is_optional(&self) -> bool {
        matches!(self, Self::Optional(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("boolean"),
            Self::Integer => f.write_str("integer"),
            Self::Float => f.write_str("float"),
            Self::String => f.write_str("string"),
            Self::Json => f.write_str("json"),
            Self::PluginType => f.write_str("plugin type"),
            Self::List(element) => write!(f, "list of {element}"),
            Self::Optional(inner) => write!(f, "optional {inner}"),
            Self::Task(resolve) => write!(f, "task {}", resolve().name()),
        }
    }
}

/// Description of one task field.
///
/// A field either carries an explicit JSON key, optionally with a default
/// literal, or has no key. Keyless fields are skipped when binding user
/// configuration and bound by field name when re-reading a dumped task.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    field_type: FieldType,
    key: Option<String>,
    default: Option<String>,
}

impl FieldSpec {
    /// Describes a field read from configuration key `key`.
    #[must_use]
    pub fn config(name: impl Into<String>, key: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            key: Some(key.into()),
            default: None,
        }
    }

    /// Describes a field owned by the plugin rather than the user.
    #[must_use]
    pub fn keyless(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            key: None,
            default: None,
        }
    }

    /// Attaches a default value written as JSON text, e.g. `"\",\""` or `"[]"`.
    #[must_use]
    pub fn with_default(mut self, literal: impl Into<String>) -> Self {
        self.default = Some(literal.into());
        self
    }

    /// Field name used when dumping a bound task.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    #[must_use]
    pub const fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    /// Configuration key, if any.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Default literal, if any.
    #[must_use]
    pub fn default_literal(&self) -> Option<&str> {
        self.default.as_deref()
    }
}

/// Immutable description of a task type.
///
/// Build one per task type and reuse it:
///
/// ```
/// use once_cell::sync::OnceCell;
///
/// use embulk_spi::{FieldSpec, FieldType, TaskDescriptor};
///
/// fn descriptor() -> &'static TaskDescriptor {
///     static DESCRIPTOR: OnceCell<TaskDescriptor> = OnceCell::new();
///     DESCRIPTOR.get_or_init(|| {
///         TaskDescriptor::builder("StdoutTask")
///             .field(FieldSpec::config("Prefix", "prefix", FieldType::String).with_default("\"\""))
///             .build()
///             .unwrap_or_else(|error| panic!("static descriptor: {error}"))
///     })
/// }
///
/// assert_eq!(descriptor().fields().len(), 1);
/// ```
pub struct TaskDescriptor {
    name: String,
    fields: Vec<FieldSpec>,
    defaults: Vec<Option<Value>>,
    by_key: HashMap<String, Vec<usize>>,
    by_name: HashMap<String, Vec<usize>>,
    validators: Vec<Box<dyn TaskValidator>>,
}

impl TaskDescriptor {
    /// Starts describing a task type.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> TaskDescriptorBuilder {
        TaskDescriptorBuilder {
            name: name.into(),
            fields: Vec::new(),
            validators: Vec::new(),
        }
    }

    /// Task type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.by_name
            .get(name)
            .and_then(|indices| indices.first())
            .and_then(|&index| self.fields.get(index))
    }

    pub(crate) fn indices_for(&self, by_field_name: bool, key: &str) -> &[usize] {
        let table = if by_field_name {
            &self.by_name
        } else {
            &self.by_key
        };
        table.get(key).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn default_value(&self, index: usize) -> Option<&Value> {
        self.defaults.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn validators(&self) -> &[Box<dyn TaskValidator>] {
        &self.validators
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("validators", &self.validators.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`TaskDescriptor`].
pub struct TaskDescriptorBuilder {
    name: String,
    fields: Vec<FieldSpec>,
    validators: Vec<Box<dyn TaskValidator>>,
}

impl TaskDescriptorBuilder {
    /// Appends a field.
    #[must_use]
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Appends a validator run after every successful bind.
    #[must_use]
    pub fn validator(mut self, validator: impl TaskValidator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Finishes the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidDescriptor`] for an empty task name, a
    /// duplicate field name, or a default literal that is not valid JSON.
    pub fn build(self) -> Result<TaskDescriptor, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidDescriptor {
            task: self.name.clone(),
            message,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("task name must not be empty".to_owned()));
        }

        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        let mut defaults = Vec::with_capacity(self.fields.len());
        for (index, field) in self.fields.iter().enumerate() {
            if by_name.contains_key(field.name()) {
                return Err(invalid(format!("duplicate field '{}'", field.name())));
            }
            by_name.insert(field.name().to_owned(), vec![index]);
            if let Some(key) = field.key() {
                by_key.entry(key.to_owned()).or_default().push(index);
            }
            let default = field
                .default_literal()
                .map(serde_json::from_str::<Value>)
                .transpose()
                .map_err(|error| {
                    invalid(format!(
                        "default of field '{}' is not valid JSON: {error}",
                        field.name()
                    ))
                })?;
            defaults.push(default);
        }

        Ok(TaskDescriptor {
            name: self.name,
            fields: self.fields,
            defaults,
            by_key,
            by_name,
            validators: self.validators,
        })
    }
}
