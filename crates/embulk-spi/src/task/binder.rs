//! Binding of structured values to task descriptors.

use serde_json::{Map, Number, Value};

use super::{BoundTask, FieldSpec, FieldType, TaskDescriptor, Violation};
use crate::data_source::{DataSource, TaskSource};
use crate::error::ConfigError;
use crate::plugin_type::PluginType;

/// Selects which fields participate in a bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindMode {
    /// Binds user configuration: fields are read by their configuration key
    /// and keyless fields are set to `null`.
    #[default]
    Config,
    /// Re-reads a dumped task: every field is read by its field name.
    Task,
}

/// Binds [`DataSource`] values to [`TaskDescriptor`]s.
///
/// Unknown input keys are ignored. Every missing required field is reported
/// in one [`ConfigError::MissingRequiredFields`], and every rule violation in
/// one [`ConfigError::ValidationFailed`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskBinder {
    mode: BindMode,
}

impl TaskBinder {
    /// Creates a binder for `mode`.
    #[must_use]
    pub const fn new(mode: BindMode) -> Self {
        Self { mode }
    }

    /// Binder for user configuration.
    #[must_use]
    pub const fn config() -> Self {
        Self::new(BindMode::Config)
    }

    /// Binder for dumped tasks.
    #[must_use]
    pub const fn task() -> Self {
        Self::new(BindMode::Task)
    }

    /// Active mode.
    #[must_use]
    pub const fn mode(&self) -> BindMode {
        self.mode
    }

    /// Binds `source` to `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when a value has the wrong type,
    /// [`ConfigError::MissingRequiredFields`] listing every field without a
    /// value or default, and [`ConfigError::ValidationFailed`] listing every
    /// rule violation.
    pub fn bind(
        &self,
        descriptor: &TaskDescriptor,
        source: &DataSource,
    ) -> Result<BoundTask, ConfigError> {
        let mut binding = Binding {
            mode: self.mode,
            missing: Vec::new(),
            violations: Vec::new(),
        };
        let task = binding.bind(descriptor, source.as_map(), "")?;
        binding.finish(descriptor.name(), task)
    }

    /// Dumps a bound task keyed by field names.
    #[must_use]
    pub fn serialize(task: &BoundTask) -> TaskSource {
        task.dump()
    }
}

struct Binding {
    mode: BindMode,
    missing: Vec<String>,
    violations: Vec<Violation>,
}

impl Binding {
    fn bind(
        &mut self,
        descriptor: &TaskDescriptor,
        input: &Map<String, Value>,
        prefix: &str,
    ) -> Result<BoundTask, ConfigError> {
        let fields = descriptor.fields();
        let mut values: Vec<Option<Value>> = vec![None; fields.len()];
        let by_field_name = self.mode == BindMode::Task;

        for (key, raw) in input {
            for &index in descriptor.indices_for(by_field_name, key) {
                let (Some(field), Some(slot)) = (fields.get(index), values.get_mut(index)) else {
                    continue;
                };
                let path = join(prefix, field.name());
                *slot = Some(self.decode(&path, field.field_type(), raw)?);
            }
        }

        let missing_before = self.missing.len();
        let mut bound = Map::new();
        for ((index, field), slot) in fields.iter().enumerate().zip(values) {
            let path = join(prefix, field.name());
            let value = match slot {
                Some(value) => value,
                None => match self.fill(descriptor, index, field, &path)? {
                    Some(value) => value,
                    None => {
                        self.missing.push(path);
                        continue;
                    }
                },
            };
            bound.insert(field.name().to_owned(), value);
        }

        let task = BoundTask::new(descriptor.name(), bound);
        if self.missing.len() == missing_before {
            for validator in descriptor.validators() {
                self.violations.extend(
                    validator
                        .validate(&task)
                        .into_iter()
                        .map(|violation| violation.prefixed(prefix)),
                );
            }
        }
        Ok(task)
    }

    fn fill(
        &mut self,
        descriptor: &TaskDescriptor,
        index: usize,
        field: &FieldSpec,
        path: &str,
    ) -> Result<Option<Value>, ConfigError> {
        if self.mode == BindMode::Config && field.key().is_none() {
            return Ok(Some(Value::Null));
        }
        if let Some(default) = descriptor.default_value(index) {
            return self.decode(path, field.field_type(), default).map(Some);
        }
        if field.field_type().is_optional() || field.key().is_none() {
            return Ok(Some(Value::Null));
        }
        Ok(None)
    }

    fn decode(&mut self, path: &str, field_type: &FieldType, raw: &Value) -> Result<Value, ConfigError> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = || ConfigError::InvalidField {
            field: path.to_owned(),
            expected: field_type.to_string(),
            found: raw.to_string(),
        };
        match field_type {
            FieldType::Json => Ok(raw.clone()),
            FieldType::Optional(inner) => self.decode(path, inner, raw),
            FieldType::Bool => match raw {
                Value::Bool(_) => Ok(raw.clone()),
                Value::String(text) => match text.trim() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            FieldType::Integer => match raw {
                Value::Number(number) if number.is_i64() || number.is_u64() => Ok(raw.clone()),
                Value::String(text) => text
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            FieldType::Float => match raw {
                Value::Number(_) => Ok(raw.clone()),
                Value::String(text) => text
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            FieldType::String => match raw {
                Value::String(_) => Ok(raw.clone()),
                Value::Number(number) => Ok(Value::String(number.to_string())),
                Value::Bool(flag) => Ok(Value::String(flag.to_string())),
                _ => Err(mismatch()),
            },
            FieldType::PluginType => PluginType::from_value(raw)
                .map(|plugin| plugin.to_value())
                .map_err(|_| mismatch()),
            FieldType::List(element) => {
                let Value::Array(items) = raw else {
                    return Err(mismatch());
                };
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| self.decode(&format!("{path}[{index}]"), element, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            FieldType::Task(resolve) => {
                let Value::Object(map) = raw else {
                    return Err(mismatch());
                };
                let nested = self.bind(resolve(), map, path)?;
                Ok(Value::Object(nested.into_fields()))
            }
        }
    }

    fn finish(self, task: &str, bound: BoundTask) -> Result<BoundTask, ConfigError> {
        if !self.missing.is_empty() {
            return Err(ConfigError::MissingRequiredFields {
                task: task.to_owned(),
                fields: self.missing,
            });
        }
        if !self.violations.is_empty() {
            return Err(ConfigError::ValidationFailed {
                task: task.to_owned(),
                violations: self.violations,
            });
        }
        Ok(bound)
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}.{name}")
    }
}
