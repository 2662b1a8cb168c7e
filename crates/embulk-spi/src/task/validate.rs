//! Validation hooks invoked after a task is fully bound.

use std::fmt;

use serde_json::Value;

use super::BoundTask;

/// One failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    field_path: String,
    message: String,
    invalid_value: Value,
}

impl Violation {
    /// Creates a violation for `field_path`.
    #[must_use]
    pub fn new(field_path: impl Into<String>, message: impl Into<String>, invalid_value: Value) -> Self {
        Self {
            field_path: field_path.into(),
            message: message.into(),
            invalid_value,
        }
    }

    /// Dotted path of the offending field.
    #[must_use]
    pub fn field_path(&self) -> &str {
        &self.field_path
    }

    /// Rule description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Value that broke the rule.
    #[must_use]
    pub const fn invalid_value(&self) -> &Value {
        &self.invalid_value
    }

    pub(crate) fn prefixed(mut self, prefix: &str) -> Self {
        if !prefix.is_empty() {
            self.field_path = format!("{prefix}.{}", self.field_path);
        }
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (value: {})",
            self.field_path, self.message, self.invalid_value
        )
    }
}

/// External validation mechanism consulted with a fully bound task.
pub trait TaskValidator: Send + Sync {
    /// Returns every violated rule; an empty list means the task is valid.
    fn validate(&self, task: &BoundTask) -> Vec<Violation>;
}

impl<F> TaskValidator for F
where
    F: Fn(&BoundTask) -> Vec<Violation> + Send + Sync,
{
    fn validate(&self, task: &BoundTask) -> Vec<Violation> {
        self(task)
    }
}

#[derive(Debug, Clone)]
enum Rule {
    Min { field: String, bound: i64 },
    Max { field: String, bound: i64 },
    NonEmpty { field: String },
    OneOf { field: String, allowed: Vec<String> },
}

/// Declarative rule set covering common field constraints.
///
/// `null` values are not checked, so rules compose with optional fields.
///
/// # Example
///
/// ```
/// use embulk_spi::Rules;
///
/// let rules = Rules::new().min("Port", 1).max("Port", 65_535).non_empty("Host");
/// # let _ = rules;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Rules {
    rules: Vec<Rule>,
}

impl Rules {
    /// Creates an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires an integer field to be at least `bound`.
    #[must_use]
    pub fn min(mut self, field: impl Into<String>, bound: i64) -> Self {
        self.rules.push(Rule::Min {
            field: field.into(),
            bound,
        });
        self
    }

    /// Requires an integer field to be at most `bound`.
    #[must_use]
    pub fn max(mut self, field: impl Into<String>, bound: i64) -> Self {
        self.rules.push(Rule::Max {
            field: field.into(),
            bound,
        });
        self
    }

    /// Requires a string, list, or mapping field to be non-empty.
    #[must_use]
    pub fn non_empty(mut self, field: impl Into<String>) -> Self {
        self.rules.push(Rule::NonEmpty {
            field: field.into(),
        });
        self
    }

    /// Requires a string field to take one of `allowed`.
    #[must_use]
    pub fn one_of<I, S>(mut self, field: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.push(Rule::OneOf {
            field: field.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        });
        self
    }
}

impl TaskValidator for Rules {
    fn validate(&self, task: &BoundTask) -> Vec<Violation> {
        self.rules
            .iter()
            .filter_map(|rule| check(rule, task))
            .collect()
    }
}

fn check(rule: &Rule, task: &BoundTask) -> Option<Violation> {
    let (field, message) = match rule {
        Rule::Min { field, bound } => {
            let value = task.get_value(field)?.as_i64()?;
            (value < *bound).then(|| (field, format!("must be at least {bound}")))?
        }
        Rule::Max { field, bound } => {
            let value = task.get_value(field)?.as_i64()?;
            (value > *bound).then(|| (field, format!("must be at most {bound}")))?
        }
        Rule::NonEmpty { field } => {
            let empty = match task.get_value(field)? {
                Value::String(text) => text.is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::Object(map) => map.is_empty(),
                _ => false,
            };
            empty.then(|| (field, "must not be empty".to_owned()))?
        }
        Rule::OneOf { field, allowed } => {
            let text = task.get_value(field)?.as_str()?;
            (!allowed.iter().any(|candidate| candidate == text))
                .then(|| (field, format!("must be one of {}", allowed.join(", "))))?
        }
    };
    let value = task.get_value(field).cloned().unwrap_or(Value::Null);
    Some(Violation::new(field.as_str(), message, value))
}
