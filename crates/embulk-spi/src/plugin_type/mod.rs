//! Plugin references as they appear in transfer configuration.
//!
//! A plugin reference is either a bare string, naming a plugin resolved by
//! convention, or a mapping whose `source` discriminator (alias `type`)
//! selects a versioned artifact or a scoped bundle:
//!
//! ```json
//! "csv"
//! {"source": "maven", "group": "org.embulk", "name": "s3", "version": "0.6.0"}
//! {"source": "bundle", "scope": "team", "name": "s3"}
//! ```
//!
//! Both forms round-trip unchanged through [`serde`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{ConfigError, json_kind};

const SOURCE_KEY: &str = "source";
const SOURCE_ALIAS_KEY: &str = "type";
const DEFAULT_SOURCE: &str = "default";
const VERSIONED_SOURCE: &str = "maven";
const VERSIONED_SOURCE_ALIAS: &str = "versioned";
const BUNDLE_SOURCE: &str = "bundle";

/// Identifies a plugin by name and, optionally, by where it comes from.
///
/// Equality and hashing cover the variant and every present field, so a
/// `PluginType` is usable as a cache key.
///
/// # Example
///
/// ```
/// use embulk_spi::PluginType;
///
/// let plugin: PluginType = serde_json::from_str("\"csv\"").expect("decode");
/// assert_eq!(plugin, PluginType::named("csv"));
/// assert_eq!(serde_json::to_string(&plugin).expect("encode"), "\"csv\"");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginType {
    /// Resolved by convention from the builtin registry or an embedded
    /// archive named `<prefix>-<category>-<name>`.
    Default {
        /// Plugin name.
        name: String,
    },
    /// Resolved from an external artifact repository.
    Versioned {
        /// Plugin name.
        name: String,
        /// Artifact group.
        group: String,
        /// Optional artifact classifier.
        classifier: Option<String>,
        /// Exact version, or `None` for the highest available.
        version: Option<String>,
    },
    /// Resolved from a named, user-managed plugin bundle.
    ScopedBundle {
        /// Plugin name.
        name: String,
        /// Bundle scope.
        scope: String,
    },
}

impl PluginType {
    /// Creates a [`PluginType::Default`] reference.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Default { name: name.into() }
    }

    /// Creates a [`PluginType::Versioned`] reference without a classifier.
    #[must_use]
    pub fn versioned(
        group: impl Into<String>,
        name: impl Into<String>,
        version: Option<&str>,
    ) -> Self {
        Self::Versioned {
            name: name.into(),
            group: group.into(),
            classifier: None,
            version: version.map(str::to_owned),
        }
    }

    /// Creates a [`PluginType::ScopedBundle`] reference.
    #[must_use]
    pub fn bundled(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ScopedBundle {
            name: name.into(),
            scope: scope.into(),
        }
    }

    /// Returns the plugin name shared by every variant.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Default { name }
            | Self::Versioned { name, .. }
            | Self::ScopedBundle { name, .. } => name,
        }
    }

    /// Returns the discriminator written for this variant.
    #[must_use]
    pub const fn source_name(&self) -> &'static str {
        match self {
            Self::Default { .. } => DEFAULT_SOURCE,
            Self::Versioned { .. } => VERSIONED_SOURCE,
            Self::ScopedBundle { .. } => BUNDLE_SOURCE,
        }
    }

    /// Decodes a plugin reference from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PluginType`] when the value is neither a string
    /// nor a mapping, when the discriminator is unknown, or when a required
    /// field is missing or empty.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        match value {
            Value::String(name) => name.parse(),
            Value::Object(map) => Self::from_mapping(map),
            other => Err(invalid(format!(
                "expected a string or a mapping but found {}",
                json_kind(other)
            ))),
        }
    }

    /// Encodes this reference to its JSON form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Default { name } => Value::String(name.clone()),
            Self::Versioned {
                name,
                group,
                classifier,
                version,
            } => {
                let mut map = Map::new();
                map.insert(SOURCE_KEY.to_owned(), Value::from(VERSIONED_SOURCE));
                map.insert("group".to_owned(), Value::from(group.as_str()));
                map.insert("name".to_owned(), Value::from(name.as_str()));
                if let Some(classifier) = classifier {
                    map.insert("classifier".to_owned(), Value::from(classifier.as_str()));
                }
                if let Some(version) = version {
                    map.insert("version".to_owned(), Value::from(version.as_str()));
                }
                Value::Object(map)
            }
            Self::ScopedBundle { name, scope } => {
                let mut map = Map::new();
                map.insert(SOURCE_KEY.to_owned(), Value::from(BUNDLE_SOURCE));
                map.insert("scope".to_owned(), Value::from(scope.as_str()));
                map.insert("name".to_owned(), Value::from(name.as_str()));
                Value::Object(map)
            }
        }
    }

    fn from_mapping(map: &Map<String, Value>) -> Result<Self, ConfigError> {
        let source = match map.get(SOURCE_KEY).or_else(|| map.get(SOURCE_ALIAS_KEY)) {
            None => DEFAULT_SOURCE,
            Some(Value::String(source)) => source.as_str(),
            Some(other) => {
                return Err(invalid(format!(
                    "'{SOURCE_KEY}' must be a string but found {}",
                    json_kind(other)
                )));
            }
        };
        let name = required(map, "name")?;
        match source {
            DEFAULT_SOURCE => Ok(Self::Default { name }),
            VERSIONED_SOURCE | VERSIONED_SOURCE_ALIAS => Ok(Self::Versioned {
                name,
                group: required(map, "group")?,
                classifier: optional(map, "classifier")?,
                version: optional(map, "version")?,
            }),
            BUNDLE_SOURCE => Ok(Self::ScopedBundle {
                name,
                scope: required(map, "scope")?,
            }),
            unknown => Err(invalid(format!("unknown plugin source '{unknown}'"))),
        }
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::PluginType { message }
}

fn required(map: &Map<String, Value>, key: &str) -> Result<String, ConfigError> {
    optional(map, key)?.ok_or_else(|| invalid(format!("'{key}' is required")))
}

fn optional(map: &Map<String, Value>, key: &str) -> Result<Option<String>, ConfigError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => {
            Err(invalid(format!("'{key}' must not be empty")))
        }
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(other) => Err(invalid(format!(
            "'{key}' must be a string but found {}",
            json_kind(other)
        ))),
    }
}

impl FromStr for PluginType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.is_empty() {
            return Err(invalid("plugin name must not be empty".to_owned()));
        }
        Ok(Self::named(name))
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default { name } => f.write_str(name),
            Self::Versioned {
                name,
                group,
                classifier,
                version,
            } => {
                write!(f, "{VERSIONED_SOURCE}:{group}:{name}")?;
                if let Some(classifier) = classifier {
                    write!(f, ":{classifier}")?;
                }
                write!(f, ":{}", version.as_deref().unwrap_or("latest"))
            }
            Self::ScopedBundle { name, scope } => write!(f, "{BUNDLE_SOURCE}:{scope}:{name}"),
        }
    }
}

impl Serialize for PluginType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PluginType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}
