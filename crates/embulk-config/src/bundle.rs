//! Named plugin bundle directories.
//!
//! Bundles are configured as `scope=path` pairs, e.g.
//! `EMBULK_BUNDLES=team=/opt/embulk/team-plugins`.

use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A bundle scope and the directory holding its archives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BundleSpec {
    scope: String,
    path: Utf8PathBuf,
}

impl BundleSpec {
    /// Creates a bundle entry.
    #[must_use]
    pub fn new(scope: impl Into<String>, path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            scope: scope.into(),
            path: path.into(),
        }
    }

    /// Scope referenced by bundled plugin types.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Directory of the bundle's archives.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// Errors raised while parsing a [`BundleSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BundleSpecError {
    /// The text has no `=` separator.
    #[error("bundle '{spec}' must be written as scope=path")]
    MissingSeparator {
        /// Rejected text.
        spec: String,
    },
    /// The scope before `=` is blank.
    #[error("bundle '{spec}' has an empty scope")]
    EmptyScope {
        /// Rejected text.
        spec: String,
    },
    /// The path after `=` is blank.
    #[error("bundle '{spec}' has an empty path")]
    EmptyPath {
        /// Rejected text.
        spec: String,
    },
}

impl FromStr for BundleSpec {
    type Err = BundleSpecError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (scope, path) = spec
            .split_once('=')
            .ok_or_else(|| BundleSpecError::MissingSeparator {
                spec: spec.to_owned(),
            })?;
        let scope_text = scope.trim();
        let path_text = path.trim();
        if scope_text.is_empty() {
            return Err(BundleSpecError::EmptyScope {
                spec: spec.to_owned(),
            });
        }
        if path_text.is_empty() {
            return Err(BundleSpecError::EmptyPath {
                spec: spec.to_owned(),
            });
        }
        Ok(Self::new(scope_text, path_text))
    }
}

impl TryFrom<String> for BundleSpec {
    type Error = BundleSpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BundleSpec> for String {
    fn from(value: BundleSpec) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BundleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.scope, self.path)
    }
}
