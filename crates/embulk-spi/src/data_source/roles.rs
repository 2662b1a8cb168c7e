//! Role wrappers around [`DataSource`].
//!
//! Each role shares the representation but documents intent at call sites.
//! [`TaskSource`] only dereferences immutably: a bound task is read-only.

use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use super::DataSource;
use crate::error::ConfigError;

macro_rules! data_source_role {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(DataSource);

        impl $name {
            /// Creates an empty value.
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Parses JSON text that must contain a mapping.
            ///
            /// # Errors
            ///
            /// Returns [`ConfigError`] for malformed or non-mapping text.
            pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
                DataSource::from_json_str(text).map(Self)
            }

            /// Consumes the wrapper, returning the shared representation.
            #[must_use]
            pub fn into_inner(self) -> DataSource {
                self.0
            }
        }

        impl Deref for $name {
            type Target = DataSource;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<DataSource> for $name {
            fn from(value: DataSource) -> Self {
                Self(value)
            }
        }

        impl From<$name> for DataSource {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

macro_rules! mutable_role {
    ($name:ident) => {
        impl DerefMut for $name {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }
    };
}

data_source_role!(
    /// User-authored configuration for a transfer or a plugin.
    ConfigSource
);
mutable_role!(ConfigSource);

data_source_role!(
    /// Configuration a plugin received after defaults and validation.
    TaskSource
);

data_source_role!(
    /// Result produced by one committed partition.
    TaskReport
);
mutable_role!(TaskReport);

data_source_role!(
    /// Hints merged back into the configuration of the next run.
    ConfigDiff
);
mutable_role!(ConfigDiff);

impl ConfigSource {
    /// Applies a diff produced by a previous run using [`DataSource::merge`].
    pub fn apply_diff(&mut self, diff: &ConfigDiff) {
        self.0.merge(diff);
    }
}
