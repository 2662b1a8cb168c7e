//! Domain errors raised while resolving, loading, and running plugins.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. I/O errors are wrapped in `Arc`
//! to satisfy the `result_large_err` Clippy lint.

use std::path::PathBuf;
use std::sync::Arc;

use embulk_spi::ConfigError;
use thiserror::Error;

use crate::capability::CapabilityKind;

/// Errors arising from plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No plugin source could resolve the request.
    #[error("{kind} plugin '{plugin}' not found{}", render_diagnostics(.diagnostics))]
    PluginNotFound {
        /// Requested capability kind.
        kind: CapabilityKind,
        /// Requested plugin, rendered for display.
        plugin: String,
        /// One diagnostic per source that explained its refusal.
        diagnostics: Vec<String>,
        /// Loading failures recorded while falling through sources.
        causes: Vec<Self>,
    },

    /// A versioned lookup found no candidate, or not the requested version.
    #[error(
        "plugin '{name}' has no version matching {}; available: [{}]",
        .requested.as_deref().unwrap_or("any"),
        .available.join(", ")
    )]
    AmbiguousOrMissingVersion {
        /// Requested plugin, rendered for display.
        name: String,
        /// Requested version, or `None` for the highest.
        requested: Option<String>,
        /// Versions found among the candidates.
        available: Vec<String>,
    },

    /// Plugin registrations contradict each other.
    #[error("configuration conflict: {message}")]
    ConfigurationConflict {
        /// Description of the conflict.
        message: String,
    },

    /// A plugin class could not be loaded from its archive.
    #[error("failed to load class '{class}': {message}")]
    ClassLoadFailure {
        /// Class that was being loaded.
        class: String,
        /// Description of the failure.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// A plugin declared a mixin that is not registered.
    #[error("plugin class '{class}' declares unknown mixin '{mixin}'")]
    MixinNotFound {
        /// Declaring class.
        class: String,
        /// Missing mixin name.
        mixin: String,
    },

    /// A resolved class does not provide the requested capability.
    #[error("plugin class '{class}' provides {provided} but {requested} was requested")]
    KindMismatch {
        /// Resolved class.
        class: String,
        /// Requested capability kind.
        requested: CapabilityKind,
        /// Capability kind the class provides.
        provided: CapabilityKind,
    },

    /// A plugin archive could not be read.
    #[error("plugin archive {path} is unreadable: {message}")]
    Archive {
        /// Archive location.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A plugin archive manifest is malformed.
    #[error("manifest error: {message}")]
    Manifest {
        /// Description of the validation failure.
        message: String,
    },

    /// Plugin configuration could not be bound.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An I/O error occurred while reading plugin artifacts.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A plugin failed while running.
    #[error("plugin '{plugin}' failed: {message}")]
    Execution {
        /// Plugin name.
        plugin: String,
        /// Description of the failure.
        message: String,
    },

    /// A shared lock was poisoned by a panicking holder.
    #[error("{resource} lock poisoned")]
    LockPoisoned {
        /// Guarded resource.
        resource: &'static str,
    },
}

impl PluginError {
    /// Creates a [`PluginError::ClassLoadFailure`] without an underlying error.
    #[must_use]
    pub fn class_load(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ClassLoadFailure {
            class: class.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a [`PluginError::Execution`].
    #[must_use]
    pub fn execution(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Wraps an I/O error for `path`.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Returns `true` for failures that let resolution continue with the next
    /// source.
    #[must_use]
    pub const fn allows_fallthrough(&self) -> bool {
        matches!(self, Self::ClassLoadFailure { .. })
    }
}

fn render_diagnostics(diagnostics: &[String]) -> String {
    if diagnostics.is_empty() {
        return String::new();
    }
    let mut rendered = String::from(":");
    for diagnostic in diagnostics {
        rendered.push_str("\n  - ");
        rendered.push_str(diagnostic);
    }
    rendered
}
