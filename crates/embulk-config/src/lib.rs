//! Engine configuration shared by the Embulk binaries.
//!
//! [`Config`] layers built-in defaults, an optional TOML file
//! (`--config-path` or `EMBULK_CONFIG_PATH`), `EMBULK_*` environment
//! variables, and command-line flags, later layers winning. Every field is
//! optional in the layers; the accessors apply the defaults from
//! [`defaults`].

pub mod bundle;
pub mod defaults;
pub mod logging;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use bundle::{BundleSpec, BundleSpecError};
pub use defaults::{
    DEFAULT_ARTIFACT_PREFIX, DEFAULT_LOG_FILTER, DEFAULT_PARENT_FIRST_PACKAGES,
    DEFAULT_PARENT_FIRST_RESOURCES, default_log_filter, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Layered engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "EMBULK")]
pub struct Config {
    /// `tracing` filter directive, e.g. `embulk_plugins=debug`.
    pub log_filter: Option<String>,
    /// Log output format.
    pub log_format: Option<LogFormat>,
    /// Prefix of self-contained artifact names.
    pub artifact_prefix: Option<String>,
    /// Directory of self-contained plugin archives shipped with the engine.
    pub embedded_plugin_dir: Option<Utf8PathBuf>,
    /// Roots scanned for versioned plugin archives, in priority order.
    pub plugin_roots: Vec<Utf8PathBuf>,
    /// Named bundle directories.
    pub bundles: Vec<BundleSpec>,
    /// Class name prefixes resolved from the host before plugin archives.
    pub parent_first_packages: Vec<String>,
    /// Resource prefixes resolved from the host before plugin archives.
    pub parent_first_resources: Vec<String>,
    /// Whether class loaders stay alive until the engine shuts down.
    pub retain_class_loaders: Option<bool>,
    /// Directory where resume states are persisted.
    pub resume_dir: Option<Utf8PathBuf>,
}

impl Config {
    /// Log filter directive.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_else(default_log_format)
    }

    /// Prefix of self-contained artifact names.
    #[must_use]
    pub fn artifact_prefix(&self) -> &str {
        self.artifact_prefix
            .as_deref()
            .unwrap_or(DEFAULT_ARTIFACT_PREFIX)
    }

    /// Directory of embedded plugin archives, if any.
    #[must_use]
    pub fn embedded_plugin_dir(&self) -> Option<&Utf8Path> {
        self.embedded_plugin_dir.as_deref()
    }

    /// Versioned plugin roots.
    #[must_use]
    pub fn plugin_roots(&self) -> &[Utf8PathBuf] {
        &self.plugin_roots
    }

    /// Configured bundles.
    #[must_use]
    pub fn bundles(&self) -> &[BundleSpec] {
        &self.bundles
    }

    /// Parent-first class prefixes; the defaults unless any are configured.
    #[must_use]
    pub fn parent_first_packages(&self) -> Vec<&str> {
        or_defaults(&self.parent_first_packages, DEFAULT_PARENT_FIRST_PACKAGES)
    }

    /// Parent-first resource prefixes; the defaults unless any are
    /// configured.
    #[must_use]
    pub fn parent_first_resources(&self) -> Vec<&str> {
        or_defaults(&self.parent_first_resources, DEFAULT_PARENT_FIRST_RESOURCES)
    }

    /// Whether class loaders are held until shutdown. Defaults to `true`.
    #[must_use]
    pub fn retain_class_loaders(&self) -> bool {
        self.retain_class_loaders.unwrap_or(true)
    }

    /// Resume state directory, if persistence is enabled.
    #[must_use]
    pub fn resume_dir(&self) -> Option<&Utf8Path> {
        self.resume_dir.as_deref()
    }
}

fn or_defaults<'a>(configured: &'a [String], defaults: &'a [&'a str]) -> Vec<&'a str> {
    if configured.is_empty() {
        defaults.to_vec()
    } else {
        configured.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_applies_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.log_filter(), "info");
        assert_eq!(config.log_format(), LogFormat::Json);
        assert_eq!(config.artifact_prefix(), "embulk");
        assert!(config.retain_class_loaders());
        assert!(config.plugin_roots().is_empty());
        assert_eq!(
            config.parent_first_packages(),
            ["org.embulk.spi", "org.embulk.config"]
        );
        assert_eq!(config.resume_dir(), None);
    }

    #[test]
    fn configured_prefixes_replace_defaults() {
        let config = Config {
            parent_first_resources: vec!["META-INF/".to_owned()],
            ..Config::default()
        };
        assert_eq!(config.parent_first_resources(), ["META-INF/"]);
        assert_eq!(config.parent_first_packages().len(), 2);
    }
}
