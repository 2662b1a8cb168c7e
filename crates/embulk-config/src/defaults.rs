//! Values used when no configuration layer sets a field.

use crate::logging::LogFormat;

/// Log filter expression applied when none is configured.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Prefix of self-contained plugin artifact names.
pub const DEFAULT_ARTIFACT_PREFIX: &str = "embulk";

/// Host packages every plugin loader resolves from the host first.
pub const DEFAULT_PARENT_FIRST_PACKAGES: &[&str] = &["org.embulk.spi", "org.embulk.config"];

/// Host resource prefixes every plugin loader resolves from the host first.
pub const DEFAULT_PARENT_FIRST_RESOURCES: &[&str] = &["embulk/"];

/// Log filter applied when none is configured.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Log format applied when none is configured.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}
