//! Structured reporting of engine lifecycle events.

use std::sync::Arc;

use embulk_config::Config;

use crate::bootstrap::BootstrapError;
use crate::telemetry::targets::HEALTH as HEALTH_TARGET;

/// Observer of engine lifecycle events.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after the plugin manager is assembled.
    fn bootstrap_succeeded(&self, config: &Config, sources: &[&str]);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked after shutdown released `loaders` class loaders.
    fn shutdown_completed(&self, loaders: usize);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config, sources: &[&str]) {
        (**self).bootstrap_succeeded(config, sources);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn shutdown_completed(&self, loaders: usize) {
        (**self).shutdown_completed(loaders);
    }
}

/// Reporter recording lifecycle events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting engine bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config, sources: &[&str]) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            artifact_prefix = %config.artifact_prefix(),
            plugin_roots = config.plugin_roots().len(),
            bundles = config.bundles().len(),
            sources = ?sources,
            "engine bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "engine bootstrap failed"
        );
    }

    fn shutdown_completed(&self, loaders: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_completed",
            released_loaders = loaders,
            "engine shut down"
        );
    }
}
