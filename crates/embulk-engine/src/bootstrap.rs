//! Engine bootstrap orchestration.

use std::path::PathBuf;
use std::sync::Arc;

use embulk_config::Config;
use embulk_plugins::{
    BuiltinSource, BundleSource, DelegationPolicy, EmbeddedArchives, HostClasses,
    InjectedSource, Linker, Mixin, NativeLinker, PluginClassLoaderFactory, PluginError,
    PluginManager, RetentionMode, SelfContainedSource, VersionedSource,
};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use crate::health::HealthReporter;
use crate::resume_store::{FileResumeStore, ResumeStoreError};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the engine configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a configuration resolved elsewhere.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Plugin sources could not be assembled.
    #[error("failed to assemble plugin sources: {source}")]
    Plugins {
        /// Underlying plugin error.
        #[source]
        source: PluginError,
    },
    /// The resume directory could not be prepared.
    #[error("failed to open resume directory: {source}")]
    ResumeStore {
        /// Underlying store error.
        #[source]
        source: ResumeStoreError,
    },
}

/// Host-provided pieces that configuration cannot express.
pub struct PluginHost {
    builtin: BuiltinSource,
    host_classes: HostClasses,
    linker: Arc<dyn Linker>,
    injected: Option<InjectedSource>,
    mixins: Vec<(String, Arc<dyn Mixin>)>,
}

impl Default for PluginHost {
    fn default() -> Self {
        Self {
            builtin: BuiltinSource::new(),
            host_classes: HostClasses::new(),
            linker: Arc::new(NativeLinker::new()),
            injected: None,
            mixins: Vec::new(),
        }
    }
}

impl PluginHost {
    /// Host with no builtin plugins that links archives natively.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the plugins compiled into the host.
    #[must_use]
    pub fn with_builtin(mut self, builtin: BuiltinSource) -> Self {
        self.builtin = builtin;
        self
    }

    /// Sets the classes plugin loaders may delegate to.
    #[must_use]
    pub fn with_host_classes(mut self, host_classes: HostClasses) -> Self {
        self.host_classes = host_classes;
        self
    }

    /// Replaces the linker used for archive entry points.
    #[must_use]
    pub fn with_linker(mut self, linker: Arc<dyn Linker>) -> Self {
        self.linker = linker;
        self
    }

    /// Registers a source consulted before every other source.
    #[must_use]
    pub fn with_injected(mut self, injected: InjectedSource) -> Self {
        self.injected = Some(injected);
        self
    }

    /// Registers a mixin by name.
    #[must_use]
    pub fn with_mixin(mut self, name: impl Into<String>, mixin: Arc<dyn Mixin>) -> Self {
        self.mixins.push((name.into(), mixin));
        self
    }
}

/// Result of a successful bootstrap invocation.
pub struct Engine {
    config: Config,
    telemetry: TelemetryHandle,
    loaders: Arc<PluginClassLoaderFactory>,
    manager: Arc<PluginManager>,
    resume_store: Option<FileResumeStore>,
    reporter: Arc<dyn HealthReporter>,
}

impl Engine {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Plugin manager assembled from configuration.
    #[must_use]
    pub const fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    /// Factory owning the plugin class loaders.
    #[must_use]
    pub const fn loaders(&self) -> &Arc<PluginClassLoaderFactory> {
        &self.loaders
    }

    /// Checkpoint store, when a resume directory is configured.
    #[must_use]
    pub const fn resume_store(&self) -> Option<&FileResumeStore> {
        self.resume_store.as_ref()
    }

    /// Clears plugin caches and releases held class loaders.
    ///
    /// Returns the number of released loaders.
    ///
    /// # Errors
    ///
    /// Returns the first failure; loaders are released even when clearing a
    /// source failed.
    pub fn shutdown(self) -> Result<usize, PluginError> {
        let cleared = self.manager.shutdown();
        let released = self.loaders.release_all()?;
        cleared?;
        self.reporter.shutdown_completed(released);
        Ok(released)
    }
}

/// Bootstraps the engine using the supplied collaborators.
///
/// Sources are consulted in this order: injected (when provided), builtin,
/// self-contained, versioned, then bundles.
///
/// # Errors
///
/// Returns [`BootstrapError`] when any stage fails; the reporter observes the
/// failure before it is returned.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    host: PluginHost,
) -> Result<Engine, BootstrapError> {
    reporter.bootstrap_starting();
    match assemble(loader, host) {
        Ok(parts) => {
            let sources: Vec<&str> = parts.manager.sources().collect();
            reporter.bootstrap_succeeded(&parts.config, &sources);
            Ok(Engine {
                config: parts.config,
                telemetry: parts.telemetry,
                loaders: parts.loaders,
                manager: parts.manager,
                resume_store: parts.resume_store,
                reporter,
            })
        }
        Err(error) => {
            reporter.bootstrap_failed(&error);
            Err(error)
        }
    }
}

/// Engine components assembled before the reporter is attached.
struct Assembled {
    config: Config,
    telemetry: TelemetryHandle,
    loaders: Arc<PluginClassLoaderFactory>,
    manager: Arc<PluginManager>,
    resume_store: Option<FileResumeStore>,
}

fn assemble(loader: &dyn ConfigLoader, host: PluginHost) -> Result<Assembled, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;

    let loaders = Arc::new(class_loader_factory(&config, &host));
    let manager = plugin_manager(&config, host, &loaders)
        .map_err(|source| BootstrapError::Plugins { source })?;
    let resume_store = config
        .resume_dir()
        .map(FileResumeStore::open)
        .transpose()
        .map_err(|source| BootstrapError::ResumeStore { source })?;

    Ok(Assembled {
        config,
        telemetry,
        loaders,
        manager,
        resume_store,
    })
}

fn class_loader_factory(config: &Config, host: &PluginHost) -> PluginClassLoaderFactory {
    let packages = config
        .parent_first_packages()
        .into_iter()
        .fold(DelegationPolicy::new(), |policy, package| {
            policy.with_parent_first_package(package)
        });
    let policy = config
        .parent_first_resources()
        .into_iter()
        .fold(packages, |policy_so_far, prefix| {
            policy_so_far.with_parent_first_resource(prefix)
        });
    let retention = if config.retain_class_loaders() {
        RetentionMode::Hold
    } else {
        RetentionMode::Release
    };
    PluginClassLoaderFactory::new(
        Arc::new(host.host_classes.clone()),
        policy,
        Arc::clone(&host.linker),
    )
    .with_retention(retention)
}

fn plugin_manager(
    config: &Config,
    host: PluginHost,
    loaders: &Arc<PluginClassLoaderFactory>,
) -> Result<Arc<PluginManager>, PluginError> {
    let embedded = config
        .embedded_plugin_dir()
        .map(|dir| EmbeddedArchives::from_dir(dir.as_std_path()))
        .transpose()?
        .unwrap_or_default();
    let roots: Vec<PathBuf> = config
        .plugin_roots()
        .iter()
        .map(|root| root.as_std_path().to_path_buf())
        .collect();
    let bundles = config
        .bundles()
        .iter()
        .fold(BundleSource::new(Arc::clone(loaders)), |source, bundle| {
            source.with_bundle(bundle.scope(), bundle.path().as_std_path())
        });

    let mut builder = PluginManager::builder();
    if let Some(injected) = host.injected {
        builder = builder.source(injected);
    }
    builder = builder
        .source(host.builtin)
        .source(SelfContainedSource::new(
            config.artifact_prefix(),
            embedded,
            Arc::clone(loaders),
        ))
        .source(VersionedSource::new(roots, Arc::clone(loaders)))
        .source(bundles);
    for (name, mixin) in host.mixins {
        builder = builder.shared_mixin(name, mixin);
    }
    builder.build()
}
