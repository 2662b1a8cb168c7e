//! Plugin resolution across sources.
//!
//! [`PluginManager::resolve`] asks each source in registration order. The
//! first source that finds a class wins. Sources that decline contribute their
//! diagnostic to [`PluginError::PluginNotFound`]; sources that fail to load a
//! class are recorded as causes and skipped; any other failure stops
//! resolution.
//!
//! The resolved instance is decorated with the mixins its class declares and,
//! when a file-scoped plugin answers a record-level request, wrapped in the
//! matching file runner.

mod mixin;

use std::fmt;
use std::sync::{Arc, Weak};

use embulk_spi::{ConfigError, DataSource, PluginType};
use tracing::{debug, warn};

pub use mixin::{Mixin, MixinRegistry};

use crate::adapter::{FileInputRunner, FileOutputRunner};
use crate::capability::CapabilityKind;
use crate::class_loader::PluginClass;
use crate::contract::{
    DecoderPlugin, EncoderPlugin, ExecutorPlugin, FileInputPlugin, FileOutputPlugin,
    FilterPlugin, FormatterPlugin, GuessPlugin, InputPlugin, OutputPlugin, ParserPlugin,
    PluginInstance,
};
use crate::error::PluginError;
use crate::source::{PluginSource, SourceResolution};

const MANAGER_TARGET: &str = "embulk_plugins::manager";

/// Key under which plugin configuration names its plugin.
pub const TYPE_KEY: &str = "type";

/// Resolves plugin instances from an ordered list of sources.
pub struct PluginManager {
    sources: Vec<Arc<dyn PluginSource>>,
    mixins: MixinRegistry,
    this: Weak<Self>,
}

/// Builder for [`PluginManager`].
#[derive(Default)]
pub struct PluginManagerBuilder {
    sources: Vec<Arc<dyn PluginSource>>,
    mixins: Vec<(String, Arc<dyn Mixin>)>,
}

impl PluginManagerBuilder {
    /// Appends a source; sources are consulted in the order added.
    #[must_use]
    pub fn source(mut self, source: impl PluginSource + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    /// Appends a source the caller keeps a handle to.
    #[must_use]
    pub fn shared_source(mut self, source: Arc<dyn PluginSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Registers a mixin.
    #[must_use]
    pub fn mixin(mut self, name: impl Into<String>, mixin: impl Mixin + 'static) -> Self {
        self.mixins.push((name.into(), Arc::new(mixin)));
        self
    }

    /// Registers a mixin the caller keeps a handle to.
    #[must_use]
    pub fn shared_mixin(mut self, name: impl Into<String>, mixin: Arc<dyn Mixin>) -> Self {
        self.mixins.push((name.into(), mixin));
        self
    }

    /// Builds the manager.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ConfigurationConflict`] when a mixin name is
    /// registered twice.
    pub fn build(self) -> Result<Arc<PluginManager>, PluginError> {
        let mut mixins = MixinRegistry::new();
        for (name, mixin) in self.mixins {
            mixins.register(&name, mixin)?;
        }
        let sources = self.sources;
        Ok(Arc::new_cyclic(|this| PluginManager {
            sources,
            mixins,
            this: this.clone(),
        }))
    }
}

impl PluginManager {
    /// Starts building a manager.
    #[must_use]
    pub fn builder() -> PluginManagerBuilder {
        PluginManagerBuilder::default()
    }

    /// Names of the registered sources, in consultation order.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|source| source.name())
    }

    /// Resolves and instantiates `plugin` for capability `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::PluginNotFound`] when no source provides the
    /// plugin, [`PluginError::KindMismatch`] when the resolved class provides
    /// another capability, [`PluginError::MixinNotFound`] for undeclared
    /// mixins, and any non-fallthrough source error unchanged.
    pub fn resolve(
        &self,
        kind: CapabilityKind,
        plugin: &PluginType,
    ) -> Result<PluginInstance, PluginError> {
        let mut diagnostics = Vec::new();
        let mut causes = Vec::new();
        for source in &self.sources {
            match source.resolve(kind, plugin) {
                Ok(SourceResolution::Found(class)) => {
                    debug!(
                        target: MANAGER_TARGET,
                        source = source.name(),
                        %kind,
                        %plugin,
                        class = class.name(),
                        "resolved plugin"
                    );
                    return self.instantiate(kind, plugin, &class);
                }
                Ok(SourceResolution::NotApplicable(diagnostic)) => {
                    debug!(
                        target: MANAGER_TARGET,
                        source = source.name(),
                        %kind,
                        %plugin,
                        diagnostic = diagnostic.as_deref(),
                        "source not applicable"
                    );
                    if let Some(reason) = diagnostic {
                        diagnostics.push(format!("{}: {reason}", source.name()));
                    }
                }
                Err(error) if error.allows_fallthrough() => {
                    warn!(
                        target: MANAGER_TARGET,
                        source = source.name(),
                        %kind,
                        %plugin,
                        %error,
                        "plugin source failed; trying the next source"
                    );
                    diagnostics.push(format!("{}: {error}", source.name()));
                    causes.push(error);
                }
                Err(error) => return Err(error),
            }
        }
        Err(PluginError::PluginNotFound {
            kind,
            plugin: plugin.to_string(),
            diagnostics,
            causes,
        })
    }

    /// Resolves the plugin named by the [`TYPE_KEY`] attribute of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Config`] when the attribute is missing or not a
    /// plugin reference, and the errors of [`Self::resolve`].
    pub fn resolve_configured(
        &self,
        kind: CapabilityKind,
        config: &DataSource,
    ) -> Result<PluginInstance, PluginError> {
        let plugin = plugin_type_of(config)?;
        self.resolve(kind, &plugin)
    }

    /// Drops the caches of every source.
    ///
    /// # Errors
    ///
    /// Every source is cleared; the first failure is returned.
    pub fn shutdown(&self) -> Result<(), PluginError> {
        let mut first_error = None;
        for source in &self.sources {
            if let Err(error) = source.clear() {
                warn!(
                    target: MANAGER_TARGET,
                    source = source.name(),
                    %error,
                    "failed to clear plugin source"
                );
                first_error.get_or_insert(error);
            }
        }
        debug!(target: MANAGER_TARGET, "plugin manager shut down");
        first_error.map_or(Ok(()), Err)
    }

    fn instantiate(
        &self,
        kind: CapabilityKind,
        plugin: &PluginType,
        class: &PluginClass,
    ) -> Result<PluginInstance, PluginError> {
        if !kind.accepts(class.kind()) {
            return Err(PluginError::KindMismatch {
                class: class.name().to_owned(),
                requested: kind,
                provided: class.kind(),
            });
        }
        let instance = self.mixins.apply(class, class.instantiate()?)?;
        Ok(match (kind, instance) {
            (CapabilityKind::Input, PluginInstance::FileInput(file_input)) => {
                PluginInstance::Input(Arc::new(FileInputRunner::new(
                    plugin.to_string(),
                    file_input,
                    self.this.clone(),
                )))
            }
            (CapabilityKind::Output, PluginInstance::FileOutput(file_output)) => {
                PluginInstance::Output(Arc::new(FileOutputRunner::new(
                    plugin.to_string(),
                    file_output,
                    self.this.clone(),
                )))
            }
            (_, other) => other,
        })
    }
}

/// Reads the plugin reference stored under [`TYPE_KEY`].
///
/// # Errors
///
/// Returns [`ConfigError::MissingKey`] when absent and
/// [`ConfigError::PluginType`] when malformed.
pub fn plugin_type_of(config: &DataSource) -> Result<PluginType, ConfigError> {
    let value = config
        .get_value(TYPE_KEY)
        .ok_or_else(|| ConfigError::MissingKey {
            key: TYPE_KEY.to_owned(),
        })?;
    PluginType::from_value(value)
}

macro_rules! typed_resolvers {
    ($($method:ident => $variant:ident($contract:ident);)*) => {
        impl PluginManager {
            $(
                #[doc = concat!(
                    "Resolves a [`", stringify!($contract), "`].\n\n",
                    "# Errors\n\n",
                    "See [`PluginManager::resolve`]."
                )]
                pub fn $method(
                    &self,
                    plugin: &PluginType,
                ) -> Result<Arc<dyn $contract>, PluginError> {
                    match self.resolve(CapabilityKind::$variant, plugin)? {
                        PluginInstance::$variant(instance) => Ok(instance),
                        other => Err(PluginError::KindMismatch {
                            class: plugin.to_string(),
                            requested: CapabilityKind::$variant,
                            provided: other.kind(),
                        }),
                    }
                }
            )*
        }
    };
}

typed_resolvers! {
    input => Input(InputPlugin);
    output => Output(OutputPlugin);
    filter => Filter(FilterPlugin);
    parser => Parser(ParserPlugin);
    formatter => Formatter(FormatterPlugin);
    decoder => Decoder(DecoderPlugin);
    encoder => Encoder(EncoderPlugin);
    guess => Guess(GuessPlugin);
    executor => Executor(ExecutorPlugin);
    file_input => FileInput(FileInputPlugin);
    file_output => FileOutput(FileOutputPlugin);
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("sources", &self.sources().collect::<Vec<_>>())
            .field("mixins", &self.mixins)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
