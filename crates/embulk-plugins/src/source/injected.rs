//! Directly bound plugins, mostly test doubles.

use std::collections::HashMap;
use std::sync::Arc;

use embulk_spi::PluginType;

use super::{PluginSource, SourceResolution};
use crate::capability::CapabilityKind;
use crate::class_loader::PluginClass;
use crate::contract::PluginInstance;
use crate::error::PluginError;

/// Binds `(category, name)` pairs to factories, bypassing class loading.
///
/// Matches any [`PluginType`] variant by name, so it shadows every source
/// registered after it.
#[derive(Debug, Default)]
pub struct InjectedSource {
    classes: HashMap<(&'static str, String), Arc<PluginClass>>,
}

impl InjectedSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` in the category of `kind` to `factory`, replacing any
    /// earlier binding.
    #[must_use]
    pub fn with_factory<F>(mut self, kind: CapabilityKind, name: &str, factory: F) -> Self
    where
        F: Fn() -> Result<PluginInstance, PluginError> + Send + Sync + 'static,
    {
        let class = PluginClass::from_fn(format!("injected:{kind}:{name}"), kind, factory);
        self.classes
            .insert((kind.category(), name.to_owned()), Arc::new(class));
        self
    }

    /// Binds `name` to a prepared class.
    #[must_use]
    pub fn with_class(mut self, name: &str, class: PluginClass) -> Self {
        self.classes
            .insert((class.kind().category(), name.to_owned()), Arc::new(class));
        self
    }
}

impl PluginSource for InjectedSource {
    fn name(&self) -> &'static str {
        "injected"
    }

    fn resolve(
        &self,
        kind: CapabilityKind,
        plugin: &PluginType,
    ) -> Result<SourceResolution, PluginError> {
        let key = (kind.category(), plugin.name().to_owned());
        Ok(self
            .classes
            .get(&key)
            .map_or_else(SourceResolution::skip, |class| {
                SourceResolution::Found(Arc::clone(class))
            }))
    }
}
