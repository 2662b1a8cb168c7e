//! Plugins compiled into the host.

use std::collections::HashMap;
use std::sync::Arc;

use embulk_spi::PluginType;

use super::{PluginSource, SourceResolution};
use crate::capability::CapabilityKind;
use crate::class_loader::PluginClass;
use crate::error::PluginError;

/// Name-to-class registry populated at startup.
///
/// Only [`PluginType::Default`] references are handled. Names are unique per
/// category, so a full input and a file input cannot share a name.
#[derive(Debug, Default)]
pub struct BuiltinSource {
    classes: HashMap<(&'static str, String), Arc<PluginClass>>,
}

impl BuiltinSource {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `class` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ConfigurationConflict`] when the category of the
    /// class already has a plugin named `name`.
    pub fn register(&mut self, name: &str, class: PluginClass) -> Result<(), PluginError> {
        let key = (class.kind().category(), name.to_owned());
        if let Some(existing) = self.classes.get(&key) {
            return Err(PluginError::ConfigurationConflict {
                message: format!(
                    "{} plugin '{name}' is registered as both {} and {}",
                    key.0,
                    existing.name(),
                    class.name()
                ),
            });
        }
        self.classes.insert(key, Arc::new(class));
        Ok(())
    }

    /// Builder form of [`Self::register`].
    ///
    /// # Errors
    ///
    /// See [`Self::register`].
    pub fn with_plugin(mut self, name: &str, class: PluginClass) -> Result<Self, PluginError> {
        self.register(name, class)?;
        Ok(self)
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl PluginSource for BuiltinSource {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn resolve(
        &self,
        kind: CapabilityKind,
        plugin: &PluginType,
    ) -> Result<SourceResolution, PluginError> {
        let PluginType::Default { name } = plugin else {
            return Ok(SourceResolution::skip());
        };
        let key = (kind.category(), name.clone());
        Ok(self.classes.get(&key).map_or_else(
            || {
                SourceResolution::not_applicable(format!(
                    "no {} plugin named '{name}'",
                    kind.category()
                ))
            },
            |class| SourceResolution::Found(Arc::clone(class)),
        ))
    }
}
