//! Decorators applied to plugin instances after construction.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::class_loader::PluginClass;
use crate::contract::PluginInstance;
use crate::error::PluginError;

/// Wraps a freshly created plugin instance.
pub trait Mixin: Send + Sync {
    /// Returns the decorated instance.
    ///
    /// # Errors
    ///
    /// Returns an error when the instance cannot be decorated.
    fn decorate(&self, instance: PluginInstance) -> Result<PluginInstance, PluginError>;
}

impl<F> Mixin for F
where
    F: Fn(PluginInstance) -> Result<PluginInstance, PluginError> + Send + Sync,
{
    fn decorate(&self, instance: PluginInstance) -> Result<PluginInstance, PluginError> {
        self(instance)
    }
}

/// Mixins by name.
#[derive(Default)]
pub struct MixinRegistry {
    mixins: HashMap<String, Arc<dyn Mixin>>,
}

impl MixinRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `mixin` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ConfigurationConflict`] when `name` is taken.
    pub fn register(&mut self, name: &str, mixin: Arc<dyn Mixin>) -> Result<(), PluginError> {
        if self.mixins.contains_key(name) {
            return Err(PluginError::ConfigurationConflict {
                message: format!("mixin '{name}' is registered twice"),
            });
        }
        self.mixins.insert(name.to_owned(), mixin);
        Ok(())
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.mixins.contains_key(name)
    }

    /// Applies the mixins `class` declares to `instance`, in declaration
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::MixinNotFound`] before decorating anything when
    /// a declared mixin is not registered, and propagates decorator failures.
    pub fn apply(
        &self,
        class: &PluginClass,
        instance: PluginInstance,
    ) -> Result<PluginInstance, PluginError> {
        let decorators = class
            .mixins()
            .iter()
            .map(|name| {
                self.mixins
                    .get(name)
                    .ok_or_else(|| PluginError::MixinNotFound {
                        class: class.name().to_owned(),
                        mixin: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        decorators
            .into_iter()
            .try_fold(instance, |decorated, mixin| mixin.decorate(decorated))
    }
}

impl fmt::Debug for MixinRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.mixins.keys().collect();
        names.sort();
        f.debug_struct("MixinRegistry").field("mixins", &names).finish()
    }
}
