//! Places plugin classes are resolved from.
//!
//! The manager consults its [`PluginSource`]s in registration order. A source
//! either finds the class, reports that the request is not its business
//! ([`SourceResolution::NotApplicable`], optionally with a diagnostic shown
//! when nothing matches), or fails.

mod builtin;
mod bundle;
mod injected;
mod scan;
mod self_contained;
mod versioned;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use embulk_spi::PluginType;
use tracing::debug;

pub use builtin::BuiltinSource;
pub use bundle::BundleSource;
pub use injected::InjectedSource;
pub use scan::scan_root;
pub use self_contained::{EmbeddedArchives, SelfContainedSource};
pub use versioned::{LatestPolicy, VersionedSource};

use crate::capability::CapabilityKind;
use crate::class_loader::{PluginArchive, PluginClass, PluginClassLoaderFactory};
use crate::error::PluginError;

const SOURCE_TARGET: &str = "embulk_plugins::source";

/// Outcome of asking one source for a plugin.
#[derive(Debug, Clone)]
pub enum SourceResolution {
    /// The source provides the class.
    Found(Arc<PluginClass>),
    /// The source does not handle the request.
    NotApplicable(Option<String>),
}

impl SourceResolution {
    /// Declines with a diagnostic explaining why.
    #[must_use]
    pub fn not_applicable(diagnostic: impl Into<String>) -> Self {
        Self::NotApplicable(Some(diagnostic.into()))
    }

    /// Declines silently, e.g. for plugin types the source never handles.
    #[must_use]
    pub const fn skip() -> Self {
        Self::NotApplicable(None)
    }
}

/// A registry consulted during plugin resolution.
pub trait PluginSource: Send + Sync {
    /// Short name used in diagnostics and logs.
    fn name(&self) -> &'static str;

    /// Looks up the class for `plugin` in the category of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ClassLoadFailure`] when a matching archive
    /// cannot be loaded, which lets resolution continue with the next source.
    /// Other errors abort resolution.
    fn resolve(
        &self,
        kind: CapabilityKind,
        plugin: &PluginType,
    ) -> Result<SourceResolution, PluginError>;

    /// Drops cached classes.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LockPoisoned`] when a cache lock is poisoned.
    fn clear(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

type CacheKey = (&'static str, PluginType);

/// Resolved classes keyed by category and plugin type.
///
/// The lock is held across lookup, resolution, and insertion, so concurrent
/// first requests for one plugin resolve it once.
#[derive(Default)]
pub(crate) struct ClassCache {
    entries: Mutex<HashMap<CacheKey, Arc<PluginClass>>>,
}

impl ClassCache {
    pub(crate) fn get_or_resolve<F>(
        &self,
        source: &str,
        kind: CapabilityKind,
        plugin: &PluginType,
        resolve: F,
    ) -> Result<SourceResolution, PluginError>
    where
        F: FnOnce() -> Result<SourceResolution, PluginError>,
    {
        let mut entries = self.lock()?;
        let key = (kind.category(), plugin.clone());
        if let Some(class) = entries.get(&key) {
            debug!(
                target: SOURCE_TARGET,
                source,
                %kind,
                %plugin,
                "plugin class cache hit"
            );
            return Ok(SourceResolution::Found(Arc::clone(class)));
        }
        let resolution = resolve()?;
        if let SourceResolution::Found(class) = &resolution {
            entries.insert(key, Arc::clone(class));
        }
        Ok(resolution)
    }

    pub(crate) fn clear(&self) -> Result<(), PluginError> {
        self.lock()?.clear();
        Ok(())
    }

    pub(crate) fn len(&self) -> Result<usize, PluginError> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<CacheKey, Arc<PluginClass>>>, PluginError> {
        self.entries.lock().map_err(|_| PluginError::LockPoisoned {
            resource: "plugin class cache",
        })
    }
}

impl fmt::Debug for ClassCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassCache")
            .field("len", &self.len().ok())
            .finish()
    }
}

/// Loads the class `archive` declares for `name` in the category of `kind`
/// through a fresh isolated loader.
pub(crate) fn load_from_archive(
    loaders: &PluginClassLoaderFactory,
    archive: Arc<PluginArchive>,
    kind: CapabilityKind,
    name: &str,
) -> Result<Arc<PluginClass>, PluginError> {
    let class_name = archive
        .entries_for(kind, name)
        .next()
        .map(|entry| entry.class().to_owned())
        .ok_or_else(|| {
            PluginError::class_load(
                archive.manifest().name(),
                format!("archive declares no {} plugin named '{name}'", kind.category()),
            )
        })?;
    let loader = loaders.create(vec![archive])?;
    loader.load_class(&class_name)
}
