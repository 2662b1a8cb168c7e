//! Plugins from named, user-managed bundle directories.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use embulk_spi::PluginType;

use super::scan::{candidates, scan_root, sort_descending};
use super::{ClassCache, PluginSource, SourceResolution, load_from_archive};
use crate::capability::CapabilityKind;
use crate::class_loader::{PluginArchive, PluginClassLoaderFactory};
use crate::error::PluginError;

/// Resolves [`PluginType::ScopedBundle`] references.
///
/// Each scope names a directory of archives, scanned on first use. The
/// highest version declaring the plugin wins.
#[derive(Debug)]
pub struct BundleSource {
    bundles: BTreeMap<String, PathBuf>,
    loaders: Arc<PluginClassLoaderFactory>,
    indexes: Mutex<HashMap<String, Arc<Vec<Arc<PluginArchive>>>>>,
    cache: ClassCache,
}

impl BundleSource {
    /// Creates a source with no bundles.
    #[must_use]
    pub fn new(loaders: Arc<PluginClassLoaderFactory>) -> Self {
        Self {
            bundles: BTreeMap::new(),
            loaders,
            indexes: Mutex::new(HashMap::new()),
            cache: ClassCache::default(),
        }
    }

    /// Maps `scope` to the archive directory `path`.
    #[must_use]
    pub fn with_bundle(mut self, scope: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.bundles.insert(scope.into(), path.into());
        self
    }

    /// Registered scopes, sorted.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.bundles.keys().map(String::as_str)
    }

    fn index(&self, scope: &str) -> Result<Option<Arc<Vec<Arc<PluginArchive>>>>, PluginError> {
        let Some(path) = self.bundles.get(scope) else {
            return Ok(None);
        };
        let mut indexes = self.indexes.lock().map_err(|_| PluginError::LockPoisoned {
            resource: "bundle index",
        })?;
        let index = indexes
            .entry(scope.to_owned())
            .or_insert_with(|| Arc::new(scan_root(path)));
        Ok(Some(Arc::clone(index)))
    }
}

impl PluginSource for BundleSource {
    fn name(&self) -> &'static str {
        "bundle"
    }

    fn resolve(
        &self,
        kind: CapabilityKind,
        plugin: &PluginType,
    ) -> Result<SourceResolution, PluginError> {
        let PluginType::ScopedBundle { name, scope } = plugin else {
            return Ok(SourceResolution::skip());
        };
        self.cache.get_or_resolve(self.name(), kind, plugin, || {
            let Some(archives) = self.index(scope)? else {
                return Ok(SourceResolution::not_applicable(format!(
                    "no bundle registered for scope '{scope}'"
                )));
            };
            let mut found = candidates(archives.iter(), kind, name);
            sort_descending(&mut found);
            let Some(archive) = found.into_iter().next() else {
                return Ok(SourceResolution::not_applicable(format!(
                    "bundle '{scope}' has no {} plugin named '{name}'",
                    kind.category()
                )));
            };
            load_from_archive(&self.loaders, archive, kind, name).map(SourceResolution::Found)
        })
    }

    fn clear(&self) -> Result<(), PluginError> {
        self.indexes
            .lock()
            .map_err(|_| PluginError::LockPoisoned {
                resource: "bundle index",
            })?
            .clear();
        self.cache.clear()
    }
}
