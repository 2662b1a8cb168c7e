//! Plugins resolved by artifact coordinates from external archive roots.

use std::path::PathBuf;
use std::sync::Arc;

use embulk_spi::PluginType;
use once_cell::sync::OnceCell;
use tracing::debug;

use super::scan::{candidates, scan_root, sort_descending, versions};
use super::{ClassCache, PluginSource, SourceResolution, load_from_archive};
use crate::capability::CapabilityKind;
use crate::class_loader::{PluginArchive, PluginClassLoaderFactory};
use crate::error::PluginError;

const VERSIONED_TARGET: &str = "embulk_plugins::source::versioned";

/// Which candidate wins when no version is requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LatestPolicy {
    /// The highest version by the dotted-version ordering.
    #[default]
    HighestVersion,
    /// The first matching archive in scan order.
    FirstScanned,
}

/// Resolves [`PluginType::Versioned`] references from archives under one or
/// more roots.
///
/// Roots are scanned once, on the first versioned request.
#[derive(Debug)]
pub struct VersionedSource {
    roots: Vec<PathBuf>,
    policy: LatestPolicy,
    loaders: Arc<PluginClassLoaderFactory>,
    index: OnceCell<Vec<Arc<PluginArchive>>>,
    cache: ClassCache,
}

impl VersionedSource {
    /// Creates a source over `roots`.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>, loaders: Arc<PluginClassLoaderFactory>) -> Self {
        Self {
            roots,
            policy: LatestPolicy::default(),
            loaders,
            index: OnceCell::new(),
            cache: ClassCache::default(),
        }
    }

    /// Sets the policy for requests without a version.
    #[must_use]
    pub const fn with_latest_policy(mut self, policy: LatestPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Every archive found under the roots, in scan order.
    #[must_use]
    pub fn archives(&self) -> &[Arc<PluginArchive>] {
        self.index.get_or_init(|| {
            let archives: Vec<_> = self.roots.iter().flat_map(|root| scan_root(root)).collect();
            debug!(
                target: VERSIONED_TARGET,
                roots = self.roots.len(),
                archives = archives.len(),
                "indexed versioned plugin archives"
            );
            archives
        })
    }

    fn select(
        &self,
        mut found: Vec<Arc<PluginArchive>>,
        plugin: &PluginType,
        requested: Option<&str>,
    ) -> Result<Arc<PluginArchive>, PluginError> {
        if requested.is_some() || self.policy == LatestPolicy::HighestVersion {
            sort_descending(&mut found);
        }
        let selected = requested.map_or_else(
            || found.first(),
            |version| {
                found
                    .iter()
                    .find(|archive| archive.manifest().version() == Some(version))
            },
        );
        selected.cloned().ok_or_else(|| PluginError::AmbiguousOrMissingVersion {
            name: plugin.to_string(),
            requested: requested.map(str::to_owned),
            available: versions(&found),
        })
    }
}

fn matches_coordinates(archive: &PluginArchive, group: &str, classifier: Option<&str>) -> bool {
    let manifest = archive.manifest();
    manifest.group().is_none_or(|declared| declared == group)
        && manifest
            .classifier()
            .is_none_or(|declared| Some(declared) == classifier)
}

impl PluginSource for VersionedSource {
    fn name(&self) -> &'static str {
        "versioned"
    }

    fn resolve(
        &self,
        kind: CapabilityKind,
        plugin: &PluginType,
    ) -> Result<SourceResolution, PluginError> {
        let PluginType::Versioned {
            name,
            group,
            classifier,
            version,
        } = plugin
        else {
            return Ok(SourceResolution::skip());
        };
        self.cache.get_or_resolve(self.name(), kind, plugin, || {
            let matching = self
                .archives()
                .iter()
                .filter(|archive| matches_coordinates(archive, group, classifier.as_deref()));
            let found = candidates(matching, kind, name);
            let archive = self.select(found, plugin, version.as_deref())?;
            debug!(
                target: VERSIONED_TARGET,
                %plugin,
                version = archive.manifest().version(),
                location = %archive.location().display(),
                "selected versioned plugin archive"
            );
            load_from_archive(&self.loaders, archive, kind, name).map(SourceResolution::Found)
        })
    }

    fn clear(&self) -> Result<(), PluginError> {
        self.cache.clear()
    }
}
