//! Plugins shipped as archives alongside the executable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use embulk_spi::PluginType;
use tracing::debug;

use super::{ClassCache, PluginSource, SourceResolution, load_from_archive};
use crate::capability::CapabilityKind;
use crate::class_loader::{MANIFEST_PATH, PluginArchive, PluginClassLoaderFactory};
use crate::error::PluginError;

const SELF_CONTAINED_TARGET: &str = "embulk_plugins::source::self_contained";

#[derive(Debug, Clone)]
enum Embedded {
    Bytes(Arc<[u8]>),
    Path(PathBuf),
}

/// Archives embedded with the executable, keyed by artifact name.
///
/// Archives are opened on first use.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedArchives {
    archives: BTreeMap<String, Embedded>,
}

impl EmbeddedArchives {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds zip bytes, e.g. from `include_bytes!`.
    #[must_use]
    pub fn with_bytes(mut self, artifact: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.archives
            .insert(artifact.into(), Embedded::Bytes(bytes.into()));
        self
    }

    /// Adds an archive on disk.
    #[must_use]
    pub fn with_path(mut self, artifact: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.archives
            .insert(artifact.into(), Embedded::Path(path.into()));
        self
    }

    /// Indexes the archives in `dir`: `<artifact>.zip` files and unpacked
    /// `<artifact>/` directories.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] when `dir` cannot be listed.
    pub fn from_dir(dir: &Path) -> Result<Self, PluginError> {
        let mut found = Self::new();
        let entries = std::fs::read_dir(dir).map_err(|source| PluginError::io(dir, source))?;
        for entry in entries {
            let path = entry.map_err(|source| PluginError::io(dir, source))?.path();
            let stem = if path.is_dir() && path.join(MANIFEST_PATH).is_file() {
                path.file_name()
            } else if path.extension().is_some_and(|ext| ext == "zip") {
                path.file_stem()
            } else {
                None
            };
            if let Some(artifact) = stem.and_then(|name| name.to_str()) {
                found.archives.insert(artifact.to_owned(), Embedded::Path(path.clone()));
            }
        }
        Ok(found)
    }

    /// Artifact names, sorted.
    pub fn artifacts(&self) -> impl Iterator<Item = &str> {
        self.archives.keys().map(String::as_str)
    }

    /// Opens `artifact`, or `None` when it is not embedded.
    fn open(&self, artifact: &str) -> Result<Option<PluginArchive>, PluginError> {
        self.archives
            .get(artifact)
            .map(|embedded| match embedded {
                Embedded::Bytes(bytes) => {
                    PluginArchive::from_zip_bytes(format!("{artifact}.zip"), Arc::clone(bytes))
                }
                Embedded::Path(path) => PluginArchive::open(path),
            })
            .transpose()
    }
}

/// Resolves [`PluginType::Default`] references to the embedded archive
/// `<prefix>-<category>-<name>`.
#[derive(Debug)]
pub struct SelfContainedSource {
    prefix: String,
    archives: EmbeddedArchives,
    loaders: Arc<PluginClassLoaderFactory>,
    cache: ClassCache,
}

impl SelfContainedSource {
    /// Creates a source over `archives`.
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        archives: EmbeddedArchives,
        loaders: Arc<PluginClassLoaderFactory>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            archives,
            loaders,
            cache: ClassCache::default(),
        }
    }

    /// Artifact name looked up for `name` in the category of `kind`.
    #[must_use]
    pub fn artifact_name(&self, kind: CapabilityKind, name: &str) -> String {
        format!("{}-{}-{name}", self.prefix, kind.category())
    }

    /// Number of cached classes.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LockPoisoned`] when the cache is poisoned.
    pub fn cached(&self) -> Result<usize, PluginError> {
        self.cache.len()
    }
}

impl PluginSource for SelfContainedSource {
    fn name(&self) -> &'static str {
        "self-contained"
    }

    fn resolve(
        &self,
        kind: CapabilityKind,
        plugin: &PluginType,
    ) -> Result<SourceResolution, PluginError> {
        let PluginType::Default { name } = plugin else {
            return Ok(SourceResolution::skip());
        };
        self.cache.get_or_resolve(self.name(), kind, plugin, || {
            let artifact = self.artifact_name(kind, name);
            let opened = self.archives.open(&artifact).map_err(|error| {
                PluginError::ClassLoadFailure {
                    class: artifact.clone(),
                    message: format!("embedded archive '{artifact}' cannot be opened"),
                    source: Some(Arc::new(error)),
                }
            })?;
            let Some(archive) = opened else {
                return Ok(SourceResolution::not_applicable(format!(
                    "no embedded archive named '{artifact}'"
                )));
            };
            let class = load_from_archive(&self.loaders, Arc::new(archive), kind, name)?;
            debug!(
                target: SELF_CONTAINED_TARGET,
                artifact = %artifact,
                class = class.name(),
                "resolved embedded plugin"
            );
            Ok(SourceResolution::Found(class))
        })
    }

    fn clear(&self) -> Result<(), PluginError> {
        self.cache.clear()
    }
}
