//! Plugin archives and their manifests.
//!
//! An archive is either a zip file or an unpacked directory. Its root holds
//! [`MANIFEST_PATH`], a JSON document naming the artifact and the plugin
//! classes it provides:
//!
//! ```json
//! {
//!   "name": "embulk-parser-csv",
//!   "group": "org.embulk",
//!   "version": "0.11.0",
//!   "plugins": [
//!     {"kind": "parser", "name": "csv", "class": "org.embulk.parser.csv.CsvParserPlugin",
//!      "symbol": "embulk_parser_csv", "library": "lib/libembulk_parser_csv.so"}
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::capability::CapabilityKind;
use crate::error::PluginError;

/// Location of the manifest inside every archive.
pub const MANIFEST_PATH: &str = "embulk-plugin.json";

/// One plugin class provided by an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginEntry {
    kind: CapabilityKind,
    name: String,
    class: String,
    symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    library: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    mixins: Vec<String>,
}

impl PluginEntry {
    /// Describes a plugin class exported under `symbol`.
    #[must_use]
    pub fn new(
        kind: CapabilityKind,
        name: impl Into<String>,
        class: impl Into<String>,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            class: class.into(),
            symbol: symbol.into(),
            library: None,
            mixins: Vec::new(),
        }
    }

    /// Sets the archive path of the shared library exporting the symbol.
    #[must_use]
    pub fn with_library(mut self, library: impl Into<String>) -> Self {
        self.library = Some(library.into());
        self
    }

    /// Declares a mixin applied to every instance, in call order.
    #[must_use]
    pub fn with_mixin(mut self, mixin: impl Into<String>) -> Self {
        self.mixins.push(mixin.into());
        self
    }

    /// Capability provided by the class.
    #[must_use]
    pub const fn kind(&self) -> CapabilityKind {
        self.kind
    }

    /// Plugin name users refer to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified class name.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Exported entry point.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Shared library path inside the archive.
    #[must_use]
    pub fn library(&self) -> Option<&str> {
        self.library.as_deref()
    }

    /// Declared mixins.
    #[must_use]
    pub fn mixins(&self) -> &[String] {
        &self.mixins
    }
}

/// Identity and contents of an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    classifier: Option<String>,
    #[serde(default)]
    plugins: Vec<PluginEntry>,
}

impl ArchiveManifest {
    /// Creates a manifest for artifact `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: None,
            version: None,
            classifier: None,
            plugins: Vec::new(),
        }
    }

    /// Sets the artifact group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Sets the artifact version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Sets the artifact classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    /// Adds a plugin class.
    #[must_use]
    pub fn with_plugin(mut self, entry: PluginEntry) -> Self {
        self.plugins.push(entry);
        self
    }

    /// Artifact name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Artifact group.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Artifact version.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Artifact classifier.
    #[must_use]
    pub fn classifier(&self) -> Option<&str> {
        self.classifier.as_deref()
    }

    /// Plugin classes in declaration order.
    #[must_use]
    pub fn plugins(&self) -> &[PluginEntry] {
        &self.plugins
    }

    /// Validates the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Manifest`] for blank names, blank class or
    /// symbol names, or a class declared twice.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.name.trim().is_empty() {
            return Err(manifest_error("artifact name must not be empty"));
        }
        let mut classes = HashSet::new();
        for entry in &self.plugins {
            if entry.name.trim().is_empty()
                || entry.class.trim().is_empty()
                || entry.symbol.trim().is_empty()
            {
                return Err(manifest_error(format!(
                    "artifact '{}' declares a plugin with a blank name, class, or symbol",
                    self.name
                )));
            }
            if !classes.insert(entry.class.as_str()) {
                return Err(manifest_error(format!(
                    "artifact '{}' declares class '{}' twice",
                    self.name, entry.class
                )));
            }
        }
        Ok(())
    }
}

fn manifest_error(message: impl Into<String>) -> PluginError {
    PluginError::Manifest {
        message: message.into(),
    }
}

#[derive(Debug)]
enum ArchiveContents {
    Directory(PathBuf),
    Zip(Arc<[u8]>),
}

/// A readable plugin archive.
#[derive(Debug)]
pub struct PluginArchive {
    location: PathBuf,
    manifest: ArchiveManifest,
    contents: ArchiveContents,
}

impl PluginArchive {
    /// Opens a zip file or an unpacked directory.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] when the path cannot be read,
    /// [`PluginError::Archive`] when it is not a valid archive, and
    /// [`PluginError::Manifest`] when the manifest is missing or invalid.
    pub fn open(path: &Path) -> Result<Self, PluginError> {
        if path.is_dir() {
            let contents = ArchiveContents::Directory(path.to_path_buf());
            return Self::with_contents(path.to_path_buf(), contents);
        }
        let bytes = fs::read(path).map_err(|source| PluginError::io(path, source))?;
        Self::from_zip_bytes(path, bytes)
    }

    /// Reads a zip archive held in memory, e.g. one embedded in the
    /// executable.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Archive`] when the bytes are not a zip file and
    /// [`PluginError::Manifest`] when the manifest is missing or invalid.
    pub fn from_zip_bytes(
        location: impl Into<PathBuf>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Result<Self, PluginError> {
        let path = location.into();
        let data: Arc<[u8]> = bytes.into();
        ZipArchive::new(Cursor::new(data.as_ref())).map_err(|error| PluginError::Archive {
            path: path.clone(),
            message: error.to_string(),
        })?;
        Self::with_contents(path, ArchiveContents::Zip(data))
    }

    fn with_contents(location: PathBuf, contents: ArchiveContents) -> Result<Self, PluginError> {
        let raw = read_resource(&location, &contents, MANIFEST_PATH)?.ok_or_else(|| {
            manifest_error(format!(
                "{} has no {MANIFEST_PATH}",
                location.display()
            ))
        })?;
        let manifest: ArchiveManifest = serde_json::from_slice(&raw).map_err(|error| {
            manifest_error(format!(
                "{} has an invalid {MANIFEST_PATH}: {error}",
                location.display()
            ))
        })?;
        manifest.validate()?;
        Ok(Self {
            location,
            manifest,
            contents,
        })
    }

    /// Where the archive was read from.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Parsed manifest.
    #[must_use]
    pub const fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    /// Finds the entry declaring `class`.
    #[must_use]
    pub fn entry_for_class(&self, class: &str) -> Option<&PluginEntry> {
        self.manifest.plugins.iter().find(|entry| entry.class == class)
    }

    /// Iterates entries registered under `name` in the category of `kind`.
    pub fn entries_for<'a>(
        &'a self,
        kind: CapabilityKind,
        name: &'a str,
    ) -> impl Iterator<Item = &'a PluginEntry> + 'a {
        self.manifest.plugins.iter().filter(move |entry| {
            entry.kind.category() == kind.category() && entry.name == name
        })
    }

    /// Reads a resource stored in the archive.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Archive`] for paths escaping the archive or an
    /// unreadable entry, and [`PluginError::Io`] for filesystem failures.
    pub fn resource(&self, path: &str) -> Result<Option<Vec<u8>>, PluginError> {
        read_resource(&self.location, &self.contents, path)
    }
}

fn read_resource(
    location: &Path,
    contents: &ArchiveContents,
    path: &str,
) -> Result<Option<Vec<u8>>, PluginError> {
    let relative = Path::new(path);
    if !relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return Err(PluginError::Archive {
            path: location.to_path_buf(),
            message: format!("resource path '{path}' escapes the archive"),
        });
    }
    match contents {
        ArchiveContents::Directory(root) => {
            let full = root.join(relative);
            if !full.is_file() {
                return Ok(None);
            }
            fs::read(&full)
                .map(Some)
                .map_err(|source| PluginError::io(full, source))
        }
        ArchiveContents::Zip(bytes) => {
            let archive_error = |message: String| PluginError::Archive {
                path: location.to_path_buf(),
                message,
            };
            let mut archive = ZipArchive::new(Cursor::new(bytes.as_ref()))
                .map_err(|error| archive_error(error.to_string()))?;
            let mut file = match archive.by_name(path) {
                Ok(file) => file,
                Err(ZipError::FileNotFound) => return Ok(None),
                Err(error) => return Err(archive_error(error.to_string())),
            };
            let mut buffer = Vec::new();
            file.read_to_end(&mut buffer)
                .map_err(|error| archive_error(format!("failed to read '{path}': {error}")))?;
            Ok(Some(buffer))
        }
    }
}
