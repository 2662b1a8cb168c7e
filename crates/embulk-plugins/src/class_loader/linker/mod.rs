//! Turning archive entries into plugin factories.
//!
//! [`NativeLinker`] loads the shared library an entry names and looks up its
//! exported entry point. [`SymbolTable`] serves statically linked plugins and
//! tests by mapping symbol names to factories registered in process.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use libloading::Library;
use tempfile::TempDir;
use tracing::debug;

use super::archive::{PluginArchive, PluginEntry};
use super::PluginFactory;
use crate::contract::PluginInstance;
use crate::error::PluginError;

const LINKER_TARGET: &str = "embulk_plugins::class_loader::linker";

/// Signature of the entry point a native plugin library exports.
///
/// Libraries must be built with the same toolchain and `embulk-plugins`
/// version as the host, as the signature uses the Rust ABI.
pub type PluginEntryPoint = fn() -> Result<PluginInstance, PluginError>;

/// Produces a factory for one archive entry.
pub trait Linker: Send + Sync {
    /// Links `entry` from `archive`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ClassLoadFailure`] when the entry point cannot
    /// be found or loaded.
    fn link(&self, archive: &PluginArchive, entry: &PluginEntry)
    -> Result<PluginFactory, PluginError>;
}

/// Links entries against factories registered in process.
#[derive(Default)]
pub struct SymbolTable {
    symbols: HashMap<String, PluginFactory>,
    links: AtomicUsize,
}

impl SymbolTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `symbol`.
    #[must_use]
    pub fn with_symbol<F>(mut self, symbol: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<PluginInstance, PluginError> + Send + Sync + 'static,
    {
        self.symbols.insert(symbol.into(), Arc::new(factory));
        self
    }

    /// Number of successful links so far.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut symbols: Vec<_> = self.symbols.keys().collect();
        symbols.sort();
        f.debug_struct("SymbolTable")
            .field("symbols", &symbols)
            .field("links", &self.link_count())
            .finish()
    }
}

impl Linker for SymbolTable {
    fn link(
        &self,
        _archive: &PluginArchive,
        entry: &PluginEntry,
    ) -> Result<PluginFactory, PluginError> {
        let factory = self.symbols.get(entry.symbol()).cloned().ok_or_else(|| {
            PluginError::class_load(
                entry.class(),
                format!("symbol '{}' is not exported", entry.symbol()),
            )
        })?;
        self.links.fetch_add(1, Ordering::SeqCst);
        Ok(factory)
    }
}

/// A shared library extracted from an archive.
struct LoadedLibrary {
    library: Library,
    // Dropped after `library` so the file outlives the mapping.
    _scratch: TempDir,
}

/// An entry point paired with the library that exports it.
struct NativeEntry {
    entry_point: PluginEntryPoint,
    _library: Arc<LoadedLibrary>,
}

impl NativeEntry {
    fn instantiate(&self) -> Result<PluginInstance, PluginError> {
        (self.entry_point)()
    }
}

/// Links entries by loading shared libraries with `libloading`.
///
/// Each library is extracted into its own scratch directory and loaded once
/// per archive; every factory keeps the library mapped while it lives.
#[derive(Default)]
pub struct NativeLinker {
    libraries: Mutex<HashMap<(PathBuf, String), Arc<LoadedLibrary>>>,
}

impl NativeLinker {
    /// Creates a linker with no libraries loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn library(
        &self,
        archive: &PluginArchive,
        library_path: &str,
        class: &str,
    ) -> Result<Arc<LoadedLibrary>, PluginError> {
        let key = (archive.location().to_path_buf(), library_path.to_owned());
        let mut libraries = self
            .libraries
            .lock()
            .map_err(|_| PluginError::LockPoisoned {
                resource: "native library cache",
            })?;
        if let Some(loaded) = libraries.get(&key) {
            return Ok(Arc::clone(loaded));
        }

        let bytes = archive.resource(library_path)?.ok_or_else(|| {
            PluginError::class_load(
                class,
                format!(
                    "library '{library_path}' is missing from {}",
                    archive.location().display()
                ),
            )
        })?;
        let file_name = Path::new(library_path)
            .file_name()
            .ok_or_else(|| PluginError::class_load(class, "library path has no file name"))?;
        let scratch = tempfile::Builder::new()
            .prefix("embulk-plugin-")
            .tempdir()
            .map_err(|source| PluginError::io(std::env::temp_dir(), source))?;
        let extracted = scratch.path().join(file_name);
        fs::write(&extracted, bytes).map_err(|source| PluginError::io(&extracted, source))?;

        // SAFETY: loading runs the library's initialisers. Plugin archives are
        // trusted installation artefacts chosen by the operator.
        let library = unsafe { Library::new(&extracted) }.map_err(|error| {
            PluginError::ClassLoadFailure {
                class: class.to_owned(),
                message: format!("failed to load '{library_path}'"),
                source: Some(Arc::new(error)),
            }
        })?;
        debug!(
            target: LINKER_TARGET,
            archive = %archive.location().display(),
            library = library_path,
            "loaded native plugin library"
        );
        let loaded = Arc::new(LoadedLibrary {
            library,
            _scratch: scratch,
        });
        libraries.insert(key, Arc::clone(&loaded));
        Ok(loaded)
    }
}

impl fmt::Debug for NativeLinker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loaded = self.libraries.lock().map(|libraries| libraries.len()).ok();
        f.debug_struct("NativeLinker")
            .field("loaded", &loaded)
            .finish()
    }
}

impl Linker for NativeLinker {
    fn link(
        &self,
        archive: &PluginArchive,
        entry: &PluginEntry,
    ) -> Result<PluginFactory, PluginError> {
        let library_path = entry.library().ok_or_else(|| {
            PluginError::class_load(entry.class(), "entry declares no native library")
        })?;
        let loaded = self.library(archive, library_path, entry.class())?;
        let symbol = format!("{}\0", entry.symbol());

        // SAFETY: the manifest declares `symbol` as a `PluginEntryPoint`. The
        // copied function pointer stays valid while `loaded` is alive, and the
        // returned factory owns a clone of it.
        let entry_point: PluginEntryPoint =
            unsafe { loaded.library.get::<PluginEntryPoint>(symbol.as_bytes()) }
                .map(|exported| *exported)
                .map_err(|error| PluginError::ClassLoadFailure {
                    class: entry.class().to_owned(),
                    message: format!("symbol '{}' is not exported", entry.symbol()),
                    source: Some(Arc::new(error)),
                })?;

        let native = NativeEntry {
            entry_point,
            _library: loaded,
        };
        Ok(Arc::new(move || native.instantiate()))
    }
}
