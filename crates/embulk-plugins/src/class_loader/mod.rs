//! Isolated loading of plugin classes from archives.
//!
//! A [`PluginClassLoader`] owns a set of archives and a parent
//! [`ClassSource`] standing for the host. Lookups try the archives before the
//! parent, except for names matching one of the [`DelegationPolicy`]
//! prefixes, which go to the parent first. Each class name is defined at most
//! once per loader, even when several threads ask for it concurrently.

mod archive;
mod factory;
mod linker;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use tracing::debug;

pub use archive::{ArchiveManifest, MANIFEST_PATH, PluginArchive, PluginEntry};
pub use factory::{PluginClassLoaderFactory, RetentionMode};
pub use linker::{Linker, NativeLinker, PluginEntryPoint, SymbolTable};

use crate::capability::CapabilityKind;
use crate::contract::PluginInstance;
use crate::error::PluginError;

const LOADER_TARGET: &str = "embulk_plugins::class_loader";

/// Creates fresh plugin instances.
pub type PluginFactory = Arc<dyn Fn() -> Result<PluginInstance, PluginError> + Send + Sync>;

/// A loaded plugin class.
#[derive(Clone)]
pub struct PluginClass {
    name: String,
    kind: CapabilityKind,
    factory: PluginFactory,
    mixins: Vec<String>,
}

impl PluginClass {
    /// Creates a class producing instances through `factory`.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: CapabilityKind, factory: PluginFactory) -> Self {
        Self {
            name: name.into(),
            kind,
            factory,
            mixins: Vec::new(),
        }
    }

    /// Creates a class from a closure.
    #[must_use]
    pub fn from_fn<F>(name: impl Into<String>, kind: CapabilityKind, factory: F) -> Self
    where
        F: Fn() -> Result<PluginInstance, PluginError> + Send + Sync + 'static,
    {
        Self::new(name, kind, Arc::new(factory))
    }

    /// Declares the mixins applied to each instance, in order.
    #[must_use]
    pub fn with_mixins(mut self, mixins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.mixins = mixins.into_iter().map(Into::into).collect();
        self
    }

    /// Fully qualified class name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capability the class provides.
    #[must_use]
    pub const fn kind(&self) -> CapabilityKind {
        self.kind
    }

    /// Declared mixins.
    #[must_use]
    pub fn mixins(&self) -> &[String] {
        &self.mixins
    }

    /// Creates a new instance and checks it provides the declared kind.
    ///
    /// # Errors
    ///
    /// Propagates factory failures, and returns
    /// [`PluginError::ClassLoadFailure`] when the instance does not match the
    /// declared kind.
    pub fn instantiate(&self) -> Result<PluginInstance, PluginError> {
        let instance = (self.factory)()?;
        if instance.kind() != self.kind {
            return Err(PluginError::class_load(
                &self.name,
                format!(
                    "factory produced a {} plugin but the class declares {}",
                    instance.kind(),
                    self.kind
                ),
            ));
        }
        Ok(instance)
    }
}

impl fmt::Debug for PluginClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginClass")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("mixins", &self.mixins)
            .finish_non_exhaustive()
    }
}

/// Something classes and resources can be looked up in.
pub trait ClassSource: Send + Sync {
    /// Finds a class by fully qualified name.
    fn find_class(&self, name: &str) -> Option<Arc<PluginClass>>;

    /// Finds a resource by path.
    fn find_resource(&self, path: &str) -> Option<Vec<u8>>;
}

/// Classes and resources provided by the host process.
#[derive(Debug, Default, Clone)]
pub struct HostClasses {
    classes: HashMap<String, Arc<PluginClass>>,
    resources: HashMap<String, Vec<u8>>,
}

impl HostClasses {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class.
    #[must_use]
    pub fn with_class(mut self, class: PluginClass) -> Self {
        self.classes.insert(class.name.clone(), Arc::new(class));
        self
    }

    /// Adds a resource.
    #[must_use]
    pub fn with_resource(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.resources.insert(path.into(), bytes.into());
        self
    }
}

impl ClassSource for HostClasses {
    fn find_class(&self, name: &str) -> Option<Arc<PluginClass>> {
        self.classes.get(name).cloned()
    }

    fn find_resource(&self, path: &str) -> Option<Vec<u8>> {
        self.resources.get(path).cloned()
    }
}

/// Prefixes of class names and resource paths resolved parent first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationPolicy {
    parent_first_packages: Vec<String>,
    parent_first_resources: Vec<String>,
}

impl DelegationPolicy {
    /// Creates a policy resolving everything child first.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves classes in `package` and its subpackages parent first.
    #[must_use]
    pub fn with_parent_first_package(mut self, package: impl Into<String>) -> Self {
        self.parent_first_packages.push(package.into());
        self
    }

    /// Resolves resources under `prefix` parent first.
    #[must_use]
    pub fn with_parent_first_resource(mut self, prefix: impl Into<String>) -> Self {
        self.parent_first_resources.push(prefix.into());
        self
    }

    /// Whether class `name` is resolved parent first.
    #[must_use]
    pub fn is_parent_first_class(&self, name: &str) -> bool {
        self.parent_first_packages.iter().any(|package| {
            name.strip_prefix(package.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
        })
    }

    /// Whether resource `path` is resolved parent first.
    #[must_use]
    pub fn is_parent_first_resource(&self, path: &str) -> bool {
        self.parent_first_resources
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

type ClassSlot = Arc<OnceCell<Option<Arc<PluginClass>>>>;

/// Loads plugin classes from a fixed set of archives.
pub struct PluginClassLoader {
    id: u64,
    archives: Vec<Arc<PluginArchive>>,
    parent: Arc<dyn ClassSource>,
    policy: Arc<DelegationPolicy>,
    linker: Arc<dyn Linker>,
    defined: Mutex<HashMap<String, ClassSlot>>,
}

impl PluginClassLoader {
    pub(crate) fn new(
        id: u64,
        archives: Vec<Arc<PluginArchive>>,
        parent: Arc<dyn ClassSource>,
        policy: Arc<DelegationPolicy>,
        linker: Arc<dyn Linker>,
    ) -> Self {
        Self {
            id,
            archives,
            parent,
            policy,
            linker,
            defined: Mutex::new(HashMap::new()),
        }
    }

    /// Identifier assigned by the creating factory.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Archives this loader reads.
    #[must_use]
    pub fn archives(&self) -> &[Arc<PluginArchive>] {
        &self.archives
    }

    /// Loads class `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ClassLoadFailure`] when neither the archives nor
    /// the parent provide the class, or when linking it fails.
    pub fn load_class(&self, name: &str) -> Result<Arc<PluginClass>, PluginError> {
        if self.policy.is_parent_first_class(name) {
            if let Some(class) = self.parent.find_class(name) {
                return Ok(class);
            }
            return self.find_own_class(name)?.ok_or_else(|| not_found(name));
        }
        if let Some(class) = self.find_own_class(name)? {
            return Ok(class);
        }
        self.parent.find_class(name).ok_or_else(|| not_found(name))
    }

    /// Reads resource `path`.
    ///
    /// # Errors
    ///
    /// Propagates archive read failures.
    pub fn find_resource(&self, path: &str) -> Result<Option<Vec<u8>>, PluginError> {
        if self.policy.is_parent_first_resource(path) {
            if let Some(bytes) = self.parent.find_resource(path) {
                return Ok(Some(bytes));
            }
            return self.find_own_resource(path);
        }
        if let Some(bytes) = self.find_own_resource(path)? {
            return Ok(Some(bytes));
        }
        Ok(self.parent.find_resource(path))
    }

    /// Number of class names looked up in the archives so far.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LockPoisoned`] when the class table is poisoned.
    pub fn defined_count(&self) -> Result<usize, PluginError> {
        Ok(self.lock_defined()?.len())
    }

    fn lock_defined(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, ClassSlot>>, PluginError> {
        self.defined.lock().map_err(|_| PluginError::LockPoisoned {
            resource: "class table",
        })
    }

    fn find_own_class(&self, name: &str) -> Result<Option<Arc<PluginClass>>, PluginError> {
        let slot = {
            let mut defined = self.lock_defined()?;
            Arc::clone(defined.entry(name.to_owned()).or_default())
        };
        slot.get_or_try_init(|| self.define(name)).cloned()
    }

    fn define(&self, name: &str) -> Result<Option<Arc<PluginClass>>, PluginError> {
        for archive in &self.archives {
            let Some(entry) = archive.entry_for_class(name) else {
                continue;
            };
            let factory = self.linker.link(archive, entry)?;
            debug!(
                target: LOADER_TARGET,
                loader = self.id,
                class = name,
                archive = %archive.location().display(),
                "defined plugin class"
            );
            let class = PluginClass::new(name, entry.kind(), factory)
                .with_mixins(entry.mixins().iter().cloned());
            return Ok(Some(Arc::new(class)));
        }
        Ok(None)
    }

    fn find_own_resource(&self, path: &str) -> Result<Option<Vec<u8>>, PluginError> {
        for archive in &self.archives {
            if let Some(bytes) = archive.resource(path)? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }
}

impl fmt::Debug for PluginClassLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let archives: Vec<_> = self
            .archives
            .iter()
            .map(|archive| archive.manifest().name().to_owned())
            .collect();
        f.debug_struct("PluginClassLoader")
            .field("id", &self.id)
            .field("archives", &archives)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn not_found(name: &str) -> PluginError {
    PluginError::class_load(name, "class not found in plugin archives or host")
}

#[cfg(test)]
mod tests;
