//! Creation and retention of class loaders.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::archive::PluginArchive;
use super::linker::Linker;
use super::{ClassSource, DelegationPolicy, PluginClassLoader};
use crate::error::PluginError;

const FACTORY_TARGET: &str = "embulk_plugins::class_loader::factory";

/// Whether created loaders are kept alive by the factory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetentionMode {
    /// Keep every loader until [`PluginClassLoaderFactory::release_all`].
    #[default]
    Hold,
    /// Let loaders go once their users drop them.
    Release,
}

/// Creates [`PluginClassLoader`]s sharing a parent, a policy, and a linker.
pub struct PluginClassLoaderFactory {
    parent: Arc<dyn ClassSource>,
    policy: Arc<DelegationPolicy>,
    linker: Arc<dyn Linker>,
    retention: RetentionMode,
    held: Mutex<Vec<Arc<PluginClassLoader>>>,
    next_id: AtomicU64,
}

impl PluginClassLoaderFactory {
    /// Creates a factory that holds its loaders.
    #[must_use]
    pub fn new(
        parent: Arc<dyn ClassSource>,
        policy: DelegationPolicy,
        linker: Arc<dyn Linker>,
    ) -> Self {
        Self {
            parent,
            policy: Arc::new(policy),
            linker,
            retention: RetentionMode::Hold,
            held: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Sets the retention mode.
    #[must_use]
    pub const fn with_retention(mut self, retention: RetentionMode) -> Self {
        self.retention = retention;
        self
    }

    /// Active retention mode.
    #[must_use]
    pub const fn retention(&self) -> RetentionMode {
        self.retention
    }

    /// Delegation policy handed to every loader.
    #[must_use]
    pub fn policy(&self) -> &DelegationPolicy {
        &self.policy
    }

    /// Creates a loader over `archives`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LockPoisoned`] when the retention list is
    /// poisoned.
    pub fn create(
        &self,
        archives: Vec<Arc<PluginArchive>>,
    ) -> Result<Arc<PluginClassLoader>, PluginError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let loader = Arc::new(PluginClassLoader::new(
            id,
            archives,
            Arc::clone(&self.parent),
            Arc::clone(&self.policy),
            Arc::clone(&self.linker),
        ));
        if self.retention == RetentionMode::Hold {
            self.lock_held()?.push(Arc::clone(&loader));
        }
        debug!(
            target: FACTORY_TARGET,
            loader = id,
            archives = loader.archives().len(),
            retention = ?self.retention,
            "created plugin class loader"
        );
        Ok(loader)
    }

    /// Number of loaders currently held.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LockPoisoned`] when the retention list is
    /// poisoned.
    pub fn held_count(&self) -> Result<usize, PluginError> {
        Ok(self.lock_held()?.len())
    }

    /// Drops every held loader and returns how many were released.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LockPoisoned`] when the retention list is
    /// poisoned.
    pub fn release_all(&self) -> Result<usize, PluginError> {
        let released = std::mem::take(&mut *self.lock_held()?);
        debug!(
            target: FACTORY_TARGET,
            released = released.len(),
            "released plugin class loaders"
        );
        Ok(released.len())
    }

    fn lock_held(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Vec<Arc<PluginClassLoader>>>, PluginError> {
        self.held.lock().map_err(|_| PluginError::LockPoisoned {
            resource: "class loader retention",
        })
    }
}

impl fmt::Debug for PluginClassLoaderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginClassLoaderFactory")
            .field("policy", &self.policy)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}
