//! Plugin resolution and isolation for the Embulk engine.
//!
//! Plugins are named in transfer configuration by [`PluginType`] and resolved
//! for a [`CapabilityKind`] by a [`PluginManager`], which consults its
//! [`PluginSource`]s in order:
//!
//! - [`InjectedSource`] binds names directly to factories, for tests.
//! - [`BuiltinSource`] holds plugins compiled into the host.
//! - [`SelfContainedSource`] loads `<prefix>-<category>-<name>` archives
//!   shipped with the executable.
//! - [`VersionedSource`] selects archives by group, name, and version from
//!   external roots.
//! - [`BundleSource`] loads archives from named bundle directories.
//!
//! Archive classes load through a [`PluginClassLoader`] that looks in the
//! plugin's own archives before the host, except for parent-first prefixes.
//!
//! # Example
//!
//! ```
//! use embulk_plugins::{BuiltinSource, PluginError, PluginManager, PluginType};
//!
//! let manager = PluginManager::builder()
//!     .source(BuiltinSource::new())
//!     .build()
//!     .expect("manager builds");
//!
//! let Err(err) = manager.parser(&PluginType::named("csv")) else {
//!     panic!("nothing is registered");
//! };
//! assert!(matches!(err, PluginError::PluginNotFound { .. }));
//! assert_eq!(
//!     err.to_string(),
//!     "parser plugin 'csv' not found:\n  - builtin: no parser plugin named 'csv'"
//! );
//! ```

pub mod adapter;
pub mod capability;
pub mod class_loader;
pub mod contract;
pub mod error;
pub mod manager;
pub mod source;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod version;

pub use embulk_spi::PluginType;

pub use self::adapter::{FileInputRunner, FileOutputRunner};
pub use self::capability::CapabilityKind;
pub use self::class_loader::{
    ArchiveManifest, ClassSource, DelegationPolicy, HostClasses, Linker, NativeLinker,
    PluginArchive, PluginClass, PluginClassLoader, PluginClassLoaderFactory, PluginEntry,
    PluginFactory, RetentionMode, SymbolTable,
};
pub use self::contract::{
    DecoderPlugin, EncoderPlugin, ExecutorPlugin, FileInputPlugin, FileOutputPlugin,
    FilterPlugin, FormatterPlugin, GuessPlugin, InputPlan, InputPlugin, OutputPlugin,
    ParserPlugin, PluginInstance, Record, RecordOutput, RecordSink,
};
pub use self::error::PluginError;
pub use self::manager::{Mixin, MixinRegistry, PluginManager, PluginManagerBuilder};
pub use self::source::{
    BuiltinSource, BundleSource, EmbeddedArchives, InjectedSource, LatestPolicy, PluginSource,
    SelfContainedSource, SourceResolution, VersionedSource,
};

#[cfg(test)]
mod tests;
