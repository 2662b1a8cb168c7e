//! Bootstrap and transfer execution for the Embulk engine.
//!
//! [`bootstrap_with`] loads [`embulk_config::Config`], installs structured
//! telemetry, and assembles a [`embulk_plugins::PluginManager`] whose sources
//! follow the configured plugin roots, bundles, and embedded archives. The
//! resulting [`Engine`] hands the manager to a [`TransferDriver`], which runs
//! a transfer partition by partition and checkpoints a
//! [`embulk_spi::ResumeState`] after each commit so a failed attempt can be
//! resumed under the same transaction id.
//!
//! Health reporting hooks emit structured events at each lifecycle stage.

mod bootstrap;
mod health;
pub mod resume_store;
pub mod telemetry;
pub mod transfer;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Engine, PluginHost, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use resume_store::{FileResumeStore, MemoryResumeStore, ResumeStore, ResumeStoreError};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transfer::{TransferDriver, TransferError, TransferOutcome, TransferSpec};

#[cfg(test)]
mod tests;
