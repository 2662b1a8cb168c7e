//! Typed tasks bound from structured configuration.
//!
//! A [`TaskDescriptor`] is the field table of one task type. [`TaskBinder`]
//! reads a [`DataSource`] against it in one of two [`BindMode`]s:
//!
//! - [`BindMode::Config`] reads user configuration by declared JSON key;
//! - [`BindMode::Task`] re-reads a dumped task by field name.
//!
//! A [`BoundTask`] always dumps by field name, so binding a dump in task mode
//! yields an equal task.

mod binder;
mod bound;
mod descriptor;
mod validate;

pub use self::binder::{BindMode, TaskBinder};
pub use self::bound::BoundTask;
pub use self::descriptor::{
    DescriptorResolver, FieldSpec, FieldType, TaskDescriptor, TaskDescriptorBuilder,
};
pub use self::validate::{Rules, TaskValidator, Violation};

use crate::data_source::{DataSource, TaskSource};
use crate::error::ConfigError;

impl TaskSource {
    /// Binds this dumped task to `descriptor` in [`BindMode::Task`].
    ///
    /// # Errors
    ///
    /// Propagates every binding error of [`TaskBinder::bind`].
    pub fn load_task(&self, descriptor: &TaskDescriptor) -> Result<BoundTask, ConfigError> {
        TaskBinder::task().bind(descriptor, self)
    }
}

impl DataSource {
    /// Binds this configuration to `descriptor` in [`BindMode::Config`].
    ///
    /// # Errors
    ///
    /// Propagates every binding error of [`TaskBinder::bind`].
    pub fn load_config(&self, descriptor: &TaskDescriptor) -> Result<BoundTask, ConfigError> {
        TaskBinder::config().bind(descriptor, self)
    }
}

#[cfg(test)]
mod tests;
