//! Runners exposing file-scoped plugins through the record contracts.
//!
//! A [`FileInputRunner`] reads the files of a partition, passes each through
//! the configured decoders in order, and parses the result into records. A
//! [`FileOutputRunner`] buffers a partition's records, formats them into one
//! file, encodes it, and writes it. Decoders, parsers, formatters, and
//! encoders are resolved through the owning manager from the `decoders`,
//! `parser`, `formatter`, and `encoders` configuration keys.

mod file_input;
mod file_output;

use std::sync::{Arc, Weak};

use embulk_spi::{ConfigError, ConfigSource, DataSource, PluginType, TaskSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use file_input::FileInputRunner;
pub use file_output::FileOutputRunner;

use crate::error::PluginError;
use crate::manager::{PluginManager, plugin_type_of};

/// A resolved helper plugin and the task it planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StageTask {
    plugin: PluginType,
    task: TaskSource,
}

/// Splits a helper plugin's configuration into its reference and its
/// configuration.
fn stage_config(value: Value) -> Result<(PluginType, ConfigSource), PluginError> {
    let config = DataSource::from_value(value)?;
    let plugin = plugin_type_of(&config)?;
    Ok((plugin, config.into_config()))
}

fn upgrade(manager: &Weak<PluginManager>, plugin: &str) -> Result<Arc<PluginManager>, PluginError> {
    manager
        .upgrade()
        .ok_or_else(|| PluginError::execution(plugin, "plugin manager is no longer available"))
}

fn encode_state<T: Serialize>(state: &T) -> Result<TaskSource, PluginError> {
    let value = serde_json::to_value(state).map_err(ConfigError::from)?;
    Ok(DataSource::from_value(value)?.into_task())
}

fn decode_state<T: serde::de::DeserializeOwned>(task: &TaskSource) -> Result<T, PluginError> {
    serde_json::from_value(task.to_value())
        .map_err(ConfigError::from)
        .map_err(PluginError::from)
}
