//! Data model shared by the Embulk engine and its plugins.
//!
//! The `embulk-spi` crate owns the JSON-shaped values that flow between the
//! engine and plugins, and the machinery that turns them into typed tasks:
//!
//! - [`PluginType`] names a plugin by convention, by versioned artifact, or by
//!   scoped bundle.
//! - [`DataSource`] is the ordered mapping underlying the four roles
//!   [`ConfigSource`], [`TaskSource`], [`TaskReport`] and [`ConfigDiff`].
//! - [`TaskDescriptor`] and [`TaskBinder`] bind a mapping to a
//!   [`BoundTask`], applying defaults and aggregating missing fields and
//!   validation failures.
//! - [`ResumeState`] records which partitions of a transfer have committed.
//!
//! # Example
//!
//! ```
//! use embulk_spi::{ConfigSource, FieldSpec, FieldType, TaskDescriptor};
//!
//! let descriptor = TaskDescriptor::builder("CsvParserTask")
//!     .field(FieldSpec::config("Delimiter", "delimiter", FieldType::String).with_default("\",\""))
//!     .field(FieldSpec::config("SkipHeaderLines", "skip_header_lines", FieldType::Integer))
//!     .build()
//!     .expect("descriptor is valid");
//!
//! let config = ConfigSource::from_json_str(r#"{"skip_header_lines": 1}"#).expect("valid json");
//! let task = config.load_config(&descriptor).expect("binding succeeds");
//! assert_eq!(task.get::<String>("Delimiter").expect("delimiter"), ",");
//! ```

pub mod data_source;
pub mod error;
pub mod plugin_type;
pub mod resume;
pub mod schema;
pub mod task;

pub use self::data_source::{ConfigDiff, ConfigSource, DataSource, TaskReport, TaskSource};
pub use self::error::ConfigError;
pub use self::plugin_type::PluginType;
pub use self::resume::{ResumeState, Stage};
pub use self::schema::{Column, ColumnType, Schema};
pub use self::task::{
    BindMode, BoundTask, FieldSpec, FieldType, Rules, TaskBinder, TaskDescriptor, TaskValidator,
    Violation,
};

#[cfg(test)]
mod tests;
