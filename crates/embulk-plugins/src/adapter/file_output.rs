//! Record-level output over a formatter, encoders, and a file output.

use std::fmt;
use std::sync::{Arc, Weak};

use embulk_spi::{
    ConfigError, ConfigSource, FieldSpec, FieldType, Schema, TaskDescriptor, TaskReport,
    TaskSource,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{StageTask, decode_state, encode_state, stage_config, upgrade};
use crate::contract::{
    EncoderPlugin, FileOutputPlugin, FormatterPlugin, OutputPlugin, Record, RecordOutput,
    RecordSink,
};
use crate::error::PluginError;
use crate::manager::PluginManager;

const FILE_OUTPUT_TARGET: &str = "embulk_plugins::adapter::file_output";

static DESCRIPTOR: OnceCell<TaskDescriptor> = OnceCell::new();

fn descriptor() -> Result<&'static TaskDescriptor, ConfigError> {
    DESCRIPTOR.get_or_try_init(|| {
        TaskDescriptor::builder("FileOutputTask")
            .field(
                FieldSpec::config("Encoders", "encoders", FieldType::list(FieldType::Json))
                    .with_default("[]"),
            )
            .field(FieldSpec::config("Formatter", "formatter", FieldType::Json))
            .build()
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct FileOutputState {
    file_output_task: TaskSource,
    encoders: Vec<StageTask>,
    formatter: StageTask,
}

/// Presents a [`FileOutputPlugin`] as an [`OutputPlugin`].
///
/// Each partition is written as a single file.
pub struct FileOutputRunner {
    plugin: String,
    file_output: Arc<dyn FileOutputPlugin>,
    manager: Weak<PluginManager>,
}

impl FileOutputRunner {
    /// Wraps `file_output`, resolving helpers through `manager`.
    #[must_use]
    pub const fn new(
        plugin: String,
        file_output: Arc<dyn FileOutputPlugin>,
        manager: Weak<PluginManager>,
    ) -> Self {
        Self {
            plugin,
            file_output,
            manager,
        }
    }
}

impl fmt::Debug for FileOutputRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileOutputRunner")
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}

impl OutputPlugin for FileOutputRunner {
    fn transaction(
        &self,
        config: &ConfigSource,
        schema: &Schema,
        partitions: usize,
    ) -> Result<TaskSource, PluginError> {
        let bound = config.load_config(descriptor()?)?;
        let manager = upgrade(&self.manager, &self.plugin)?;
        let file_output_task = self.file_output.transaction(config, partitions)?;

        let encoders = bound
            .get::<Vec<Value>>("Encoders")?
            .into_iter()
            .map(|value| {
                let (plugin, encoder_config) = stage_config(value)?;
                let task = manager.encoder(&plugin)?.transaction(&encoder_config)?;
                Ok(StageTask { plugin, task })
            })
            .collect::<Result<Vec<_>, PluginError>>()?;

        let (formatter_plugin, formatter_config) =
            stage_config(bound.get::<Value>("Formatter")?)?;
        let formatter_task = manager
            .formatter(&formatter_plugin)?
            .transaction(&formatter_config, schema)?;

        encode_state(&FileOutputState {
            file_output_task,
            encoders,
            formatter: StageTask {
                plugin: formatter_plugin,
                task: formatter_task,
            },
        })
    }

    fn open(
        &self,
        task: &TaskSource,
        schema: &Schema,
        partition: usize,
    ) -> Result<Box<dyn RecordOutput>, PluginError> {
        let state: FileOutputState = decode_state(task)?;
        let manager = upgrade(&self.manager, &self.plugin)?;
        let encoders = state
            .encoders
            .iter()
            .map(|stage| Ok((manager.encoder(&stage.plugin)?, stage.task.clone())))
            .collect::<Result<Vec<_>, PluginError>>()?;
        let formatter = manager.formatter(&state.formatter.plugin)?;
        Ok(Box::new(FilePartitionOutput {
            plugin: self.plugin.clone(),
            partition,
            schema: schema.clone(),
            file_output: Arc::clone(&self.file_output),
            formatter,
            encoders,
            state,
            records: Vec::new(),
        }))
    }
}

/// Buffers one partition and writes it as a single file on commit.
struct FilePartitionOutput {
    plugin: String,
    partition: usize,
    schema: Schema,
    file_output: Arc<dyn FileOutputPlugin>,
    formatter: Arc<dyn FormatterPlugin>,
    encoders: Vec<(Arc<dyn EncoderPlugin>, TaskSource)>,
    state: FileOutputState,
    records: Vec<Record>,
}

impl RecordSink for FilePartitionOutput {
    fn add(&mut self, record: Record) -> Result<(), PluginError> {
        self.records.push(record);
        Ok(())
    }
}

impl RecordOutput for FilePartitionOutput {
    fn commit(&mut self) -> Result<TaskReport, PluginError> {
        let records = std::mem::take(&mut self.records);
        let formatted =
            self.formatter
                .format(&self.state.formatter.task, &self.schema, &records)?;
        let encoded = self
            .encoders
            .iter()
            .try_fold(formatted, |data, (encoder, encoder_task)| {
                encoder.encode(encoder_task, data)
            })?;
        let task = &self.state.file_output_task;
        self.file_output.write(task, self.partition, 0, &encoded)?;
        debug!(
            target: FILE_OUTPUT_TARGET,
            plugin = %self.plugin,
            partition = self.partition,
            records = records.len(),
            bytes = encoded.len(),
            "file output partition written"
        );
        self.file_output.commit(task, self.partition)
    }
}
