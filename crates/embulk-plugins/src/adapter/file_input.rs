//! Record-level input over a file input, decoders, and a parser.

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
use crate::contract::{FileInputPlugin, InputPlan, InputPlugin, RecordSink};
use crate::error::PluginError;
use crate::manager::PluginManager;

const FILE_INPUT_TARGET: &str = "embulk_plugins::adapter::file_input";

static DESCRIPTOR: OnceCell<TaskDescriptor> = OnceCell::new();

fn descriptor() -> Result<&'static TaskDescriptor, ConfigError> {
    DESCRIPTOR.get_or_try_init(|| {
        TaskDescriptor::builder("FileInputTask")
            .field(
                FieldSpec::config("Decoders", "decoders", FieldType::list(FieldType::Json))
                    .with_default("[]"),
            )
            .field(FieldSpec::config("Parser", "parser", FieldType::Json))
            .build()
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct FileInputState {
    file_input_task: TaskSource,
    decoders: Vec<StageTask>,
    parser: StageTask,
}

/// Presents a [`FileInputPlugin`] as an [`InputPlugin`].
pub struct FileInputRunner {
    plugin: String,
    file_input: Arc<dyn FileInputPlugin>,
    manager: Weak<PluginManager>,
}

impl FileInputRunner {
    /// Wraps `file_input`, resolving helpers through `manager`.
    #[must_use]
    pub const fn new(
        plugin: String,
        file_input: Arc<dyn FileInputPlugin>,
        manager: Weak<PluginManager>,
    ) -> Self {
        Self {
            plugin,
            file_input,
            manager,
        }
    }
}

impl fmt::Debug for FileInputRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileInputRunner")
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}

impl InputPlugin for FileInputRunner {
    fn transaction(&self, config: &ConfigSource) -> Result<InputPlan, PluginError> {
        let bound = config.load_config(descriptor()?)?;
        let manager = upgrade(&self.manager, &self.plugin)?;
        let (file_input_task, partitions) = self.file_input.transaction(config)?;

        let decoders = bound
            .get::<Vec<Value>>("Decoders")?
            .into_iter()
            .map(|value| {
                let (plugin, decoder_config) = stage_config(value)?;
                let task = manager.decoder(&plugin)?.transaction(&decoder_config)?;
                Ok(StageTask { plugin, task })
            })
            .collect::<Result<Vec<_>, PluginError>>()?;

        let (parser_plugin, parser_config) = stage_config(bound.get::<Value>("Parser")?)?;
        let (parser_task, schema) = manager.parser(&parser_plugin)?.transaction(&parser_config)?;

        let state = FileInputState {
            file_input_task,
            decoders,
            parser: StageTask {
                plugin: parser_plugin,
                task: parser_task,
            },
        };
        Ok(InputPlan {
            task: encode_state(&state)?,
            schema,
            partitions,
        })
    }

    fn run(
        &self,
        task: &TaskSource,
        schema: &Schema,
        partition: usize,
        sink: &mut dyn RecordSink,
    ) -> Result<TaskReport, PluginError> {
        let state: FileInputState = decode_state(task)?;
        let manager = upgrade(&self.manager, &self.plugin)?;
        let decoders = state
            .decoders
            .iter()
            .map(|stage| Ok((manager.decoder(&stage.plugin)?, &stage.task)))
            .collect::<Result<Vec<_>, PluginError>>()?;
        let parser = manager.parser(&state.parser.plugin)?;

        let files = self.file_input.read(&state.file_input_task, partition)?;
        let file_count = files.len();
        for file in files {
            let data = decoders
                .iter()
                .try_fold(file, |data, (decoder, decoder_task)| {
                    decoder.decode(decoder_task, data)
                })?;
            parser.parse(&state.parser.task, schema, &data, sink)?;
        }
        sink.finish()?;
        debug!(
            target: FILE_INPUT_TARGET,
            plugin = %self.plugin,
            partition,
            files = file_count,
            "file input partition parsed"
        );
        self.file_input.commit(&state.file_input_task, partition)
    }
}
