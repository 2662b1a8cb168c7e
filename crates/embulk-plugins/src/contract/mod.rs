//! Capability contracts implemented by plugins.
//!
//! The engine only needs each contract's entry points; the record and byte
//! plumbing inside a running plugin is intentionally thin. Records are rows
//! of JSON values laid out by a [`Schema`].

use std::fmt;
use std::sync::Arc;

use embulk_spi::{ConfigDiff, ConfigSource, Schema, TaskReport, TaskSource};

use crate::capability::CapabilityKind;
use crate::error::PluginError;

/// One row of values ordered like the columns of its [`Schema`].
pub type Record = Vec<serde_json::Value>;

/// Receives records produced by an input or a parser.
pub trait RecordSink: Send {
    /// Accepts one record.
    fn add(&mut self, record: Record) -> Result<(), PluginError>;

    /// Signals that no more records follow.
    fn finish(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

impl RecordSink for Vec<Record> {
    fn add(&mut self, record: Record) -> Result<(), PluginError> {
        self.push(record);
        Ok(())
    }
}

/// Per-partition writer opened by an [`OutputPlugin`].
pub trait RecordOutput: RecordSink {
    /// Commits the partition and returns its report.
    fn commit(&mut self) -> Result<TaskReport, PluginError>;
}

/// Result of planning an input transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPlan {
    /// Dumped task handed to every partition.
    pub task: TaskSource,
    /// Schema of the produced records.
    pub schema: Schema,
    /// Number of partitions.
    pub partitions: usize,
}

/// Reads records partition by partition.
pub trait InputPlugin: Send + Sync {
    /// Binds configuration and plans partitions.
    fn transaction(&self, config: &ConfigSource) -> Result<InputPlan, PluginError>;

    /// Produces the records of one partition.
    fn run(
        &self,
        task: &TaskSource,
        schema: &Schema,
        partition: usize,
        sink: &mut dyn RecordSink,
    ) -> Result<TaskReport, PluginError>;
}

/// Writes records partition by partition.
pub trait OutputPlugin: Send + Sync {
    /// Binds configuration for a transfer of `partitions` partitions.
    fn transaction(
        &self,
        config: &ConfigSource,
        schema: &Schema,
        partitions: usize,
    ) -> Result<TaskSource, PluginError>;

    /// Opens the writer of one partition.
    fn open(
        &self,
        task: &TaskSource,
        schema: &Schema,
        partition: usize,
    ) -> Result<Box<dyn RecordOutput>, PluginError>;
}

/// Transforms records.
pub trait FilterPlugin: Send + Sync {
    /// Binds configuration and derives the output schema.
    fn transaction(
        &self,
        config: &ConfigSource,
        input_schema: &Schema,
    ) -> Result<(TaskSource, Schema), PluginError>;

    /// Filters one record; `None` drops it.
    fn filter(&self, task: &TaskSource, record: Record) -> Result<Option<Record>, PluginError>;
}

/// Turns decoded bytes into records.
pub trait ParserPlugin: Send + Sync {
    /// Binds configuration and derives the schema.
    fn transaction(&self, config: &ConfigSource) -> Result<(TaskSource, Schema), PluginError>;

    /// Parses one file.
    fn parse(
        &self,
        task: &TaskSource,
        schema: &Schema,
        data: &[u8],
        sink: &mut dyn RecordSink,
    ) -> Result<(), PluginError>;
}

/// Turns records into bytes.
pub trait FormatterPlugin: Send + Sync {
    /// Binds configuration.
    fn transaction(&self, config: &ConfigSource, schema: &Schema)
    -> Result<TaskSource, PluginError>;

    /// Formats the records of one file.
    fn format(
        &self,
        task: &TaskSource,
        schema: &Schema,
        records: &[Record],
    ) -> Result<Vec<u8>, PluginError>;
}

/// Transforms bytes after reading.
pub trait DecoderPlugin: Send + Sync {
    /// Binds configuration.
    fn transaction(&self, config: &ConfigSource) -> Result<TaskSource, PluginError>;

    /// Decodes one file.
    fn decode(&self, task: &TaskSource, data: Vec<u8>) -> Result<Vec<u8>, PluginError>;
}

/// Transforms bytes before writing.
pub trait EncoderPlugin: Send + Sync {
    /// Binds configuration.
    fn transaction(&self, config: &ConfigSource) -> Result<TaskSource, PluginError>;

    /// Encodes one file.
    fn encode(&self, task: &TaskSource, data: Vec<u8>) -> Result<Vec<u8>, PluginError>;
}

/// Suggests configuration from a data sample.
pub trait GuessPlugin: Send + Sync {
    /// Returns configuration hints for `sample`.
    fn guess(&self, config: &ConfigSource, sample: &[u8]) -> Result<ConfigDiff, PluginError>;
}

/// Runs partitions on behalf of the engine.
pub trait ExecutorPlugin: Send + Sync {
    /// Runs every listed partition through `run`, returning reports in the
    /// order of `partitions`.
    fn execute(
        &self,
        config: &ConfigSource,
        partitions: &[usize],
        run: &(dyn Fn(usize) -> Result<TaskReport, PluginError> + Sync),
    ) -> Result<Vec<TaskReport>, PluginError>;
}

/// Reads whole files for each partition.
pub trait FileInputPlugin: Send + Sync {
    /// Binds configuration and returns the task with its partition count.
    fn transaction(&self, config: &ConfigSource) -> Result<(TaskSource, usize), PluginError>;

    /// Reads every file of one partition.
    fn read(&self, task: &TaskSource, partition: usize) -> Result<Vec<Vec<u8>>, PluginError>;

    /// Commits one partition once its files were consumed.
    fn commit(&self, task: &TaskSource, partition: usize) -> Result<TaskReport, PluginError>;
}

/// Writes whole files for each partition.
pub trait FileOutputPlugin: Send + Sync {
    /// Binds configuration for `partitions` partitions.
    fn transaction(&self, config: &ConfigSource, partitions: usize)
    -> Result<TaskSource, PluginError>;

    /// Writes one file of a partition.
    fn write(
        &self,
        task: &TaskSource,
        partition: usize,
        file: usize,
        data: &[u8],
    ) -> Result<(), PluginError>;

    /// Commits one partition.
    fn commit(&self, task: &TaskSource, partition: usize) -> Result<TaskReport, PluginError>;
}

/// A plugin instance tagged with its capability.
#[derive(Clone)]
pub enum PluginInstance {
    /// See [`InputPlugin`].
    Input(Arc<dyn InputPlugin>),
    /// See [`OutputPlugin`].
    Output(Arc<dyn OutputPlugin>),
    /// See [`FilterPlugin`].
    Filter(Arc<dyn FilterPlugin>),
    /// See [`ParserPlugin`].
    Parser(Arc<dyn ParserPlugin>),
    /// See [`FormatterPlugin`].
    Formatter(Arc<dyn FormatterPlugin>),
    /// See [`DecoderPlugin`].
    Decoder(Arc<dyn DecoderPlugin>),
    /// See [`EncoderPlugin`].
    Encoder(Arc<dyn EncoderPlugin>),
    /// See [`GuessPlugin`].
    Guess(Arc<dyn GuessPlugin>),
    /// See [`ExecutorPlugin`].
    Executor(Arc<dyn ExecutorPlugin>),
    /// See [`FileInputPlugin`].
    FileInput(Arc<dyn FileInputPlugin>),
    /// See [`FileOutputPlugin`].
    FileOutput(Arc<dyn FileOutputPlugin>),
}

impl PluginInstance {
    /// Capability this instance provides.
    #[must_use]
    pub const fn kind(&self) -> CapabilityKind {
        match self {
            Self::Input(_) => CapabilityKind::Input,
            Self::Output(_) => CapabilityKind::Output,
            Self::Filter(_) => CapabilityKind::Filter,
            Self::Parser(_) => CapabilityKind::Parser,
            Self::Formatter(_) => CapabilityKind::Formatter,
            Self::Decoder(_) => CapabilityKind::Decoder,
            Self::Encoder(_) => CapabilityKind::Encoder,
            Self::Guess(_) => CapabilityKind::Guess,
            Self::Executor(_) => CapabilityKind::Executor,
            Self::FileInput(_) => CapabilityKind::FileInput,
            Self::FileOutput(_) => CapabilityKind::FileOutput,
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PluginInstance").field(&self.kind()).finish()
    }
}
