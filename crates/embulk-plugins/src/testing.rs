//! Archive builders and no-op plugins used in tests.
//!
//! Available under `cfg(test)` and with the `test-support` feature.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use embulk_spi::{ConfigDiff, ConfigSource, Schema, TaskReport, TaskSource};
use zip::ZipWriter;
use zip::write::FileOptions;

use crate::capability::CapabilityKind;
use crate::class_loader::{ArchiveManifest, MANIFEST_PATH, PluginArchive, PluginEntry};
use crate::contract::{
    DecoderPlugin, EncoderPlugin, ExecutorPlugin, FileInputPlugin, FileOutputPlugin,
    FilterPlugin, FormatterPlugin, GuessPlugin, InputPlan, InputPlugin, OutputPlugin,
    ParserPlugin, PluginInstance, Record, RecordOutput, RecordSink,
};
use crate::error::PluginError;

/// Assembles a zip plugin archive in memory.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    manifest: ArchiveManifest,
    resources: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    /// Starts an archive for artifact `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            manifest: ArchiveManifest::new(name),
            resources: Vec::new(),
        }
    }

    /// Sets the artifact group.
    #[must_use]
    pub fn group(mut self, group: &str) -> Self {
        self.manifest = self.manifest.with_group(group);
        self
    }

    /// Sets the artifact version.
    #[must_use]
    pub fn version(mut self, version: &str) -> Self {
        self.manifest = self.manifest.with_version(version);
        self
    }

    /// Sets the artifact classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: &str) -> Self {
        self.manifest = self.manifest.with_classifier(classifier);
        self
    }

    /// Declares a plugin class.
    #[must_use]
    pub fn plugin(mut self, entry: PluginEntry) -> Self {
        self.manifest = self.manifest.with_plugin(entry);
        self
    }

    /// Stores an extra file.
    #[must_use]
    pub fn resource(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.resources.push((path.to_owned(), bytes));
        self
    }

    /// Encodes the archive as zip bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Archive`] when encoding fails.
    pub fn to_zip_bytes(&self) -> Result<Vec<u8>, PluginError> {
        let encode_error = |message: String| PluginError::Archive {
            path: PathBuf::from(self.manifest.name()),
            message,
        };
        let manifest = serde_json::to_vec_pretty(&self.manifest)
            .map_err(|error| encode_error(error.to_string()))?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let files = std::iter::once((MANIFEST_PATH, manifest.as_slice())).chain(
            self.resources
                .iter()
                .map(|(path, bytes)| (path.as_str(), bytes.as_slice())),
        );
        for (path, bytes) in files {
            writer
                .start_file(path, FileOptions::default())
                .map_err(|error| encode_error(error.to_string()))?;
            writer
                .write_all(bytes)
                .map_err(|error| encode_error(error.to_string()))?;
        }
        let cursor = writer
            .finish()
            .map_err(|error| encode_error(error.to_string()))?;
        Ok(cursor.into_inner())
    }

    /// Builds an in-memory archive.
    ///
    /// # Errors
    ///
    /// Returns encoding or manifest validation failures.
    pub fn build(&self) -> Result<PluginArchive, PluginError> {
        PluginArchive::from_zip_bytes(self.file_name(), self.to_zip_bytes()?)
    }

    /// Writes the archive into `dir` and returns its path.
    ///
    /// # Errors
    ///
    /// Returns encoding failures and [`PluginError::Io`].
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, PluginError> {
        let path = dir.join(self.file_name());
        fs::write(&path, self.to_zip_bytes()?).map_err(|source| PluginError::io(&path, source))?;
        Ok(path)
    }

    fn file_name(&self) -> String {
        let name = self.manifest.name();
        self.manifest.version().map_or_else(
            || format!("{name}.zip"),
            |version| format!("{name}-{version}.zip"),
        )
    }
}

/// A plugin of every kind that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPlugin;

/// Creates a [`NoopPlugin`] instance of `kind`.
#[must_use]
pub fn noop_instance(kind: CapabilityKind) -> PluginInstance {
    let plugin = Arc::new(NoopPlugin);
    match kind {
        CapabilityKind::Input => PluginInstance::Input(plugin),
        CapabilityKind::Output => PluginInstance::Output(plugin),
        CapabilityKind::Filter => PluginInstance::Filter(plugin),
        CapabilityKind::Parser => PluginInstance::Parser(plugin),
        CapabilityKind::Formatter => PluginInstance::Formatter(plugin),
        CapabilityKind::Decoder => PluginInstance::Decoder(plugin),
        CapabilityKind::Encoder => PluginInstance::Encoder(plugin),
        CapabilityKind::Guess => PluginInstance::Guess(plugin),
        CapabilityKind::Executor => PluginInstance::Executor(plugin),
        CapabilityKind::FileInput => PluginInstance::FileInput(plugin),
        CapabilityKind::FileOutput => PluginInstance::FileOutput(plugin),
    }
}

fn echo_task(config: &ConfigSource) -> TaskSource {
    config.deep_copy().into_task()
}

impl InputPlugin for NoopPlugin {
    fn transaction(&self, config: &ConfigSource) -> Result<InputPlan, PluginError> {
        Ok(InputPlan {
            task: echo_task(config),
            schema: Schema::default(),
            partitions: 1,
        })
    }

    fn run(
        &self,
        _task: &TaskSource,
        _schema: &Schema,
        _partition: usize,
        _sink: &mut dyn RecordSink,
    ) -> Result<TaskReport, PluginError> {
        Ok(TaskReport::new())
    }
}

/// Output partition discarding its records.
#[derive(Debug, Default)]
pub struct DiscardOutput;

impl RecordSink for DiscardOutput {
    fn add(&mut self, _record: Record) -> Result<(), PluginError> {
        Ok(())
    }
}

impl RecordOutput for DiscardOutput {
    fn commit(&mut self) -> Result<TaskReport, PluginError> {
        Ok(TaskReport::new())
    }
}

impl OutputPlugin for NoopPlugin {
    fn transaction(
        &self,
        config: &ConfigSource,
        _schema: &Schema,
        _partitions: usize,
    ) -> Result<TaskSource, PluginError> {
        Ok(echo_task(config))
    }

    fn open(
        &self,
        _task: &TaskSource,
        _schema: &Schema,
        _partition: usize,
    ) -> Result<Box<dyn RecordOutput>, PluginError> {
        Ok(Box::new(DiscardOutput))
    }
}

impl FilterPlugin for NoopPlugin {
    fn transaction(
        &self,
        config: &ConfigSource,
        input_schema: &Schema,
    ) -> Result<(TaskSource, Schema), PluginError> {
        Ok((echo_task(config), input_schema.clone()))
    }

    fn filter(&self, _task: &TaskSource, record: Record) -> Result<Option<Record>, PluginError> {
        Ok(Some(record))
    }
}

impl ParserPlugin for NoopPlugin {
    fn transaction(&self, config: &ConfigSource) -> Result<(TaskSource, Schema), PluginError> {
        Ok((echo_task(config), Schema::default()))
    }

    fn parse(
        &self,
        _task: &TaskSource,
        _schema: &Schema,
        _data: &[u8],
        _sink: &mut dyn RecordSink,
    ) -> Result<(), PluginError> {
        Ok(())
    }
}

impl FormatterPlugin for NoopPlugin {
    fn transaction(
        &self,
        config: &ConfigSource,
        _schema: &Schema,
    ) -> Result<TaskSource, PluginError> {
        Ok(echo_task(config))
    }

    fn format(
        &self,
        _task: &TaskSource,
        _schema: &Schema,
        _records: &[Record],
    ) -> Result<Vec<u8>, PluginError> {
        Ok(Vec::new())
    }
}

impl DecoderPlugin for NoopPlugin {
    fn transaction(&self, config: &ConfigSource) -> Result<TaskSource, PluginError> {
        Ok(echo_task(config))
    }

    fn decode(&self, _task: &TaskSource, data: Vec<u8>) -> Result<Vec<u8>, PluginError> {
        Ok(data)
    }
}

impl EncoderPlugin for NoopPlugin {
    fn transaction(&self, config: &ConfigSource) -> Result<TaskSource, PluginError> {
        Ok(echo_task(config))
    }

    fn encode(&self, _task: &TaskSource, data: Vec<u8>) -> Result<Vec<u8>, PluginError> {
        Ok(data)
    }
}

impl GuessPlugin for NoopPlugin {
    fn guess(&self, _config: &ConfigSource, _sample: &[u8]) -> Result<ConfigDiff, PluginError> {
        Ok(ConfigDiff::new())
    }
}

impl ExecutorPlugin for NoopPlugin {
    fn execute(
        &self,
        _config: &ConfigSource,
        partitions: &[usize],
        run: &(dyn Fn(usize) -> Result<TaskReport, PluginError> + Sync),
    ) -> Result<Vec<TaskReport>, PluginError> {
        partitions.iter().map(|partition| run(*partition)).collect()
    }
}

impl FileInputPlugin for NoopPlugin {
    fn transaction(&self, config: &ConfigSource) -> Result<(TaskSource, usize), PluginError> {
        Ok((echo_task(config), 1))
    }

    fn read(&self, _task: &TaskSource, _partition: usize) -> Result<Vec<Vec<u8>>, PluginError> {
        Ok(Vec::new())
    }

    fn commit(&self, _task: &TaskSource, _partition: usize) -> Result<TaskReport, PluginError> {
        Ok(TaskReport::new())
    }
}

impl FileOutputPlugin for NoopPlugin {
    fn transaction(
        &self,
        config: &ConfigSource,
        _partitions: usize,
    ) -> Result<TaskSource, PluginError> {
        Ok(echo_task(config))
    }

    fn write(
        &self,
        _task: &TaskSource,
        _partition: usize,
        _file: usize,
        _data: &[u8],
    ) -> Result<(), PluginError> {
        Ok(())
    }

    fn commit(&self, _task: &TaskSource, _partition: usize) -> Result<TaskReport, PluginError> {
        Ok(TaskReport::new())
    }
}
