//! Shared fixtures for engine tests.

use std::ffi::OsString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use embulk_config::Config;
use embulk_plugins::{
    CapabilityKind, ExecutorPlugin, InjectedSource, InputPlan, InputPlugin, OutputPlugin,
    PluginError, PluginInstance, PluginManager, Record, RecordOutput, RecordSink,
};
use embulk_spi::{ColumnType, ConfigSource, DataSource, Schema, TaskReport, TaskSource};
use ortho_config::{OrthoConfig, OrthoError};
use serde_json::json;

use crate::bootstrap::{BootstrapError, ConfigLoader};
use crate::health::HealthReporter;
use crate::transfer::TransferSpec;

/// Observations shared by the recording plugins.
#[derive(Debug, Default)]
pub struct Recorder {
    plans: AtomicUsize,
    executor_calls: AtomicUsize,
    runs: Mutex<Vec<usize>>,
    written: Mutex<Vec<(usize, Vec<Record>)>>,
    failing: Mutex<Option<usize>>,
}

impl Recorder {
    pub fn fail_partition(&self, partition: Option<usize>) {
        *self.failing.lock().expect("failing lock") = partition;
    }

    pub fn plans(&self) -> usize {
        self.plans.load(Ordering::SeqCst)
    }

    pub fn executor_calls(&self) -> usize {
        self.executor_calls.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> Vec<usize> {
        self.runs.lock().expect("runs lock").clone()
    }

    pub fn clear_runs(&self) {
        self.runs.lock().expect("runs lock").clear();
    }

    /// Written partitions, ascending.
    pub fn written(&self) -> Vec<(usize, Vec<Record>)> {
        let mut written = self.written.lock().expect("written lock").clone();
        written.sort_by_key(|(partition, _)| *partition);
        written
    }
}

/// Emits two rows per partition and plans `partitions` from configuration.
struct RecordingInput(Arc<Recorder>);

impl InputPlugin for RecordingInput {
    fn transaction(&self, config: &ConfigSource) -> Result<InputPlan, PluginError> {
        self.0.plans.fetch_add(1, Ordering::SeqCst);
        let partitions: usize = config.get("partitions")?;
        let mut task = DataSource::new();
        task.set("partitions", &partitions)?;
        Ok(InputPlan {
            task: task.into_task(),
            schema: Schema::builder().add("id", ColumnType::Long).build(),
            partitions,
        })
    }

    fn run(
        &self,
        _task: &TaskSource,
        _schema: &Schema,
        partition: usize,
        sink: &mut dyn RecordSink,
    ) -> Result<TaskReport, PluginError> {
        self.0.runs.lock().expect("runs lock").push(partition);
        if *self.0.failing.lock().expect("failing lock") == Some(partition) {
            return Err(PluginError::execution("recording", "partition rejected"));
        }
        for row in 0..2 {
            sink.add(vec![json!(partition * 10 + row)])?;
        }
        sink.finish()?;
        let mut report = TaskReport::new();
        report.set("read", &2)?;
        Ok(report)
    }
}

struct RecordingOutput(Arc<Recorder>);

struct Buffer {
    partition: usize,
    rows: Vec<Record>,
    recorder: Arc<Recorder>,
}

impl RecordSink for Buffer {
    fn add(&mut self, record: Record) -> Result<(), PluginError> {
        self.rows.push(record);
        Ok(())
    }
}

impl RecordOutput for Buffer {
    fn commit(&mut self) -> Result<TaskReport, PluginError> {
        let rows = std::mem::take(&mut self.rows);
        let mut report = TaskReport::new();
        report.set("written", &rows.len())?;
        self.recorder
            .written
            .lock()
            .expect("written lock")
            .push((self.partition, rows));
        Ok(report)
    }
}

impl OutputPlugin for RecordingOutput {
    fn transaction(
        &self,
        _config: &ConfigSource,
        _schema: &Schema,
        _partitions: usize,
    ) -> Result<TaskSource, PluginError> {
        Ok(TaskSource::new())
    }

    fn open(
        &self,
        _task: &TaskSource,
        _schema: &Schema,
        partition: usize,
    ) -> Result<Box<dyn RecordOutput>, PluginError> {
        Ok(Box::new(Buffer {
            partition,
            rows: Vec::new(),
            recorder: Arc::clone(&self.0),
        }))
    }
}

/// Runs every partition on its own thread.
struct ThreadedExecutor(Arc<Recorder>);

impl ExecutorPlugin for ThreadedExecutor {
    fn execute(
        &self,
        _config: &ConfigSource,
        partitions: &[usize],
        run: &(dyn Fn(usize) -> Result<TaskReport, PluginError> + Sync),
    ) -> Result<Vec<TaskReport>, PluginError> {
        self.0.executor_calls.fetch_add(1, Ordering::SeqCst);
        thread::scope(|scope| {
            let handles: Vec<_> = partitions
                .iter()
                .map(|partition| scope.spawn(move || run(*partition)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("partition thread"))
                .collect()
        })
    }
}

/// Injected source binding `recording` input and output plugins and a
/// `threads` executor to `recorder`.
pub fn recording_source(recorder: &Arc<Recorder>) -> InjectedSource {
    let input = Arc::clone(recorder);
    let output = Arc::clone(recorder);
    let executor = Arc::clone(recorder);
    InjectedSource::new()
        .with_factory(CapabilityKind::Input, "recording", move || {
            Ok(PluginInstance::Input(Arc::new(RecordingInput(Arc::clone(
                &input,
            )))))
        })
        .with_factory(CapabilityKind::Output, "recording", move || {
            Ok(PluginInstance::Output(Arc::new(RecordingOutput(
                Arc::clone(&output),
            ))))
        })
        .with_factory(CapabilityKind::Executor, "threads", move || {
            Ok(PluginInstance::Executor(Arc::new(ThreadedExecutor(
                Arc::clone(&executor),
            ))))
        })
}

pub fn recording_manager(recorder: &Arc<Recorder>) -> Arc<PluginManager> {
    PluginManager::builder()
        .source(recording_source(recorder))
        .build()
        .expect("manager")
}

pub fn transfer_spec(partitions: usize) -> TransferSpec {
    let input = ConfigSource::from_json_str(&format!(
        r#"{{"type": "recording", "partitions": {partitions}}}"#
    ))
    .expect("input config");
    let output = ConfigSource::from_json_str(r#"{"type": "recording"}"#).expect("output config");
    TransferSpec::new(input, output)
}

pub fn threaded(spec: TransferSpec) -> TransferSpec {
    spec.with_exec(ConfigSource::from_json_str(r#"{"type": "threads"}"#).expect("exec config"))
}

/// Lifecycle events observed by [`RecordingHealthReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded(Vec<String>),
    BootstrapFailed(String),
    ShutdownCompleted(usize),
}

#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events.lock().expect("events lock").clone()
    }

    fn push(&self, event: HealthEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.push(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config, sources: &[&str]) {
        self.push(HealthEvent::BootstrapSucceeded(
            sources.iter().map(|source| (*source).to_owned()).collect(),
        ));
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.push(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn shutdown_completed(&self, loaders: usize) {
        self.push(HealthEvent::ShutdownCompleted(loaders));
    }
}

/// Loader that intentionally fails by passing an unknown CLI flag.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("embulk"),
            OsString::from("--no-such-setting"),
            OsString::from("value"),
        ];
        Config::load_from_iter(args)
    }
}
