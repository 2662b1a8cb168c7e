//! Resumable execution of an input-to-output transfer.
//!
//! The first attempt plans both sides, checkpoints a [`ResumeState`] with
//! every slot empty, and runs each partition, saving the checkpoint after
//! every commit. A later attempt with the same transaction id reuses the
//! stored tasks and schemas and runs only the partitions whose slots are
//! still empty. The checkpoint is removed once every partition committed.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use embulk_plugins::manager::{TYPE_KEY, plugin_type_of};
use embulk_plugins::{InputPlugin, OutputPlugin, PluginError, PluginManager};
use embulk_spi::{ConfigError, ConfigSource, ResumeState, Stage, TaskReport};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::resume_store::{ResumeStore, ResumeStoreError};
use crate::telemetry::targets::TRANSFER as TRANSFER_TARGET;

/// Errors raised while running a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A plugin could not be resolved or planned.
    #[error(transparent)]
    Plugin(#[from] PluginError),
    /// Transfer configuration is malformed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The checkpoint could not be read or written.
    #[error("resume store failed: {0}")]
    Store(#[from] ResumeStoreError),
    /// One or more partitions failed; the checkpoint keeps their slots empty.
    #[error("partitions {failed:?} failed: {source}")]
    Partitions {
        /// Failed partitions, in the order they failed.
        failed: Vec<usize>,
        /// Error returned by the executor.
        #[source]
        source: PluginError,
    },
    /// The checkpoint disagrees on the partition count of both sides.
    #[error("checkpoint has {input} input and {output} output partitions")]
    PartitionMismatch {
        /// Input slot count.
        input: usize,
        /// Output slot count.
        output: usize,
    },
    /// Shared transfer state was poisoned by a panicking partition.
    #[error("transfer state lock poisoned")]
    LockPoisoned,
}

/// Plugin configuration of one transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSpec {
    input: ConfigSource,
    output: ConfigSource,
    exec: ConfigSource,
}

impl TransferSpec {
    /// Creates a transfer from the `in` and `out` plugin configurations.
    #[must_use]
    pub fn new(input: ConfigSource, output: ConfigSource) -> Self {
        Self {
            input,
            output,
            exec: ConfigSource::new(),
        }
    }

    /// Sets the executor configuration; a `type` attribute selects an
    /// executor plugin, otherwise partitions run sequentially.
    #[must_use]
    pub fn with_exec(mut self, exec: ConfigSource) -> Self {
        self.exec = exec;
        self
    }
}

/// Result of a transfer attempt that committed every partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    executed: Vec<usize>,
    state: ResumeState,
}

impl TransferOutcome {
    /// Partitions run by this attempt, ascending.
    #[must_use]
    pub fn executed(&self) -> &[usize] {
        &self.executed
    }

    /// Final checkpoint, including reports reused from earlier attempts.
    #[must_use]
    pub const fn state(&self) -> &ResumeState {
        &self.state
    }
}

/// Runs transfers against a plugin manager and a checkpoint store.
pub struct TransferDriver<'a> {
    manager: &'a PluginManager,
    store: &'a dyn ResumeStore,
}

impl<'a> TransferDriver<'a> {
    /// Creates a driver.
    #[must_use]
    pub const fn new(manager: &'a PluginManager, store: &'a dyn ResumeStore) -> Self {
        Self { manager, store }
    }

    /// Runs or resumes the transfer checkpointed under `transaction`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] when a plugin cannot be resolved, planning
    /// fails, a partition fails, or the checkpoint cannot be persisted.
    pub fn run(
        &self,
        transaction: &str,
        spec: &TransferSpec,
    ) -> Result<TransferOutcome, TransferError> {
        let input = self.manager.input(&plugin_type_of(&spec.input)?)?;
        let output = self.manager.output(&plugin_type_of(&spec.output)?)?;

        let state = if let Some(state) = self.store.load(transaction)? {
            info!(
                target: TRANSFER_TARGET,
                transaction,
                pending_inputs = ?state.pending_inputs(),
                pending_outputs = ?state.pending_outputs(),
                "resuming transfer"
            );
            state
        } else {
            let state = plan(spec, input.as_ref(), output.as_ref())?;
            self.store.save(transaction, &state)?;
            info!(
                target: TRANSFER_TARGET,
                transaction,
                partitions = state.in_reports().len(),
                "starting transfer"
            );
            state
        };

        let (inputs, outputs) = (state.in_reports().len(), state.out_reports().len());
        if inputs != outputs {
            return Err(TransferError::PartitionMismatch {
                input: inputs,
                output: outputs,
            });
        }
        let pending: Vec<usize> = state
            .pending_inputs()
            .into_iter()
            .chain(state.pending_outputs())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let run = PartitionRun {
            transaction,
            input,
            output,
            store: self.store,
            state: Mutex::new(state),
            store_error: Mutex::new(None),
            failed: Mutex::new(Vec::new()),
        };
        let executed = self.execute(spec, &pending, &run);
        run.finish(executed)?;
        let state = run
            .state
            .into_inner()
            .map_err(|_| TransferError::LockPoisoned)?;

        self.store.remove(transaction)?;
        info!(
            target: TRANSFER_TARGET,
            transaction,
            executed = ?pending,
            "transfer committed"
        );
        Ok(TransferOutcome {
            executed: pending,
            state,
        })
    }

    fn execute(
        &self,
        spec: &TransferSpec,
        pending: &[usize],
        run: &PartitionRun<'_>,
    ) -> Result<Vec<TaskReport>, PluginError> {
        let partition = |index: usize| run.partition(index);
        if spec.exec.has(TYPE_KEY) {
            let executor = self.manager.executor(&plugin_type_of(&spec.exec)?)?;
            executor.execute(&spec.exec, pending, &partition)
        } else {
            pending.iter().map(|index| partition(*index)).collect()
        }
    }
}

/// Plans both sides and creates an empty checkpoint.
fn plan(
    spec: &TransferSpec,
    input: &dyn InputPlugin,
    output: &dyn OutputPlugin,
) -> Result<ResumeState, TransferError> {
    let input_plan = input.transaction(&spec.input)?;
    let out_task = output.transaction(&spec.output, &input_plan.schema, input_plan.partitions)?;
    let output_stage = Stage {
        task: out_task,
        schema: input_plan.schema.clone(),
        partitions: input_plan.partitions,
    };
    let input_stage = Stage {
        task: input_plan.task,
        schema: input_plan.schema,
        partitions: input_plan.partitions,
    };
    Ok(ResumeState::start(
        spec.exec.clone().into_inner(),
        input_stage,
        output_stage,
    ))
}

/// Shared state of one attempt, visible to executor threads.
struct PartitionRun<'a> {
    transaction: &'a str,
    input: Arc<dyn InputPlugin>,
    output: Arc<dyn OutputPlugin>,
    store: &'a dyn ResumeStore,
    state: Mutex<ResumeState>,
    store_error: Mutex<Option<ResumeStoreError>>,
    failed: Mutex<Vec<usize>>,
}

impl PartitionRun<'_> {
    fn lock_state(&self) -> Result<MutexGuard<'_, ResumeState>, PluginError> {
        self.state.lock().map_err(|_| PluginError::LockPoisoned {
            resource: "transfer state",
        })
    }

    fn partition(&self, index: usize) -> Result<TaskReport, PluginError> {
        self.run_partition(index).inspect_err(|error| {
            warn!(
                target: TRANSFER_TARGET,
                transaction = self.transaction,
                partition = index,
                %error,
                "partition failed"
            );
            if let Ok(mut failed) = self.failed.lock() {
                failed.push(index);
            }
        })
    }

    fn run_partition(&self, index: usize) -> Result<TaskReport, PluginError> {
        let (in_task, in_schema, out_task, out_schema) = {
            let state = self.lock_state()?;
            (
                state.in_task().clone(),
                state.in_schema().clone(),
                state.out_task().clone(),
                state.out_schema().clone(),
            )
        };
        let mut writer = self.output.open(&out_task, &out_schema, index)?;
        let in_report = self.input.run(&in_task, &in_schema, index, writer.as_mut())?;
        let out_report = writer.commit()?;

        let mut state = self.lock_state()?;
        state.commit_input(index, in_report)?;
        state.commit_output(index, out_report.clone())?;
        if let Err(error) = self.store.save(self.transaction, &state) {
            let message = error.to_string();
            if let Ok(mut slot) = self.store_error.lock() {
                slot.get_or_insert(error);
            }
            return Err(PluginError::execution("resume store", message));
        }
        debug!(
            target: TRANSFER_TARGET,
            transaction = self.transaction,
            partition = index,
            "partition committed"
        );
        Ok(out_report)
    }

    fn finish(&self, executed: Result<Vec<TaskReport>, PluginError>) -> Result<(), TransferError> {
        let Err(source) = executed else {
            return Ok(());
        };
        let mut store_error = self
            .store_error
            .lock()
            .map_err(|_| TransferError::LockPoisoned)?;
        if let Some(error) = store_error.take() {
            return Err(TransferError::Store(error));
        }
        let failed = self
            .failed
            .lock()
            .map_err(|_| TransferError::LockPoisoned)?
            .clone();
        Err(TransferError::Partitions { failed, source })
    }
}
