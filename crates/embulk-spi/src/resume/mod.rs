//! Checkpoint of a partially completed transfer.
//!
//! A [`ResumeState`] is persisted between attempts. Each report slot is
//! either a committed [`TaskReport`] or `null`; a `null` slot marks a
//! partition that must run again. Slot lists always keep their full length,
//! so the partition count survives a round trip.

use serde::{Deserialize, Serialize};

use crate::data_source::{DataSource, TaskReport, TaskSource};
use crate::error::ConfigError;
use crate::schema::Schema;

/// Task, schema, and partition count of one side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Dumped task of the plugin on this side.
    pub task: TaskSource,
    /// Schema produced or consumed on this side.
    pub schema: Schema,
    /// Number of partitions.
    pub partitions: usize,
}

/// Partition-level progress of a transfer.
///
/// # Example
///
/// ```
/// use embulk_spi::{DataSource, ResumeState, Schema, Stage, TaskSource};
///
/// let stage = |partitions| Stage {
///     task: TaskSource::new(),
///     schema: Schema::default(),
///     partitions,
/// };
/// let mut state = ResumeState::start(DataSource::new(), stage(3), stage(3));
/// state.commit_input(1, DataSource::new().into_report()).expect("in range");
/// assert_eq!(state.pending_inputs(), vec![0, 2]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    exec_task: DataSource,
    in_task: TaskSource,
    out_task: TaskSource,
    in_schema: Schema,
    out_schema: Schema,
    in_reports: Vec<Option<TaskReport>>,
    out_reports: Vec<Option<TaskReport>>,
}

impl ResumeState {
    /// Creates a state in which no partition has committed.
    #[must_use]
    pub fn start(exec_task: DataSource, input: Stage, output: Stage) -> Self {
        Self {
            exec_task,
            in_task: input.task,
            out_task: output.task,
            in_schema: input.schema,
            out_schema: output.schema,
            in_reports: vec![None; input.partitions],
            out_reports: vec![None; output.partitions],
        }
    }

    /// Executor task shared by both sides.
    #[must_use]
    pub const fn exec_task(&self) -> &DataSource {
        &self.exec_task
    }

    /// Dumped input task.
    #[must_use]
    pub const fn in_task(&self) -> &TaskSource {
        &self.in_task
    }

    /// Dumped output task.
    #[must_use]
    pub const fn out_task(&self) -> &TaskSource {
        &self.out_task
    }

    /// Schema produced by the input.
    #[must_use]
    pub const fn in_schema(&self) -> &Schema {
        &self.in_schema
    }

    /// Schema consumed by the output.
    #[must_use]
    pub const fn out_schema(&self) -> &Schema {
        &self.out_schema
    }

    /// Input report slots in partition order.
    #[must_use]
    pub fn in_reports(&self) -> &[Option<TaskReport>] {
        &self.in_reports
    }

    /// Output report slots in partition order.
    #[must_use]
    pub fn out_reports(&self) -> &[Option<TaskReport>] {
        &self.out_reports
    }

    /// Records the report of a committed input partition.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PartitionOutOfRange`] for an unknown partition.
    pub fn commit_input(&mut self, index: usize, report: TaskReport) -> Result<(), ConfigError> {
        commit(&mut self.in_reports, index, report, "input")
    }

    /// Records the report of a committed output partition.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PartitionOutOfRange`] for an unknown partition.
    pub fn commit_output(&mut self, index: usize, report: TaskReport) -> Result<(), ConfigError> {
        commit(&mut self.out_reports, index, report, "output")
    }

    /// Input partitions that still have to run.
    #[must_use]
    pub fn pending_inputs(&self) -> Vec<usize> {
        pending(&self.in_reports)
    }

    /// Output partitions that still have to run.
    #[must_use]
    pub fn pending_outputs(&self) -> Vec<usize> {
        pending(&self.out_reports)
    }

    /// Returns `true` once every partition on both sides has committed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.in_reports.iter().chain(&self.out_reports).all(Option::is_some)
    }

    /// Encodes the state as a structured value with the fixed checkpoint keys.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] if encoding fails.
    pub fn to_data_source(&self) -> Result<DataSource, ConfigError> {
        DataSource::from_value(serde_json::to_value(self)?)
    }

    /// Decodes a state previously produced by [`Self::to_data_source`].
    ///
    /// Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] when a required key is missing or has the
    /// wrong shape.
    pub fn from_data_source(source: &DataSource) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(source.to_value())?)
    }
}

fn commit(
    slots: &mut [Option<TaskReport>],
    index: usize,
    report: TaskReport,
    side: &'static str,
) -> Result<(), ConfigError> {
    let count = slots.len();
    let slot = slots
        .get_mut(index)
        .ok_or(ConfigError::PartitionOutOfRange { index, count, side })?;
    *slot = Some(report);
    Ok(())
}

fn pending(slots: &[Option<TaskReport>]) -> Vec<usize> {
    slots
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| slot.is_none().then_some(index))
        .collect()
}
