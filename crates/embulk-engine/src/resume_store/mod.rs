//! Persistence of [`ResumeState`] checkpoints between attempts.
//!
//! States are keyed by a transaction id chosen by the caller. The file store
//! writes `<dir>/<transaction>.json` through a temporary file in the same
//! directory, so a reader never observes a partially written checkpoint.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use embulk_spi::{ConfigError, DataSource, ResumeState};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::telemetry::targets::RESUME_STORE as RESUME_TARGET;

/// Errors raised while reading or writing checkpoints.
#[derive(Debug, Error)]
pub enum ResumeStoreError {
    /// The transaction id cannot be used as a file name.
    #[error("invalid transaction id '{id}'")]
    InvalidTransaction {
        /// Rejected id.
        id: String,
    },
    /// A checkpoint file could not be accessed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// A checkpoint could not be encoded or decoded.
    #[error("checkpoint {path} is malformed: {source}")]
    Malformed {
        /// Checkpoint location.
        path: Utf8PathBuf,
        /// Underlying decode error.
        #[source]
        source: ConfigError,
    },
    /// The in-memory store lock was poisoned.
    #[error("resume store lock poisoned")]
    LockPoisoned,
}

/// Storage for transfer checkpoints.
pub trait ResumeStore: Send + Sync {
    /// Loads the checkpoint of `transaction`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`ResumeStoreError`] when the checkpoint cannot be read.
    fn load(&self, transaction: &str) -> Result<Option<ResumeState>, ResumeStoreError>;

    /// Replaces the checkpoint of `transaction`.
    ///
    /// # Errors
    ///
    /// Returns [`ResumeStoreError`] when the checkpoint cannot be written.
    fn save(&self, transaction: &str, state: &ResumeState) -> Result<(), ResumeStoreError>;

    /// Deletes the checkpoint of `transaction`; missing checkpoints are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ResumeStoreError`] when the checkpoint cannot be removed.
    fn remove(&self, transaction: &str) -> Result<(), ResumeStoreError>;
}

/// Checks that `transaction` is usable as a file stem.
fn validate_transaction(transaction: &str) -> Result<(), ResumeStoreError> {
    let valid = !transaction.is_empty()
        && !transaction.starts_with('.')
        && transaction
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ResumeStoreError::InvalidTransaction {
            id: transaction.to_owned(),
        })
    }
}

/// Stores one JSON checkpoint per transaction in a directory.
#[derive(Debug, Clone)]
pub struct FileResumeStore {
    dir: Utf8PathBuf,
}

impl FileResumeStore {
    /// Opens a store in `location`, creating the directory when missing.
    ///
    /// # Errors
    ///
    /// Returns [`ResumeStoreError::Io`] when the directory cannot be created.
    pub fn open(location: impl Into<Utf8PathBuf>) -> Result<Self, ResumeStoreError> {
        let dir = location.into();
        fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;
        Ok(Self { dir })
    }

    /// Directory holding the checkpoints.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Path of the checkpoint of `transaction`.
    ///
    /// # Errors
    ///
    /// Returns [`ResumeStoreError::InvalidTransaction`] for ids that are not
    /// plain file stems.
    pub fn path_for(&self, transaction: &str) -> Result<Utf8PathBuf, ResumeStoreError> {
        validate_transaction(transaction)?;
        Ok(self.dir.join(format!("{transaction}.json")))
    }
}

fn io_error(path: &Utf8Path, source: io::Error) -> ResumeStoreError {
    ResumeStoreError::Io {
        path: path.to_owned(),
        source: Arc::new(source),
    }
}

fn malformed(path: &Utf8Path, source: ConfigError) -> ResumeStoreError {
    ResumeStoreError::Malformed {
        path: path.to_owned(),
        source,
    }
}

impl ResumeStore for FileResumeStore {
    fn load(&self, transaction: &str) -> Result<Option<ResumeState>, ResumeStoreError> {
        let path = self.path_for(transaction)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(io_error(&path, error)),
        };
        let source = DataSource::from_json_str(&text).map_err(|error| malformed(&path, error))?;
        let state =
            ResumeState::from_data_source(&source).map_err(|error| malformed(&path, error))?;
        debug!(
            target: RESUME_TARGET,
            transaction,
            pending_inputs = state.pending_inputs().len(),
            pending_outputs = state.pending_outputs().len(),
            "loaded resume state"
        );
        Ok(Some(state))
    }

    fn save(&self, transaction: &str, state: &ResumeState) -> Result<(), ResumeStoreError> {
        let path = self.path_for(transaction)?;
        let encoded = state
            .to_data_source()
            .and_then(|source| {
                serde_json::to_vec_pretty(&source.to_value()).map_err(ConfigError::from)
            })
            .map_err(|error| malformed(&path, error))?;
        let mut file = NamedTempFile::new_in(&self.dir).map_err(|error| io_error(&self.dir, error))?;
        file.write_all(&encoded)
            .and_then(|()| file.as_file().sync_all())
            .map_err(|error| io_error(&path, error))?;
        file.persist(&path)
            .map_err(|error| io_error(&path, error.error))?;
        debug!(target: RESUME_TARGET, transaction, %path, "saved resume state");
        Ok(())
    }

    fn remove(&self, transaction: &str) -> Result<(), ResumeStoreError> {
        let path = self.path_for(transaction)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(target: RESUME_TARGET, transaction, %path, "removed resume state");
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(io_error(&path, error)),
        }
    }
}

/// Keeps checkpoints in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryResumeStore {
    states: Mutex<HashMap<String, ResumeState>>,
}

impl MemoryResumeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, ResumeState>>, ResumeStoreError> {
        self.states
            .lock()
            .map_err(|_| ResumeStoreError::LockPoisoned)
    }
}

impl ResumeStore for MemoryResumeStore {
    fn load(&self, transaction: &str) -> Result<Option<ResumeState>, ResumeStoreError> {
        Ok(self.lock()?.get(transaction).cloned())
    }

    fn save(&self, transaction: &str, state: &ResumeState) -> Result<(), ResumeStoreError> {
        validate_transaction(transaction)?;
        self.lock()?.insert(transaction.to_owned(), state.clone());
        Ok(())
    }

    fn remove(&self, transaction: &str) -> Result<(), ResumeStoreError> {
        self.lock()?.remove(transaction);
        Ok(())
    }
}
