//! Plugin categories and their assignability rules.
//!
//! Every plugin implements exactly one [`CapabilityKind`]. Kinds map to a
//! *category* used for naming: the file-scoped kinds share the `input` and
//! `output` categories with their full counterparts, so a name registered in
//! one category identifies one plugin regardless of its scope.

use serde::{Deserialize, Serialize};

/// Kind of capability a plugin provides.
///
/// # Example
///
/// ```
/// use embulk_plugins::CapabilityKind;
///
/// assert_eq!(CapabilityKind::FileInput.category(), "input");
/// assert!(CapabilityKind::Input.accepts(CapabilityKind::FileInput));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Reads records for each partition.
    Input,
    /// Writes records for each partition.
    Output,
    /// Transforms records between input and output.
    Filter,
    /// Turns bytes into records.
    Parser,
    /// Turns records into bytes.
    Formatter,
    /// Transforms bytes after reading, e.g. decompression.
    Decoder,
    /// Transforms bytes before writing, e.g. compression.
    Encoder,
    /// Suggests configuration from sample data.
    Guess,
    /// Schedules partitions.
    Executor,
    /// Reads whole files for each partition.
    FileInput,
    /// Writes whole files for each partition.
    FileOutput,
}

impl CapabilityKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Input,
        Self::Output,
        Self::Filter,
        Self::Parser,
        Self::Formatter,
        Self::Decoder,
        Self::Encoder,
        Self::Guess,
        Self::Executor,
        Self::FileInput,
        Self::FileOutput,
    ];

    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Filter => "filter",
            Self::Parser => "parser",
            Self::Formatter => "formatter",
            Self::Decoder => "decoder",
            Self::Encoder => "encoder",
            Self::Guess => "guess",
            Self::Executor => "executor",
            Self::FileInput => "file_input",
            Self::FileOutput => "file_output",
        }
    }

    /// Returns the naming category, folding file-scoped kinds into `input`
    /// and `output`.
    #[must_use]
    pub const fn category(self) -> &'static str {
        match self {
            Self::Input | Self::FileInput => "input",
            Self::Output | Self::FileOutput => "output",
            other => other.as_str(),
        }
    }

    /// Returns `true` for the file-scoped kinds.
    #[must_use]
    pub const fn is_file_scoped(self) -> bool {
        matches!(self, Self::FileInput | Self::FileOutput)
    }

    /// Returns `true` when a plugin of kind `provided` can serve a request
    /// for this kind, directly or through a file adapter.
    #[must_use]
    pub const fn accepts(self, provided: Self) -> bool {
        matches!(
            (self, provided),
            (Self::Input, Self::FileInput) | (Self::Output, Self::FileOutput)
        ) || self as u8 == provided as u8
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests;
