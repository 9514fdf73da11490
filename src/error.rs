//! Error types for trace generation.
//!
//! Every failure the library can report is a [`GenError`]. Failures raised by a
//! [`RecordWriter`](crate::output::RecordWriter) are wrapped as
//! [`GenError::Sink`] so the caller always sees the underlying cause.

use thiserror::Error;

use crate::output::SinkError;

/// Errors surfaced by size parsing, planning, encoding, synthesis and emission.
#[derive(Debug, Error)]
pub enum GenError {
    /// The size string could not be split into a number and a known unit.
    #[error("InvalidSizeFormat: {reason} (input {input:?})")]
    InvalidSizeFormat { input: String, reason: String },

    /// The record geometry would make size planning undefined.
    #[error("InvalidLayout: {reason}")]
    InvalidLayout { reason: String },

    /// Round-robin synthesis was asked to cycle over no tasks.
    #[error("EmptyTaskList: round-robin schedule needs at least one task")]
    EmptyTaskList,

    /// The alternating policy was given something other than two tasks.
    #[error("PairNeedsTwoTasks: alternating schedule needs exactly 2 tasks, got {got}")]
    PairNeedsTwoTasks { got: usize },

    /// A zero period over a non-empty window never reaches the end timestamp.
    #[error("ZeroPeriod: schedule period must be non-zero")]
    ZeroPeriod,

    /// A payload character does not fit a signed 8-bit cell.
    #[error("UnencodableCharacter: {ch:?} in field {field} is outside the signed 8-bit range")]
    UnencodableCharacter { ch: char, field: String },

    /// A millisecond timestamp overflows when scaled to nanoseconds.
    #[error("TimestampOverflow: {ms} ms does not fit in a nanosecond timestamp")]
    TimestampOverflow { ms: u64 },

    /// The trace writer rejected an operation.
    #[error("SinkFailure: {0}")]
    Sink(#[from] SinkError),

    /// The config file could not be read or parsed.
    #[error("Config: {path}: {reason}")]
    Config { path: String, reason: String },
}

impl GenError {
    pub(crate) fn invalid_size(input: &str, reason: impl Into<String>) -> Self {
        GenError::InvalidSizeFormat {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
