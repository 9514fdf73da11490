//! Output format abstraction layer
//!
//! The generator never encodes a trace container itself. It declares the event
//! kinds it is going to emit and then hands records, one at a time, to a
//! [`RecordWriter`]. The writer owns the container format: metadata, packet
//! framing and the on-disk encoding.
//!
//! # Implementations
//!
//! - [`PerfettoWriter`](crate::perfetto::PerfettoWriter): Perfetto protobuf trace file
//! - [`MemoryWriter`]: keeps every record in memory, used by tests

mod memory;
mod types;

pub use memory::MemoryWriter;
pub use types::*;

use thiserror::Error;

/// Failures reported by a [`RecordWriter`].
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("output directory {path} does not exist or is not a directory")]
    OutputDir { path: String },

    #[error("cannot create {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding failed: {0}")]
    Encode(#[from] protobuf::Error),

    #[error("event kind {0} was never declared")]
    UndeclaredKind(EventKindId),

    #[error("record does not match event kind {kind}: {reason}")]
    FieldMismatch { kind: String, reason: String },

    #[error("writer is already closed")]
    Closed,
}

/// Sink for generated records.
///
/// Records must be appended in the order they are produced; writers keep that
/// order in their output.
pub trait RecordWriter {
    /// Register an event kind and return the id records of that kind carry.
    fn declare_event_kind(&mut self, kind: &EventKind) -> Result<EventKindId, SinkError>;

    /// Append one record of a previously declared kind.
    fn append_record(&mut self, record: &Record) -> Result<(), SinkError>;

    /// Push any buffered records to the output.
    fn flush(&mut self) -> Result<(), SinkError>;

    /// Flush and release the output.
    fn close(self) -> Result<(), SinkError>
    where
        Self: Sized;
}

/// A borrowed writer stays open when the borrow is closed; closing only
/// flushes it and the owner releases it later.
impl<W: RecordWriter + ?Sized> RecordWriter for &mut W {
    fn declare_event_kind(&mut self, kind: &EventKind) -> Result<EventKindId, SinkError> {
        (**self).declare_event_kind(kind)
    }

    fn append_record(&mut self, record: &Record) -> Result<(), SinkError> {
        (**self).append_record(record)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }

    fn close(self) -> Result<(), SinkError> {
        (*self).flush()
    }
}
