//! In-memory [`RecordWriter`].

use super::{EventKind, EventKindId, Record, RecordWriter, SinkError};

/// Keeps every declared kind and appended record. Records are checked against
/// their kind exactly like a file writer would.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    kinds: Vec<EventKind>,
    records: Vec<Record>,
    flushes: usize,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(&self) -> &[EventKind] {
        &self.kinds
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Number of `flush` calls so far, including the one made by `close`.
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Declared kind of `record`.
    pub fn kind_of(&self, record: &Record) -> Option<&EventKind> {
        self.kinds.get(record.kind.0 as usize)
    }
}

impl RecordWriter for MemoryWriter {
    fn declare_event_kind(&mut self, kind: &EventKind) -> Result<EventKindId, SinkError> {
        if let Some(pos) = self.kinds.iter().position(|k| k == kind) {
            return Ok(EventKindId(pos as u32));
        }
        self.kinds.push(kind.clone());
        Ok(EventKindId(self.kinds.len() as u32 - 1))
    }

    fn append_record(&mut self, record: &Record) -> Result<(), SinkError> {
        let kind = self
            .kinds
            .get(record.kind.0 as usize)
            .ok_or(SinkError::UndeclaredKind(record.kind))?;
        kind.check(record)?;
        self.records.push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.flushes += 1;
        Ok(())
    }

    fn close(mut self) -> Result<(), SinkError> {
        self.flush()
    }
}
