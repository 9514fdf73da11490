//! Intermediate data structures for trace output
//!
//! These types describe records independently of the container format. Writers
//! convert them to whatever their format needs.

use std::fmt;

use super::SinkError;

/// Field holding the payload of a `dummy` record.
pub const DUMMY_FIELD: &str = "dummy_field";

/// Linux `TASK_COMM_LEN`: width of the task name fields of `sched_switch`.
pub const TASK_COMM_LEN: u32 = 16;

/// Handle returned by [`RecordWriter::declare_event_kind`](super::RecordWriter::declare_event_kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKindId(pub u32);

impl fmt::Display for EventKindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Storage type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Fixed number of signed 8-bit character cells.
    CharArray { width: u32 },
    SignedInt { bits: u8 },
    UnsignedInt { bits: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDecl {
    pub name: String,
    pub ty: FieldType,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Declaration of one kind of record: its name and ordered fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKind {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

impl EventKind {
    /// The filler event: a single character array of `width` cells.
    pub fn dummy(width: u32) -> Self {
        Self {
            name: "dummy".to_string(),
            fields: vec![FieldDecl::new(DUMMY_FIELD, FieldType::CharArray { width })],
        }
    }

    /// A context switch on one CPU.
    pub fn sched_switch() -> Self {
        let comm = FieldType::CharArray {
            width: TASK_COMM_LEN,
        };
        let tid = FieldType::SignedInt { bits: 32 };
        Self {
            name: "sched_switch".to_string(),
            fields: vec![
                FieldDecl::new("prev_comm", comm),
                FieldDecl::new("prev_tid", tid),
                FieldDecl::new("next_comm", comm),
                FieldDecl::new("next_tid", tid),
            ],
        }
    }

    /// Check that `record` carries exactly this kind's fields, in order, with
    /// values that fit the declared types.
    pub fn check(&self, record: &Record) -> Result<(), SinkError> {
        let mismatch = |reason: String| SinkError::FieldMismatch {
            kind: self.name.clone(),
            reason,
        };

        if record.fields.len() != self.fields.len() {
            return Err(mismatch(format!(
                "expected {} fields, got {}",
                self.fields.len(),
                record.fields.len()
            )));
        }

        for (decl, field) in self.fields.iter().zip(&record.fields) {
            if decl.name != field.name {
                return Err(mismatch(format!(
                    "expected field {}, got {}",
                    decl.name, field.name
                )));
            }
            let fits = match (decl.ty, &field.value) {
                (FieldType::CharArray { width }, FieldValue::CharArray(cells)) => {
                    cells.len() == width as usize
                }
                (FieldType::SignedInt { bits }, FieldValue::Int(v)) => match bits {
                    0 => false,
                    64.. => true,
                    _ => *v >= -(1i64 << (bits - 1)) && *v < (1i64 << (bits - 1)),
                },
                (FieldType::UnsignedInt { bits }, FieldValue::Uint(v)) => {
                    bits >= 64 || *v < (1u64 << bits)
                }
                _ => false,
            };
            if !fits {
                return Err(mismatch(format!(
                    "value {:?} does not fit {} ({:?})",
                    field.value, decl.name, decl.ty
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    CharArray(Vec<u8>),
    Int(i64),
    Uint(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordField {
    pub name: String,
    pub value: FieldValue,
}

impl RecordField {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// One record as handed to a writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: EventKindId,
    pub cpu: u32,
    /// Nanoseconds.
    pub ts: u64,
    pub fields: Vec<RecordField>,
}

impl Record {
    /// Value of the field called `name`, if present.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }
}
