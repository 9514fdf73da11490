//! tracegen library - synthetic kernel trace generation.
//!
//! This library builds traces of a requested size out of identical filler
//! records, optionally followed by a synthesized context switch timeline, and
//! writes them through a pluggable [`RecordWriter`].
//!
//! # Modules
//!
//! - [`size`] - Human readable size strings
//! - [`layout`] - Record geometry and trace size planning
//! - [`payload`] - Fixed width character array encoding
//! - [`sched`] - Context switch timeline synthesis
//! - [`output`] - Record writer abstraction
//! - [`perfetto`] - Perfetto protobuf writer
//! - [`session`] - Emission loop driving a writer
//! - [`config`] - Run configuration
//!
//! # Example
//!
//! ```
//! use tracegen::{generate, Config, MemoryWriter};
//!
//! let mut writer = MemoryWriter::new();
//! let report = generate(&Config::default(), &mut writer).unwrap();
//! assert_eq!(report.size.rounded_size, 32768);
//! assert_eq!(writer.records().len() as u64, report.dummy_records);
//! ```

pub mod config;
pub mod error;
pub mod layout;
pub mod output;
pub mod payload;
pub mod perfetto;
pub mod sched;
pub mod session;
pub mod size;

// Re-export for convenience
pub use config::{Config, ScheduleConfig};
pub use error::GenError;
pub use layout::{plan, round_up, RecordLayout, TraceSizePlan};
pub use output::{MemoryWriter, RecordWriter, SinkError};
pub use perfetto::{PerfettoWriter, TRACE_FILE_NAME};
pub use sched::{Schedule, ScheduleEvent, SchedulePolicy, Task};
pub use session::{generate, prepare, run, GenerationReport, Session};
pub use size::{format_size, parse_size};
