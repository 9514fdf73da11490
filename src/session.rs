//! Generation sessions.
//!
//! A [`Session`] owns one [`RecordWriter`] for the length of a run. It drives the
//! filler loop and the synthesized schedule through that writer, and it always
//! releases the writer: [`Session::finish`] flushes and closes it, and dropping
//! an unfinished session (early return, failed emission) closes it too.
//!
//! [`prepare`] validates a [`Config`] without touching any output, and [`run`]
//! executes a prepared plan against a writer.

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::GenError;
use crate::layout::{plan, round_up, RecordLayout, TraceSizePlan};
use crate::output::{
    EventKind, FieldValue, Record, RecordField, RecordWriter, SinkError, DUMMY_FIELD,
    TASK_COMM_LEN,
};
use crate::payload::encode_char_array;
use crate::sched::{Schedule, ScheduleEvent};
use crate::size::parse_size;

/// Record timestamps are given in milliseconds and stored in nanoseconds.
pub const NSEC_PER_MSEC: u64 = 1_000_000;

/// Scale a millisecond timestamp to nanoseconds.
pub fn ms_to_ns(ms: u64) -> Result<u64, GenError> {
    ms.checked_mul(NSEC_PER_MSEC)
        .ok_or(GenError::TimestampOverflow { ms })
}

pub struct Session<W: RecordWriter> {
    writer: Option<W>,
    records_written: u64,
}

impl<W: RecordWriter> Session<W> {
    pub fn open(writer: W) -> Self {
        Self {
            writer: Some(writer),
            records_written: 0,
        }
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Append `plan.record_count` identical `dummy` records carrying `payload`
    /// at `ts_ms`. Returns the number of records written.
    pub fn emit_fill(
        &mut self,
        plan: &TraceSizePlan,
        layout: &RecordLayout,
        payload: &str,
        ts_ms: u64,
    ) -> Result<u64, GenError> {
        let ts = ms_to_ns(ts_ms)?;
        let width = layout.payload_width();
        let cells = encode_char_array(payload, width as usize, DUMMY_FIELD)?;

        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        let kind = writer.declare_event_kind(&EventKind::dummy(width))?;
        let record = Record {
            kind,
            cpu: 0,
            ts,
            fields: vec![RecordField::new(DUMMY_FIELD, FieldValue::CharArray(cells))],
        };

        debug!(records = plan.record_count, ts, "emitting dummy records");
        for _ in 0..plan.record_count {
            writer.append_record(&record)?;
            self.records_written += 1;
        }
        Ok(plan.record_count)
    }

    /// Append one `sched_switch` record per event. Returns the number written.
    pub fn emit_schedule<I>(&mut self, events: I) -> Result<u64, GenError>
    where
        I: IntoIterator<Item = ScheduleEvent>,
    {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        let kind = writer.declare_event_kind(&EventKind::sched_switch())?;

        let mut written = 0;
        for event in events {
            let record = Record {
                kind,
                cpu: event.cpu_id,
                ts: ms_to_ns(event.timestamp)?,
                fields: vec![
                    comm_field("prev_comm", &event.task_out.name)?,
                    RecordField::new("prev_tid", FieldValue::Int(event.task_out.id.into())),
                    comm_field("next_comm", &event.task_in.name)?,
                    RecordField::new("next_tid", FieldValue::Int(event.task_in.id.into())),
                ],
            };
            writer.append_record(&record)?;
            self.records_written += 1;
            written += 1;
        }
        debug!(records = written, "emitted sched_switch records");
        Ok(written)
    }

    /// Close the writer, which flushes whatever it still buffers.
    pub fn finish(mut self) -> Result<u64, GenError> {
        let writer = self.writer.take().ok_or(SinkError::Closed)?;
        writer.close()?;
        Ok(self.records_written)
    }
}

impl<W: RecordWriter> Drop for Session<W> {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            debug!(
                records = self.records_written,
                "closing writer of unfinished session"
            );
            if let Err(e) = writer.close() {
                warn!("Failed to close trace writer: {e}");
            }
        }
    }
}

fn comm_field(name: &str, comm: &str) -> Result<RecordField, GenError> {
    let cells = encode_char_array(comm, TASK_COMM_LEN as usize, name)?;
    Ok(RecordField::new(name, FieldValue::CharArray(cells)))
}

/// A validated run: everything that can fail on bad input has already failed.
#[derive(Debug, Clone)]
pub struct GenerationPlan {
    pub layout: RecordLayout,
    pub size: TraceSizePlan,
    /// None when the filler loop is disabled.
    pub fill: Option<FillPlan>,
    pub schedule: Option<Schedule>,
}

#[derive(Debug, Clone)]
pub struct FillPlan {
    pub payload: String,
    pub timestamp_ms: u64,
}

/// What a run wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationReport {
    pub size: TraceSizePlan,
    pub dummy_records: u64,
    pub schedule_records: u64,
}

/// Validate `config` and compute the plan without creating any output.
pub fn prepare(config: &Config) -> Result<GenerationPlan, GenError> {
    let requested = parse_size(&config.size)?;
    if round_up(requested, &config.layout).is_none() {
        return Err(GenError::invalid_size(
            &config.size,
            "size rounded up to the packet boundary does not fit in 64 bits",
        ));
    }
    let size = plan(requested, &config.layout);
    debug!(
        requested = size.requested_size,
        rounded = size.rounded_size,
        records = size.record_count,
        "planned trace size"
    );

    let fill = if config.fill {
        encode_char_array(
            &config.payload,
            config.layout.payload_width() as usize,
            DUMMY_FIELD,
        )?;
        ms_to_ns(config.timestamp_ms)?;
        Some(FillPlan {
            payload: config.payload.clone(),
            timestamp_ms: config.timestamp_ms,
        })
    } else {
        None
    };

    let schedule = match &config.schedule {
        Some(sched) => {
            for task in &sched.tasks {
                encode_char_array(&task.name, TASK_COMM_LEN as usize, "prev_comm")?;
            }
            // Every event is earlier than the end of the window.
            ms_to_ns(sched.end_ms)?;
            Some(sched.synthesize()?)
        }
        None => None,
    };

    Ok(GenerationPlan {
        layout: config.layout,
        size,
        fill,
        schedule,
    })
}

/// Execute `plan` against `writer`, releasing the writer whatever happens.
pub fn run<W: RecordWriter>(plan: GenerationPlan, writer: W) -> Result<GenerationReport, GenError> {
    let mut session = Session::open(writer);

    let dummy_records = match &plan.fill {
        Some(fill) => {
            session.emit_fill(&plan.size, &plan.layout, &fill.payload, fill.timestamp_ms)?
        }
        None => 0,
    };
    let schedule_records = match plan.schedule {
        Some(schedule) => session.emit_schedule(schedule)?,
        None => 0,
    };

    session.finish()?;
    info!(dummy_records, schedule_records, "trace generation complete");

    Ok(GenerationReport {
        size: plan.size,
        dummy_records,
        schedule_records,
    })
}

/// [`prepare`] then [`run`].
pub fn generate<W: RecordWriter>(config: &Config, writer: W) -> Result<GenerationReport, GenError> {
    run(prepare(config)?, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScheduleConfig;
    use crate::output::{EventKindId, MemoryWriter};
    use crate::sched::{synthesize_pair, SchedulePolicy, Task};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Accepts `limit` records, then fails every append. Remembers whether it
    /// was closed.
    struct FailingWriter {
        limit: u64,
        appended: u64,
        closed: Rc<Cell<bool>>,
    }

    impl RecordWriter for FailingWriter {
        fn declare_event_kind(&mut self, _kind: &EventKind) -> Result<EventKindId, SinkError> {
            Ok(EventKindId(0))
        }

        fn append_record(&mut self, _record: &Record) -> Result<(), SinkError> {
            if self.appended == self.limit {
                return Err(SinkError::Io(std::io::Error::other("disk full")));
            }
            self.appended += 1;
            Ok(())
        }

        fn flush(&mut self) -> Result<(), SinkError> {
            Ok(())
        }

        fn close(self) -> Result<(), SinkError> {
            self.closed.set(true);
            Ok(())
        }
    }

    fn small_plan(record_count: u64) -> TraceSizePlan {
        TraceSizePlan {
            requested_size: 0,
            rounded_size: 0,
            record_count,
        }
    }

    #[test]
    fn test_ms_to_ns() {
        assert_eq!(ms_to_ns(1393345613900).unwrap(), 1_393_345_613_900_000_000);
        assert!(matches!(
            ms_to_ns(u64::MAX / 1000),
            Err(GenError::TimestampOverflow { .. })
        ));
    }

    #[test]
    fn test_emit_fill_writes_record_count() {
        let mut mem = MemoryWriter::new();
        let layout = RecordLayout::default();
        let mut session = Session::open(&mut mem);
        let n = session
            .emit_fill(&small_plan(5), &layout, "overenthusiastically", 1000)
            .unwrap();
        assert_eq!(n, 5);
        assert_eq!(session.finish().unwrap(), 5);

        assert_eq!(mem.records().len(), 5);
        assert_eq!(mem.kinds(), &[EventKind::dummy(20)]);
        assert_eq!(mem.flushes(), 1);
        for record in mem.records() {
            assert_eq!(record.ts, 1_000_000_000);
            assert_eq!(
                record.field(DUMMY_FIELD),
                Some(&FieldValue::CharArray(b"overenthusiastically".to_vec()))
            );
        }
    }

    #[test]
    fn test_emit_fill_zero_records() {
        let mut mem = MemoryWriter::new();
        let mut session = Session::open(&mut mem);
        let n = session
            .emit_fill(&small_plan(0), &RecordLayout::default(), "x", 0)
            .unwrap();
        assert_eq!(n, 0);
        session.finish().unwrap();
        assert!(mem.records().is_empty());
    }

    #[test]
    fn test_emit_fill_bad_payload_writes_nothing() {
        let mut mem = MemoryWriter::new();
        let mut session = Session::open(&mut mem);
        let err = session
            .emit_fill(&small_plan(3), &RecordLayout::default(), "na\u{ef}ve", 0)
            .unwrap_err();
        assert!(matches!(err, GenError::UnencodableCharacter { ch: '\u{ef}', .. }));
        drop(session);
        assert!(mem.kinds().is_empty());
        assert!(mem.records().is_empty());
    }

    #[test]
    fn test_failed_emission_still_closes_writer() {
        let closed = Rc::new(Cell::new(false));
        let writer = FailingWriter {
            limit: 3,
            appended: 0,
            closed: closed.clone(),
        };
        let mut session = Session::open(writer);
        let err = session
            .emit_fill(&small_plan(10), &RecordLayout::default(), "x", 0)
            .unwrap_err();
        assert!(matches!(err, GenError::Sink(SinkError::Io(_))));
        assert_eq!(session.records_written(), 3);
        assert!(!closed.get());
        drop(session);
        assert!(closed.get());
    }

    #[test]
    fn test_run_closes_writer_on_failure() {
        let closed = Rc::new(Cell::new(false));
        let writer = FailingWriter {
            limit: 0,
            appended: 0,
            closed: closed.clone(),
        };
        let plan = prepare(&Config::default()).unwrap();
        assert!(run(plan, writer).is_err());
        assert!(closed.get());
    }

    #[test]
    fn test_emit_schedule() {
        let mut mem = MemoryWriter::new();
        let events = synthesize_pair(
            0,
            300,
            1,
            100,
            Task::new("swapper/1", 0),
            Task::new("prog50pc-cpu1", 30665),
        )
        .unwrap();
        let mut session = Session::open(&mut mem);
        assert_eq!(session.emit_schedule(events).unwrap(), 3);
        session.finish().unwrap();

        let records = mem.records();
        assert_eq!(records.len(), 3);
        assert_eq!(mem.kind_of(&records[0]), Some(&EventKind::sched_switch()));
        assert_eq!(records[1].ts, 100 * NSEC_PER_MSEC);
        assert_eq!(records[1].cpu, 1);
        assert_eq!(records[0].field("next_tid"), Some(&FieldValue::Int(30665)));
        assert_eq!(records[1].field("prev_tid"), Some(&FieldValue::Int(30665)));
        let mut comm = b"swapper/1".to_vec();
        comm.resize(16, 0);
        assert_eq!(records[1].field("next_comm"), Some(&FieldValue::CharArray(comm)));
    }

    #[test]
    fn test_long_task_names_are_truncated() {
        let mut mem = MemoryWriter::new();
        let events = synthesize_pair(
            0,
            100,
            0,
            100,
            Task::new("a-very-long-task-name", 1),
            Task::new("b", 2),
        )
        .unwrap();
        let mut session = Session::open(&mut mem);
        session.emit_schedule(events).unwrap();
        session.finish().unwrap();
        assert_eq!(
            mem.records()[0].field("prev_comm"),
            Some(&FieldValue::CharArray(b"a-very-long-task".to_vec()))
        );
    }

    #[test]
    fn test_prepare_rejects_before_output() {
        let config = Config {
            size: "1 2 KB".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            prepare(&config),
            Err(GenError::InvalidSizeFormat { .. })
        ));

        let config = Config {
            schedule: Some(ScheduleConfig {
                policy: SchedulePolicy::RoundRobin,
                tasks: Vec::new(),
                ..ScheduleConfig::default()
            }),
            ..Config::default()
        };
        assert!(matches!(prepare(&config), Err(GenError::EmptyTaskList)));

        let config = Config {
            payload: "\u{2603}".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            prepare(&config),
            Err(GenError::UnencodableCharacter { .. })
        ));
    }

    #[test]
    fn test_prepare_rejects_unroundable_size() {
        let config = Config {
            size: u64::MAX.to_string(),
            ..Config::default()
        };
        match prepare(&config) {
            Err(GenError::InvalidSizeFormat { input, .. }) => assert_eq!(input, config.size),
            other => panic!("expected InvalidSizeFormat, got {other:?}"),
        }

        // The largest aligned size still plans.
        let largest = u64::MAX - u64::MAX % 32768;
        let config = Config {
            size: largest.to_string(),
            fill: false,
            ..Config::default()
        };
        let plan = prepare(&config).unwrap();
        assert_eq!(plan.size.rounded_size, largest);
    }

    #[test]
    fn test_prepare_names_comm_field() {
        let config = Config {
            schedule: Some(ScheduleConfig {
                tasks: vec![Task::new("swapper/0", 0), Task::new("t\u{e9}che", 1)],
                ..ScheduleConfig::default()
            }),
            ..Config::default()
        };
        match prepare(&config) {
            Err(GenError::UnencodableCharacter { ch, field }) => {
                assert_eq!(ch, '\u{e9}');
                assert_eq!(field, "prev_comm");
            }
            other => panic!("expected UnencodableCharacter, got {other:?}"),
        }
    }

    #[test]
    fn test_finish_flushes_once() {
        let mut mem = MemoryWriter::new();
        let session = Session::open(&mut mem);
        session.finish().unwrap();
        assert_eq!(mem.flushes(), 1);
    }

    #[test]
    fn test_generate_default_config() {
        let mut mem = MemoryWriter::new();
        let report = generate(&Config::default(), &mut mem).unwrap();
        assert_eq!(report.size.rounded_size, 32768);
        assert_eq!(report.dummy_records, 1022);
        assert_eq!(report.schedule_records, 0);
        assert_eq!(mem.records().len(), 1022);
    }

    #[test]
    fn test_generate_schedule_only() {
        let mut mem = MemoryWriter::new();
        let config = Config {
            fill: false,
            schedule: Some(ScheduleConfig {
                policy: SchedulePolicy::RoundRobin,
                tasks: vec![Task::new("prog1", 10), Task::new("prog2", 11)],
                start_ms: 0,
                end_ms: 1000,
                period_ms: 100,
                cpu: 4,
            }),
            ..Config::default()
        };
        let report = generate(&config, &mut mem).unwrap();
        assert_eq!(report.dummy_records, 0);
        assert_eq!(report.schedule_records, 10);
        assert!(mem.records().iter().all(|r| r.cpu == 4));
    }
}
