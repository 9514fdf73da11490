//! Perfetto protobuf [`RecordWriter`].
//!
//! A Perfetto trace is a stream of length-delimited `TracePacket`s (field 1 of
//! the `Trace` message), so packets can be appended as records arrive instead of
//! building the whole `Trace` in memory. The first packet is a clock snapshot.
//! Records are grouped into `FtraceEventBundle`s: one bundle is pending at a
//! time and it is written out when the CPU changes, when it is full, and on
//! flush, so the file keeps the order records were appended in.
//!
//! `sched_switch` records become native `SchedSwitchFtraceEvent`s so the trace
//! opens as a scheduling timeline. Every other kind becomes a
//! `GenericFtraceEvent` carrying the kind name and its fields.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use perfetto_protos::builtin_clock::BuiltinClock;
use perfetto_protos::clock_snapshot::clock_snapshot::Clock;
use perfetto_protos::clock_snapshot::ClockSnapshot;
use perfetto_protos::ftrace_event::FtraceEvent;
use perfetto_protos::ftrace_event_bundle::FtraceEventBundle;
use perfetto_protos::generic::generic_ftrace_event::Field as GenericField;
use perfetto_protos::generic::GenericFtraceEvent;
use perfetto_protos::sched::SchedSwitchFtraceEvent;
use perfetto_protos::trace_packet::TracePacket;
use protobuf::rt::compute_raw_varint64_size;
use protobuf::Message;
use tracing::debug;

use crate::config::Config;
use crate::error::GenError;
use crate::layout::{round_up, RecordLayout};
use crate::output::{
    EventKind, EventKindId, FieldValue, Record, RecordField, RecordWriter, SinkError, DUMMY_FIELD,
};
use crate::payload::{char_array_to_string, encode_char_array};
use crate::session::ms_to_ns;
use crate::size::parse_size;

/// Name of the trace file inside the output directory.
pub const TRACE_FILE_NAME: &str = "trace.pb";

/// Events per `FtraceEventBundle` before it is written out.
const BUNDLE_FLUSH_THRESHOLD: usize = 4096;

/// Field 1 (`Trace.packet`), wire type 2 (length-delimited).
const TRACE_PACKET_TAG: u8 = (1 << 3) | 2;

/// Everything is written from one sequence.
const SEQUENCE_ID: u32 = 1;

/// Kernel priority of a nice 0 task.
const DEFAULT_PRIO: i32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    SchedSwitch,
    Generic,
}

struct DeclaredKind {
    kind: EventKind,
    encoding: Encoding,
}

struct PendingBundle {
    cpu: u32,
    events: Vec<FtraceEvent>,
}

pub struct PerfettoWriter<W: Write> {
    out: W,
    kinds: Vec<DeclaredKind>,
    bundle: Option<PendingBundle>,
    packets: u64,
    events: u64,
}

impl PerfettoWriter<BufWriter<File>> {
    /// Create `dir/trace.pb`. `dir` must already exist.
    pub fn create(dir: &Path) -> Result<Self, SinkError> {
        if !dir.is_dir() {
            return Err(SinkError::OutputDir {
                path: dir.display().to_string(),
            });
        }
        let path = dir.join(TRACE_FILE_NAME);
        let file = File::create(&path).map_err(|source| SinkError::Create {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "created trace file");
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> PerfettoWriter<W> {
    /// Start a trace on `out` by writing its clock snapshot.
    pub fn new(out: W) -> Result<Self, SinkError> {
        let mut writer = Self {
            out,
            kinds: Vec::new(),
            bundle: None,
            packets: 0,
            events: 0,
        };

        writer.write_packet(&clock_snapshot_packet())?;
        Ok(writer)
    }

    pub fn packets_written(&self) -> u64 {
        self.packets
    }

    pub fn events_written(&self) -> u64 {
        self.events
    }

    /// Flush everything and hand back the underlying output.
    pub fn finish(mut self) -> Result<W, SinkError> {
        self.flush()?;
        debug!(
            packets = self.packets,
            events = self.events,
            "finished perfetto trace"
        );
        Ok(self.out)
    }

    fn write_packet(&mut self, packet: &TracePacket) -> Result<(), SinkError> {
        let mut buf = vec![TRACE_PACKET_TAG];
        packet.write_length_delimited_to_vec(&mut buf)?;
        self.out.write_all(&buf)?;
        self.packets += 1;
        Ok(())
    }

    fn flush_bundle(&mut self) -> Result<(), SinkError> {
        let Some(pending) = self.bundle.take() else {
            return Ok(());
        };
        let count = pending.events.len() as u64;

        let mut bundle = FtraceEventBundle::default();
        bundle.set_cpu(pending.cpu);
        bundle.event = pending.events;
        let mut packet = TracePacket::default();
        packet.set_ftrace_events(bundle);
        packet.set_trusted_packet_sequence_id(SEQUENCE_ID);
        self.write_packet(&packet)?;

        self.events += count;
        Ok(())
    }
}

impl<W: Write> RecordWriter for PerfettoWriter<W> {
    fn declare_event_kind(&mut self, kind: &EventKind) -> Result<EventKindId, SinkError> {
        if let Some(pos) = self.kinds.iter().position(|d| d.kind == *kind) {
            return Ok(EventKindId(pos as u32));
        }
        let encoding = if *kind == EventKind::sched_switch() {
            Encoding::SchedSwitch
        } else {
            Encoding::Generic
        };
        debug!(kind = %kind.name, ?encoding, "declared event kind");
        self.kinds.push(DeclaredKind {
            kind: kind.clone(),
            encoding,
        });
        Ok(EventKindId(self.kinds.len() as u32 - 1))
    }

    fn append_record(&mut self, record: &Record) -> Result<(), SinkError> {
        let declared = self
            .kinds
            .get(record.kind.0 as usize)
            .ok_or(SinkError::UndeclaredKind(record.kind))?;
        declared.kind.check(record)?;
        let event = match declared.encoding {
            Encoding::SchedSwitch => sched_switch_event(record),
            Encoding::Generic => generic_event(&declared.kind.name, record),
        };

        if self.bundle.as_ref().is_some_and(|b| b.cpu != record.cpu) {
            self.flush_bundle()?;
        }
        let bundle = self.bundle.get_or_insert_with(|| PendingBundle {
            cpu: record.cpu,
            events: Vec::new(),
        });
        bundle.events.push(event);
        if bundle.events.len() >= BUNDLE_FLUSH_THRESHOLD {
            self.flush_bundle()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.flush_bundle()?;
        self.out.flush()?;
        Ok(())
    }

    fn close(self) -> Result<(), SinkError> {
        self.finish().map(drop)
    }
}

fn clock_snapshot_packet() -> TracePacket {
    let mut clock_snapshot = ClockSnapshot::default();
    clock_snapshot.set_primary_trace_clock(BuiltinClock::BUILTIN_CLOCK_BOOTTIME);
    let mut clock = Clock::default();
    clock.set_clock_id(BuiltinClock::BUILTIN_CLOCK_BOOTTIME as u32);
    clock.set_timestamp(0);
    clock_snapshot.clocks.push(clock);

    let mut packet = TracePacket::default();
    packet.set_clock_snapshot(clock_snapshot);
    packet.set_trusted_packet_sequence_id(SEQUENCE_ID);
    packet
}

/// Bytes a length-delimited field of `len` bytes takes, with its one byte tag.
fn framed_size(len: u64) -> u64 {
    1 + compute_raw_varint64_size(len) + len
}

/// On-disk sizes of a trace holding only identical filler events on CPU 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FillerSizes {
    /// One event inside its bundle.
    event: u64,
    /// The clock snapshot packet.
    snapshot: u64,
    /// `FtraceEventBundle.cpu`.
    cpu_field: u64,
    /// `TracePacket.trusted_packet_sequence_id`.
    sequence_field: u64,
}

impl FillerSizes {
    fn measure(name: &str, record: &Record) -> Self {
        let mut bundle = FtraceEventBundle::default();
        bundle.set_cpu(record.cpu);
        let mut packet = TracePacket::default();
        packet.set_trusted_packet_sequence_id(SEQUENCE_ID);

        Self {
            event: framed_size(generic_event(name, record).compute_size()),
            snapshot: framed_size(clock_snapshot_packet().compute_size()),
            cpu_field: bundle.compute_size(),
            sequence_field: packet.compute_size(),
        }
    }

    /// A bundle packet holding `events` events.
    fn bundle_bytes(&self, events: u64) -> u64 {
        let bundle = self
            .cpu_field
            .saturating_add(events.saturating_mul(self.event));
        framed_size(framed_size(bundle).saturating_add(self.sequence_field))
    }

    /// The whole file for `records` events, bundled the way the writer does.
    fn trace_bytes(&self, records: u64) -> u64 {
        let threshold = BUNDLE_FLUSH_THRESHOLD as u64;
        let full = (records / threshold).saturating_mul(self.bundle_bytes(threshold));
        let rest = match records % threshold {
            0 => 0,
            n => self.bundle_bytes(n),
        };
        self.snapshot.saturating_add(full).saturating_add(rest)
    }
}

/// Record geometry of the filler records [`PerfettoWriter`] writes for
/// `config`.
///
/// The header size is the encoded event minus its payload width, and the
/// packet header covers the clock snapshot and the bundle framing, so that
/// `plan` picks the largest record count whose file still fits the rounded
/// size. The payload width and the alignment boundary come from
/// `config.layout`.
pub fn filler_layout(config: &Config) -> Result<RecordLayout, GenError> {
    let base = config.layout;
    let width = base.payload_width();
    let kind = EventKind::dummy(width);
    let record = Record {
        kind: EventKindId(0),
        cpu: 0,
        ts: ms_to_ns(config.timestamp_ms)?,
        fields: vec![RecordField::new(
            DUMMY_FIELD,
            FieldValue::CharArray(encode_char_array(&config.payload, width as usize, DUMMY_FIELD)?),
        )],
    };
    let sizes = FillerSizes::measure(&kind.name, &record);

    let header_size = sizes
        .event
        .checked_sub(u64::from(width))
        .and_then(|h| u32::try_from(h).ok())
        .ok_or_else(|| GenError::InvalidLayout {
            reason: format!(
                "payload width {width} exceeds the {} bytes of an encoded record",
                sizes.event
            ),
        })?;

    let requested = parse_size(&config.size)?;
    let rounded = round_up(requested, &base).ok_or_else(|| {
        GenError::invalid_size(
            &config.size,
            "size rounded up to the packet boundary does not fit in 64 bits",
        )
    })?;

    // Largest record count whose file fits.
    let (mut lo, mut hi) = (0, rounded / sizes.event);
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if sizes.trace_bytes(mid) <= rounded {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    let records = lo;

    // Enough to make plan() stop at `records` even when the framing of one more
    // record would still fit.
    let overhead = sizes.trace_bytes(records) - records * sizes.event;
    let slack = rounded
        .saturating_sub(records.saturating_add(1).saturating_mul(sizes.event))
        .saturating_add(1);
    let packet_header_size = overhead.max(slack);
    debug!(
        event = sizes.event,
        packet_header_size, records, "measured perfetto filler layout"
    );

    RecordLayout::new(
        header_size,
        width,
        packet_header_size,
        base.alignment_boundary(),
    )
}

fn sched_switch_event(record: &Record) -> FtraceEvent {
    let mut switch = SchedSwitchFtraceEvent::default();
    switch.set_prev_prio(DEFAULT_PRIO);
    switch.set_next_prio(DEFAULT_PRIO);
    // Preempted, still runnable.
    switch.set_prev_state(0);

    for field in &record.fields {
        match (field.name.as_str(), &field.value) {
            ("prev_comm", FieldValue::CharArray(cells)) => {
                switch.set_prev_comm(char_array_to_string(cells))
            }
            ("next_comm", FieldValue::CharArray(cells)) => {
                switch.set_next_comm(char_array_to_string(cells))
            }
            // The kind check already bounded both tids to 32 bits.
            ("prev_tid", FieldValue::Int(tid)) => switch.set_prev_pid(*tid as i32),
            ("next_tid", FieldValue::Int(tid)) => switch.set_next_pid(*tid as i32),
            _ => {}
        }
    }

    let mut event = FtraceEvent::default();
    event.set_timestamp(record.ts);
    event.set_pid(switch.prev_pid() as u32);
    event.set_sched_switch(switch);
    event
}

fn generic_event(name: &str, record: &Record) -> FtraceEvent {
    let mut generic = GenericFtraceEvent::default();
    generic.set_event_name(name.to_string());
    for field in &record.fields {
        let mut out = GenericField::default();
        out.set_name(field.name.clone());
        match &field.value {
            FieldValue::CharArray(cells) => out.set_str_value(char_array_to_string(cells)),
            FieldValue::Int(v) => out.set_int_value(*v),
            FieldValue::Uint(v) => out.set_uint_value(*v),
        }
        generic.field.push(out);
    }

    let mut event = FtraceEvent::default();
    event.set_timestamp(record.ts);
    event.set_pid(0);
    event.set_generic(generic);
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::plan;
    use perfetto_protos::trace::Trace;

    fn dummy_record(kind: EventKindId, cpu: u32, ts: u64) -> Record {
        Record {
            kind,
            cpu,
            ts,
            fields: vec![RecordField::new(
                DUMMY_FIELD,
                FieldValue::CharArray(b"hi\0\0\0".to_vec()),
            )],
        }
    }

    fn switch_record(kind: EventKindId, ts: u64) -> Record {
        let comm = |s: &str| {
            let mut cells = s.as_bytes().to_vec();
            cells.resize(16, 0);
            FieldValue::CharArray(cells)
        };
        Record {
            kind,
            cpu: 2,
            ts,
            fields: vec![
                RecordField::new("prev_comm", comm("swapper/2")),
                RecordField::new("prev_tid", FieldValue::Int(0)),
                RecordField::new("next_comm", comm("prog")),
                RecordField::new("next_tid", FieldValue::Int(42)),
            ],
        }
    }

    fn decode(bytes: &[u8]) -> Trace {
        Trace::parse_from_bytes(bytes).unwrap()
    }

    #[test]
    fn test_starts_with_clock_snapshot() {
        let writer = PerfettoWriter::new(Vec::new()).unwrap();
        assert_eq!(writer.packets_written(), 1);
        let trace = decode(&writer.finish().unwrap());
        assert_eq!(trace.packet.len(), 1);
        assert!(trace.packet[0].has_clock_snapshot());
        assert_eq!(
            trace.packet[0].clock_snapshot().clocks[0].clock_id(),
            BuiltinClock::BUILTIN_CLOCK_BOOTTIME as u32
        );
    }

    #[test]
    fn test_generic_events() {
        let mut writer = PerfettoWriter::new(Vec::new()).unwrap();
        let kind = writer.declare_event_kind(&EventKind::dummy(5)).unwrap();
        for i in 0..3 {
            writer.append_record(&dummy_record(kind, 0, 1000 + i)).unwrap();
        }
        let trace = decode(&writer.finish().unwrap());

        assert_eq!(trace.packet.len(), 2);
        let bundle = trace.packet[1].ftrace_events();
        assert_eq!(bundle.cpu(), 0);
        assert_eq!(bundle.event.len(), 3);
        for (i, event) in bundle.event.iter().enumerate() {
            assert_eq!(event.timestamp(), 1000 + i as u64);
            assert!(event.has_generic());
            let generic = event.generic();
            assert_eq!(generic.event_name(), "dummy");
            assert_eq!(generic.field.len(), 1);
            assert_eq!(generic.field[0].name(), DUMMY_FIELD);
            assert_eq!(generic.field[0].str_value(), "hi");
        }
    }

    #[test]
    fn test_sched_switch_events() {
        let mut writer = PerfettoWriter::new(Vec::new()).unwrap();
        let kind = writer.declare_event_kind(&EventKind::sched_switch()).unwrap();
        writer.append_record(&switch_record(kind, 5000)).unwrap();
        let trace = decode(&writer.finish().unwrap());

        let bundle = trace.packet[1].ftrace_events();
        assert_eq!(bundle.cpu(), 2);
        let event = &bundle.event[0];
        assert!(event.has_sched_switch());
        let switch = event.sched_switch();
        assert_eq!(switch.prev_comm(), "swapper/2");
        assert_eq!(switch.prev_pid(), 0);
        assert_eq!(switch.next_comm(), "prog");
        assert_eq!(switch.next_pid(), 42);
        assert_eq!(event.timestamp(), 5000);
    }

    #[test]
    fn test_cpu_change_starts_new_bundle() {
        let mut writer = PerfettoWriter::new(Vec::new()).unwrap();
        let kind = writer.declare_event_kind(&EventKind::dummy(5)).unwrap();
        writer.append_record(&dummy_record(kind, 0, 1)).unwrap();
        writer.append_record(&dummy_record(kind, 1, 2)).unwrap();
        writer.append_record(&dummy_record(kind, 0, 3)).unwrap();
        let trace = decode(&writer.finish().unwrap());

        let cpus: Vec<u32> = trace.packet[1..]
            .iter()
            .map(|p| p.ftrace_events().cpu())
            .collect();
        assert_eq!(cpus, vec![0, 1, 0]);
        let ts: Vec<u64> = trace.packet[1..]
            .iter()
            .flat_map(|p| p.ftrace_events().event.iter().map(|e| e.timestamp()))
            .collect();
        assert_eq!(ts, vec![1, 2, 3]);
    }

    #[test]
    fn test_full_bundle_is_written() {
        let mut writer = PerfettoWriter::new(Vec::new()).unwrap();
        let kind = writer.declare_event_kind(&EventKind::dummy(5)).unwrap();
        for i in 0..BUNDLE_FLUSH_THRESHOLD as u64 + 1 {
            writer.append_record(&dummy_record(kind, 0, i)).unwrap();
        }
        assert_eq!(writer.packets_written(), 2);
        assert_eq!(writer.events_written(), BUNDLE_FLUSH_THRESHOLD as u64);

        let trace = decode(&writer.finish().unwrap());
        assert_eq!(trace.packet.len(), 3);
        assert_eq!(trace.packet[2].ftrace_events().event.len(), 1);
    }

    #[test]
    fn test_rejects_undeclared_and_mismatched_records() {
        let mut writer = PerfettoWriter::new(Vec::new()).unwrap();
        assert!(matches!(
            writer.append_record(&dummy_record(EventKindId(7), 0, 0)),
            Err(SinkError::UndeclaredKind(EventKindId(7)))
        ));

        let kind = writer.declare_event_kind(&EventKind::dummy(20)).unwrap();
        assert!(matches!(
            writer.append_record(&dummy_record(kind, 0, 0)),
            Err(SinkError::FieldMismatch { .. })
        ));
    }

    #[test]
    fn test_redeclaring_returns_same_id() {
        let mut writer = PerfettoWriter::new(Vec::new()).unwrap();
        let a = writer.declare_event_kind(&EventKind::dummy(5)).unwrap();
        let b = writer.declare_event_kind(&EventKind::sched_switch()).unwrap();
        let c = writer.declare_event_kind(&EventKind::dummy(5)).unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
    }

    #[test]
    fn test_create_requires_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            PerfettoWriter::create(&missing),
            Err(SinkError::OutputDir { .. })
        ));

        let writer = PerfettoWriter::create(dir.path()).unwrap();
        writer.close().unwrap();
        let bytes = std::fs::read(dir.path().join(TRACE_FILE_NAME)).unwrap();
        assert_eq!(decode(&bytes).packet.len(), 1);
    }

    fn filler_record(config: &Config) -> Record {
        let width = config.layout.payload_width();
        let cells = encode_char_array(&config.payload, width as usize, DUMMY_FIELD).unwrap();
        Record {
            kind: EventKindId(0),
            cpu: 0,
            ts: ms_to_ns(config.timestamp_ms).unwrap(),
            fields: vec![RecordField::new(DUMMY_FIELD, FieldValue::CharArray(cells))],
        }
    }

    fn write_fillers(config: &Config, records: u64) -> Vec<u8> {
        let mut writer = PerfettoWriter::new(Vec::new()).unwrap();
        let kind = writer
            .declare_event_kind(&EventKind::dummy(config.layout.payload_width()))
            .unwrap();
        let record = Record {
            kind,
            ..filler_record(config)
        };
        for _ in 0..records {
            writer.append_record(&record).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_filler_sizes_match_written_bytes() {
        let config = Config::default();
        let sizes = FillerSizes::measure("dummy", &filler_record(&config));
        for records in [0, 1, 17, BUNDLE_FLUSH_THRESHOLD as u64, 5000] {
            let bytes = write_fillers(&config, records);
            assert_eq!(bytes.len() as u64, sizes.trace_bytes(records), "{records} records");
        }
    }

    #[test]
    fn test_filler_layout_fits_rounded_size() {
        for size in ["32k", "100k", "1m"] {
            let config = Config {
                size: size.to_string(),
                ..Config::default()
            };
            let layout = filler_layout(&config).unwrap();
            assert_eq!(layout.payload_width(), config.layout.payload_width());
            assert_eq!(layout.alignment_boundary(), config.layout.alignment_boundary());

            let plan = plan(parse_size(size).unwrap(), &layout);
            let len = write_fillers(&config, plan.record_count).len() as u64;
            assert!(len <= plan.rounded_size, "{size}: {len} bytes");
            assert!(
                plan.rounded_size - len < layout.record_size(),
                "{size}: {len} bytes for {}",
                plan.rounded_size
            );
        }
    }

    #[test]
    fn test_filler_layout_small_size() {
        let config = Config {
            size: "0".to_string(),
            ..Config::default()
        };
        let layout = filler_layout(&config).unwrap();
        assert_eq!(plan(0, &layout).record_count, 0);
    }

    #[test]
    fn test_filler_layout_rejects_oversized_width() {
        let config = Config {
            payload: String::new(),
            layout: RecordLayout::new(12, 4096, 64, 32768).unwrap(),
            ..Config::default()
        };
        assert!(matches!(
            filler_layout(&config),
            Err(GenError::InvalidLayout { .. })
        ));
    }
}
