//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::Path;

use perfetto_protos::trace::Trace;
use protobuf::Message;

/// Decode the `trace.pb` written into `dir`.
pub fn read_trace(dir: &Path) -> Trace {
    let bytes = std::fs::read(dir.join(tracegen::TRACE_FILE_NAME)).expect("Failed to read trace");
    Trace::parse_from_bytes(&bytes).expect("Failed to decode trace")
}

/// Counts of the events in `trace`, split by kind.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub generic: u64,
    pub sched_switch: u64,
}

pub fn count_events(trace: &Trace) -> EventCounts {
    let mut counts = EventCounts::default();
    for packet in &trace.packet {
        if !packet.has_ftrace_events() {
            continue;
        }
        for event in &packet.ftrace_events().event {
            if event.has_generic() {
                counts.generic += 1;
            } else if event.has_sched_switch() {
                counts.sched_switch += 1;
            } else {
                panic!("unexpected event {event:?}");
            }
        }
    }
    counts
}
