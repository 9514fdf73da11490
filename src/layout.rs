//! Record geometry and trace size planning.
//!
//! A trace is one packet header followed by fixed size records, and the total
//! size is always a multiple of the alignment boundary. The defaults describe a
//! CTF stream with a single `dummy` event class: a 12 byte event header (id +
//! timestamp), a 20 byte character array, a 64 byte packet header and 32 KiB
//! packets.

use serde::{Deserialize, Serialize};

use crate::error::GenError;

pub const DEFAULT_HEADER_SIZE: u32 = 12;
pub const DEFAULT_PAYLOAD_WIDTH: u32 = 20;
pub const DEFAULT_PACKET_HEADER_SIZE: u64 = 64;
pub const DEFAULT_ALIGNMENT_BOUNDARY: u64 = 32768;

/// Byte geometry of the records in one trace. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LayoutFields")]
pub struct RecordLayout {
    header_size: u32,
    payload_width: u32,
    packet_header_size: u64,
    alignment_boundary: u64,
}

/// Unvalidated layout as it appears in a config file.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LayoutFields {
    header_size: u32,
    payload_width: u32,
    packet_header_size: u64,
    alignment_boundary: u64,
}

impl Default for LayoutFields {
    fn default() -> Self {
        Self {
            header_size: DEFAULT_HEADER_SIZE,
            payload_width: DEFAULT_PAYLOAD_WIDTH,
            packet_header_size: DEFAULT_PACKET_HEADER_SIZE,
            alignment_boundary: DEFAULT_ALIGNMENT_BOUNDARY,
        }
    }
}

impl TryFrom<LayoutFields> for RecordLayout {
    type Error = GenError;

    fn try_from(fields: LayoutFields) -> Result<Self, Self::Error> {
        RecordLayout::new(
            fields.header_size,
            fields.payload_width,
            fields.packet_header_size,
            fields.alignment_boundary,
        )
    }
}

impl RecordLayout {
    pub fn new(
        header_size: u32,
        payload_width: u32,
        packet_header_size: u64,
        alignment_boundary: u64,
    ) -> Result<Self, GenError> {
        if header_size == 0 && payload_width == 0 {
            return Err(GenError::InvalidLayout {
                reason: "record size must be non-zero".to_string(),
            });
        }
        if alignment_boundary == 0 {
            return Err(GenError::InvalidLayout {
                reason: "alignment boundary must be non-zero".to_string(),
            });
        }
        Ok(Self {
            header_size,
            payload_width,
            packet_header_size,
            alignment_boundary,
        })
    }

    pub fn header_size(&self) -> u32 {
        self.header_size
    }

    pub fn payload_width(&self) -> u32 {
        self.payload_width
    }

    pub fn packet_header_size(&self) -> u64 {
        self.packet_header_size
    }

    pub fn alignment_boundary(&self) -> u64 {
        self.alignment_boundary
    }

    /// Bytes taken by one record: header plus payload.
    pub fn record_size(&self) -> u64 {
        u64::from(self.header_size) + u64::from(self.payload_width)
    }
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self {
            header_size: DEFAULT_HEADER_SIZE,
            payload_width: DEFAULT_PAYLOAD_WIDTH,
            packet_header_size: DEFAULT_PACKET_HEADER_SIZE,
            alignment_boundary: DEFAULT_ALIGNMENT_BOUNDARY,
        }
    }
}

/// How many records fill a requested trace size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceSizePlan {
    pub requested_size: u64,
    /// Smallest multiple of the alignment boundary that is >= `requested_size`.
    pub rounded_size: u64,
    pub record_count: u64,
}

impl TraceSizePlan {
    /// True when the requested size was not already aligned.
    pub fn was_rounded(&self) -> bool {
        self.rounded_size != self.requested_size
    }

    /// Bytes the layout accounts for: packet header plus every record.
    pub fn payload_bytes(&self, layout: &RecordLayout) -> u64 {
        layout.packet_header_size() + self.record_count * layout.record_size()
    }
}

/// Smallest multiple of the alignment boundary that is >= `requested`, or None
/// when it does not fit in a `u64`.
pub fn round_up(requested: u64, layout: &RecordLayout) -> Option<u64> {
    let boundary = layout.alignment_boundary();
    match requested % boundary {
        0 => Some(requested),
        rem => requested.checked_add(boundary - rem),
    }
}

/// Round `requested` up to the alignment boundary and count the records that
/// fit after the packet header.
///
/// Never fails. A size smaller than the packet header yields zero records.
/// Requests whose next boundary does not fit in a `u64` saturate at the largest
/// aligned `u64`; check them with [`round_up`] first.
pub fn plan(requested: u64, layout: &RecordLayout) -> TraceSizePlan {
    let boundary = layout.alignment_boundary();
    let rounded_size = round_up(requested, layout).unwrap_or(u64::MAX - u64::MAX % boundary);

    let record_count = rounded_size
        .checked_sub(layout.packet_header_size())
        .map_or(0, |room| room / layout.record_size());

    TraceSizePlan {
        requested_size: requested,
        rounded_size,
        record_count,
    }
}
