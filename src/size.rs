//! Human readable byte sizes.
//!
//! Sizes are a number followed by an optional unit, e.g. `42`, `32k`,
//! `1 KB`, `5 kilobyte` or `1.5 GB`. Units are binary (1 KB = 1024 bytes) and
//! only the first letter of the unit is significant.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::GenError;

/// Runs of digits and decimal points; everything between them is a unit candidate.
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9.]+").expect("Invalid number regex pattern"));

/// A size unit and the number of bytes it stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeUnit {
    /// Lowercase first letter that selects this unit.
    pub prefix: char,
    pub divider: u64,
    pub singular: &'static str,
    pub plural: &'static str,
}

/// Recognized units, largest first. Lookup takes the first unit whose prefix
/// matches, and formatting takes the first unit that fits.
pub const SIZE_UNITS: [SizeUnit; 6] = [
    SizeUnit {
        prefix: 'p',
        divider: 1 << 50,
        singular: "PB",
        plural: "PB",
    },
    SizeUnit {
        prefix: 't',
        divider: 1 << 40,
        singular: "TB",
        plural: "TB",
    },
    SizeUnit {
        prefix: 'g',
        divider: 1 << 30,
        singular: "GB",
        plural: "GB",
    },
    SizeUnit {
        prefix: 'm',
        divider: 1 << 20,
        singular: "MB",
        plural: "MB",
    },
    SizeUnit {
        prefix: 'k',
        divider: 1 << 10,
        singular: "KB",
        plural: "KB",
    },
    SizeUnit {
        prefix: 'b',
        divider: 1,
        singular: "byte",
        plural: "bytes",
    },
];

/// Find the unit selected by the first letter of `unit`.
pub fn lookup_unit(unit: &str) -> Option<&'static SizeUnit> {
    let first = unit.chars().next()?.to_ascii_lowercase();
    SIZE_UNITS.iter().find(|u| u.prefix == first)
}

/// Split `input` into number runs and the text between them, trimmed, with
/// empty fragments dropped.
fn components(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    for m in NUMBER_RE.find_iter(input) {
        parts.push(&input[last..m.start()]);
        parts.push(m.as_str());
        last = m.end();
    }
    parts.push(&input[last..]);

    parts
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a human readable size into a byte count.
///
/// A lone integer is a byte count. Anything else must be exactly a number and a
/// unit. Decimal numbers are multiplied by the unit and truncated toward zero.
///
/// ```
/// use tracegen::size::parse_size;
///
/// assert_eq!(parse_size("42").unwrap(), 42);
/// assert_eq!(parse_size("1 KB").unwrap(), 1024);
/// assert_eq!(parse_size("5 kilobyte").unwrap(), 5120);
/// assert_eq!(parse_size("1.5 GB").unwrap(), 1610612736);
/// ```
pub fn parse_size(input: &str) -> Result<u64, GenError> {
    let lowered = input.to_lowercase();
    let parts = components(&lowered);

    if let [number] = parts.as_slice() {
        if number.bytes().all(|b| b.is_ascii_digit()) {
            return number
                .parse::<u64>()
                .map_err(|_| GenError::invalid_size(input, "byte count does not fit in 64 bits"));
        }
    }

    let [number, unit] = parts.as_slice() else {
        return Err(GenError::invalid_size(
            input,
            format!("expected a number and a unit, got {parts:?}"),
        ));
    };

    let unit = lookup_unit(unit)
        .ok_or_else(|| GenError::invalid_size(input, format!("invalid disk size unit: {unit:?}")))?;

    if number.bytes().all(|b| b.is_ascii_digit()) {
        return number
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(unit.divider))
            .ok_or_else(|| GenError::invalid_size(input, "size does not fit in 64 bits"));
    }

    let value: f64 = number
        .parse()
        .map_err(|_| GenError::invalid_size(input, format!("invalid number: {number:?}")))?;
    let bytes = value * unit.divider as f64;
    // 2^64 is exactly representable as f64; anything at or above it overflows.
    if bytes >= u64::MAX as f64 {
        return Err(GenError::invalid_size(input, "size does not fit in 64 bits"));
    }
    Ok(bytes as u64)
}

/// Render a byte count using the largest unit that fits.
///
/// ```
/// use tracegen::size::format_size;
///
/// assert_eq!(format_size(1), "1 byte");
/// assert_eq!(format_size(65536), "64 KB");
/// assert_eq!(format_size(1610612736), "1.5 GB");
/// ```
pub fn format_size(bytes: u64) -> String {
    let unit = SIZE_UNITS
        .iter()
        .find(|u| bytes >= u.divider)
        .unwrap_or(&SIZE_UNITS[SIZE_UNITS.len() - 1]);

    if unit.divider == 1 {
        let label = if bytes == 1 { unit.singular } else { unit.plural };
        return format!("{bytes} {label}");
    }

    let value = bytes as f64 / unit.divider as f64;
    let mut number = format!("{value:.2}");
    if number.contains('.') {
        number = number.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    let label = if number == "1" {
        unit.singular
    } else {
        unit.plural
    };
    format!("{number} {label}")
}
