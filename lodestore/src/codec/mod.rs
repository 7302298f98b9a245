//! Bidirectional coercion between raw property bytes, canonical strings,
//! and typed values. The byte encodings are fixed for interop: integers are
//! 4-byte little-endian int32, decimals 8-byte IEEE-754 doubles, dates
//! 8-byte little-endian tick counts (100-ns units since 0001-01-01 UTC),
//! switches a single 0x00/0x01 byte, and everything textual is raw UTF-8.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Declared type of a property, supplied by the schema per context.
/// Closed set: every coercion and match rule dispatches exhaustively on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropKind {
    Integer,
    Decimal,
    Date,
    Switch,
    Text,
    Options,
    Complex,
}

impl PropKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropKind::Integer => "integer",
            PropKind::Decimal => "decimal",
            PropKind::Date => "date",
            PropKind::Switch => "switch",
            PropKind::Text => "text",
            PropKind::Options => "options",
            PropKind::Complex => "complex",
        }
    }
}

/// Digits kept when rendering a decimal property as text.
pub const DEFAULT_DECIMAL_DIGITS: u32 = 4;

/// Ticks are 100-ns units counted from 0001-01-01T00:00:00 UTC.
/// This is the tick value at the Unix epoch.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
pub const TICKS_PER_SECOND: i64 = 10_000_000;

// ── Bytes → string ───────────────────────────────────────────────

/// Render raw property bytes as their canonical string form for the
/// declared kind. Never fails: undecodable bytes render as an empty string.
pub fn render(kind: PropKind, bytes: &[u8]) -> String {
    match kind {
        PropKind::Integer => decode_i64(bytes).map(|v| v.to_string()).unwrap_or_default(),
        PropKind::Decimal => render_decimal(bytes, DEFAULT_DECIMAL_DIGITS),
        PropKind::Date => decode_ticks(bytes).map(|v| v.to_string()).unwrap_or_default(),
        PropKind::Switch => {
            if decode_switch(bytes) {
                "true".into()
            } else {
                "false".into()
            }
        }
        PropKind::Text | PropKind::Options | PropKind::Complex => {
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Render a decimal property rounded to the given digit count.
/// Trailing zeros are not kept: 120.5000 renders as "120.5".
pub fn render_decimal(bytes: &[u8], digits: u32) -> String {
    match decode_f64(bytes) {
        Some(v) => {
            let scale = 10f64.powi(digits as i32);
            let rounded = (v * scale).round() / scale;
            format!("{rounded}")
        }
        None => String::new(),
    }
}

// ── String → bytes ───────────────────────────────────────────────

/// Parse an externally supplied string into the byte encoding for the
/// declared kind. A non-parseable numeric string yields an empty byte
/// sequence rather than an error: it becomes a value that will never equal
/// any valid numeric property.
pub fn parse(kind: PropKind, value: &str) -> Vec<u8> {
    match kind {
        PropKind::Integer => value
            .trim()
            .parse::<i32>()
            .map(|v| v.to_le_bytes().to_vec())
            .unwrap_or_default(),
        PropKind::Decimal => value
            .trim()
            .parse::<f64>()
            .map(|v| v.to_le_bytes().to_vec())
            .unwrap_or_default(),
        PropKind::Date => value
            .trim()
            .parse::<i64>()
            .map(|v| v.to_le_bytes().to_vec())
            .unwrap_or_default(),
        PropKind::Switch => match value.trim().to_ascii_lowercase().as_str() {
            "true" => vec![1],
            "false" => vec![0],
            _ => Vec::new(),
        },
        PropKind::Text | PropKind::Options | PropKind::Complex => value.as_bytes().to_vec(),
    }
}

// ── Typed decode helpers ─────────────────────────────────────────
// Shared by the match compiler and the index translation so both sides
// agree bit-for-bit on what stored bytes mean.

/// Decode an integer property. Accepts the 4-byte int32 encoding or an
/// 8-byte value interpreted as int64. Empty bytes decode as 0.
pub fn decode_i64(bytes: &[u8]) -> Option<i64> {
    match bytes.len() {
        0 => Some(0),
        4 => Some(i32::from_le_bytes(bytes.try_into().ok()?) as i64),
        8 => Some(i64::from_le_bytes(bytes.try_into().ok()?)),
        _ => None,
    }
}

/// Decode a decimal property. An 8-byte buffer is an IEEE-754 double; a
/// 4-byte buffer is an int32 reinterpreted as a double, for data that was
/// written as integer and later redeclared decimal.
pub fn decode_f64(bytes: &[u8]) -> Option<f64> {
    match bytes.len() {
        8 => Some(f64::from_le_bytes(bytes.try_into().ok()?)),
        4 => Some(i32::from_le_bytes(bytes.try_into().ok()?) as f64),
        _ => None,
    }
}

/// Decode a date property as a 64-bit tick count. 4- and 8-byte inputs are
/// both accepted.
pub fn decode_ticks(bytes: &[u8]) -> Option<i64> {
    match bytes.len() {
        4 => Some(i32::from_le_bytes(bytes.try_into().ok()?) as i64),
        8 => Some(i64::from_le_bytes(bytes.try_into().ok()?)),
        _ => None,
    }
}

/// Decode a switch property. Empty bytes decode as false.
pub fn decode_switch(bytes: &[u8]) -> bool {
    bytes.first().map(|b| *b != 0).unwrap_or(false)
}

// ── Typed encode helpers ─────────────────────────────────────────

pub fn encode_i32(value: i32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn encode_f64(value: f64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn encode_ticks(value: i64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn encode_switch(value: bool) -> Vec<u8> {
    vec![u8::from(value)]
}

// ── Tick conversion ──────────────────────────────────────────────

/// Convert a chrono datetime to the date type's tick representation.
pub fn ticks_from_datetime(dt: DateTime<Utc>) -> i64 {
    UNIX_EPOCH_TICKS + dt.timestamp() * TICKS_PER_SECOND + (dt.timestamp_subsec_nanos() as i64) / 100
}

/// Convert a tick count back to a chrono datetime. Returns None for tick
/// counts outside chrono's representable range.
pub fn datetime_from_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    let unix_ticks = ticks - UNIX_EPOCH_TICKS;
    let secs = unix_ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (unix_ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn integer_round_trip() {
        let bytes = parse(PropKind::Integer, "120");
        assert_eq!(bytes, 120i32.to_le_bytes().to_vec());
        assert_eq!(render(PropKind::Integer, &bytes), "120");

        let negative = parse(PropKind::Integer, "-42");
        assert_eq!(render(PropKind::Integer, &negative), "-42");
    }

    #[test]
    fn integer_empty_bytes_render_zero() {
        assert_eq!(render(PropKind::Integer, &[]), "0");
    }

    #[test]
    fn integer_eight_byte_encoding_accepted() {
        let bytes = 3_000_000_000i64.to_le_bytes().to_vec();
        assert_eq!(render(PropKind::Integer, &bytes), "3000000000");
    }

    #[test]
    fn integer_unparseable_becomes_empty() {
        assert_eq!(parse(PropKind::Integer, "not a number"), Vec::<u8>::new());
    }

    #[test]
    fn decimal_round_trip_within_rounding() {
        let bytes = parse(PropKind::Decimal, "3.25");
        assert_eq!(bytes, 3.25f64.to_le_bytes().to_vec());
        assert_eq!(render(PropKind::Decimal, &bytes), "3.25");
    }

    #[test]
    fn decimal_renders_rounded_to_four_digits() {
        let bytes = encode_f64(1.000049);
        assert_eq!(render(PropKind::Decimal, &bytes), "1");

        let bytes = encode_f64(2.71828);
        assert_eq!(render(PropKind::Decimal, &bytes), "2.7183");
    }

    #[test]
    fn decimal_accepts_int32_buffer() {
        let bytes = encode_i32(95);
        assert_eq!(decode_f64(&bytes), Some(95.0));
        assert_eq!(render(PropKind::Decimal, &bytes), "95");
    }

    #[test]
    fn date_round_trip() {
        let ticks = 638_000_000_000_000_000i64;
        let bytes = parse(PropKind::Date, &ticks.to_string());
        assert_eq!(bytes, ticks.to_le_bytes().to_vec());
        assert_eq!(render(PropKind::Date, &bytes), ticks.to_string());
    }

    #[test]
    fn date_four_byte_input_accepted() {
        let bytes = 1_000i32.to_le_bytes().to_vec();
        assert_eq!(decode_ticks(&bytes), Some(1_000));
    }

    #[test]
    fn switch_round_trip_exact() {
        for v in ["true", "false"] {
            let bytes = parse(PropKind::Switch, v);
            assert_eq!(render(PropKind::Switch, &bytes), v);
        }
    }

    #[test]
    fn switch_empty_bytes_decode_false() {
        assert!(!decode_switch(&[]));
        assert_eq!(render(PropKind::Switch, &[]), "false");
    }

    #[test]
    fn text_round_trip_byte_equal() {
        for kind in [PropKind::Text, PropKind::Options, PropKind::Complex] {
            let bytes = parse(kind, "Viper Mk II");
            assert_eq!(bytes, b"Viper Mk II".to_vec());
            assert_eq!(render(kind, &bytes), "Viper Mk II");
            assert_eq!(parse(kind, &render(kind, &bytes)), bytes);
        }
    }

    #[test]
    fn tick_conversion_round_trips() {
        let dt = Utc.with_ymd_and_hms(2021, 6, 15, 12, 30, 45).unwrap();
        let ticks = ticks_from_datetime(dt);
        assert_eq!(datetime_from_ticks(ticks), Some(dt));
    }

    #[test]
    fn unix_epoch_tick_constant() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(ticks_from_datetime(epoch), UNIX_EPOCH_TICKS);
    }
}
