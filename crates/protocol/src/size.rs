//! Quota size strings and human-readable byte formatting.
//!
//! Quotas are configured as `<integer><unit>` with the unit one of `MB`,
//! `GB` or `TB` (binary multiples). An empty string means "unlimited" and
//! parses to `0`.

use crate::error::{ProtocolError, Result};

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;

/// Units used by [`format_size`], smallest first.
const DISPLAY_UNITS: &[&str] = &["KB", "MB", "GB", "TB", "PB", "EB"];

/// Parse a quota size string such as `"500MB"` or `"2 GB"` into bytes.
///
/// Returns `0` for an empty or whitespace-only string.
pub fn parse_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }

    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(digits_end);

    if number.is_empty() {
        return Err(ProtocolError::InvalidSize(format!(
            "{input:?} does not start with a number"
        )));
    }

    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "MB" => MIB,
        "GB" => GIB,
        "TB" => TIB,
        "" => {
            return Err(ProtocolError::InvalidSize(format!(
                "{input:?} is missing a unit (MB, GB or TB)"
            )))
        }
        other => {
            return Err(ProtocolError::InvalidSize(format!(
                "unknown unit {other:?} in {input:?}"
            )))
        }
    };

    let value: u64 = number
        .parse()
        .map_err(|_| ProtocolError::InvalidSize(format!("{input:?} is out of range")))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| ProtocolError::InvalidSize(format!("{input:?} is out of range")))
}

/// Render a byte count for display, e.g. `"500.00 KB"` or `"1.00 GB"`.
///
/// Values below 1024 are shown as whole bytes (`"512 B"`). Larger values use
/// the largest unit in which the value is at least `1.00`.
pub fn format_size(bytes: u64) -> String {
    if bytes < KIB {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / KIB as f64;
    let mut unit = 0;
    // Compare the rounded value so 1023.999 KB carries over to 1.00 MB.
    while round2(value) >= KIB as f64 && unit < DISPLAY_UNITS.len() - 1 {
        value /= KIB as f64;
        unit += 1;
    }

    format!("{:.2} {}", value, DISPLAY_UNITS[unit])
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
