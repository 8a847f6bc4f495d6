//! Utility helpers for converting between byte counts and human-readable sizes.

use thiserror::Error;

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeParseError {
    #[error("size `{0}` has no numeric part")]
    MissingNumber(String),
    #[error("size `{input}` uses unknown unit `{unit}`")]
    UnknownUnit { input: String, unit: String },
    #[error("size `{0}` overflows a 64-bit byte count")]
    Overflow(String),
}

/// Parse a human-readable size such as `512MB`, `1 GiB` or `2048` into bytes.
///
/// Units are binary multiples regardless of spelling (`KB` and `KiB` both mean 1024).
/// A bare number is a byte count.
pub fn parse_size(input: &str) -> Result<u64, SizeParseError> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    if digits.is_empty() {
        return Err(SizeParseError::MissingNumber(input.to_string()));
    }

    let value: u64 = digits
        .parse()
        .map_err(|_| SizeParseError::Overflow(input.to_string()))?;

    let exponent = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 1,
        "M" | "MB" | "MIB" => 2,
        "G" | "GB" | "GIB" => 3,
        "T" | "TB" | "TIB" => 4,
        "P" | "PB" | "PIB" => 5,
        other => {
            return Err(SizeParseError::UnknownUnit {
                input: input.to_string(),
                unit: other.to_string(),
            });
        }
    };

    1024u64
        .checked_pow(exponent)
        .and_then(|multiplier| value.checked_mul(multiplier))
        .ok_or_else(|| SizeParseError::Overflow(input.to_string()))
}

/// Format a byte count into IEC units (KiB, MiB, GiB, TiB) with trimmed precision.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit_index = 0;

    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        return format!("{bytes} {}", UNITS[unit_index]);
    }

    let formatted = if value >= 10.0 {
        format!("{value:.1}")
    } else {
        format!("{value:.2}")
    };
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');

    format!("{trimmed} {}", UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_accepts_common_spellings() {
        assert_eq!(parse_size("2048"), Ok(2048));
        assert_eq!(parse_size("1KB"), Ok(1024));
        assert_eq!(parse_size("50MB"), Ok(50 * 1024 * 1024));
        assert_eq!(parse_size(" 2 gib "), Ok(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("7b"), Ok(7));
    }

    #[test]
    fn parse_size_rejects_garbage() {
        assert!(matches!(
            parse_size("MB"),
            Err(SizeParseError::MissingNumber(_))
        ));
        assert!(matches!(
            parse_size("10 parsecs"),
            Err(SizeParseError::UnknownUnit { .. })
        ));
        assert!(matches!(
            parse_size("99999999999PB"),
            Err(SizeParseError::Overflow(_))
        ));
    }

    #[test]
    fn format_bytes_scales_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1024), "1 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(50 * 1024 * 1024), "50 MiB");
    }
}
