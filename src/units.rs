//! Vertical and horizontal scale settings: allowed levels, user input parsing
//! and engineering-notation display.

use crate::error::ScopeError;
use crate::scpi::{si_prefix, split_number};
use serde::{Deserialize, Serialize};

/// Volts/division settings offered in the UI, smallest first.
pub const VDIV_LEVELS: [&str; 14] = [
    "500 uV", "1 mV", "2 mV", "5 mV", "10 mV", "20 mV", "50 mV", "100 mV", "200 mV", "500 mV",
    "1 V", "2 V", "5 V", "10 V",
];

/// Time/division settings offered in the UI, smallest first.
pub const TDIV_LEVELS: [&str; 34] = [
    "1 ns", "2 ns", "5 ns", "10 ns", "20 ns", "50 ns", "100 ns", "200 ns", "500 ns", "1 us",
    "2 us", "5 us", "10 us", "20 us", "50 us", "100 us", "200 us", "500 us", "1 ms", "2 ms",
    "5 ms", "10 ms", "20 ms", "50 ms", "100 ms", "200 ms", "500 ms", "1 s", "2 s", "5 s", "10 s",
    "20 s", "50 s", "100 s",
];

/// `TDIV_LEVELS` in seconds.
pub const TDIV_SECONDS: [f64; 34] = [
    1e-9, 2e-9, 5e-9, 10e-9, 20e-9, 50e-9, 100e-9, 200e-9, 500e-9, 1e-6, 2e-6, 5e-6, 10e-6,
    20e-6, 50e-6, 100e-6, 200e-6, 500e-6, 1e-3, 2e-3, 5e-3, 10e-3, 20e-3, 50e-3, 100e-3, 200e-3,
    500e-3, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0,
];

pub const VDIV_MIN: f64 = 500e-6;
pub const VDIV_MAX: f64 = 10.0;
pub const TDIV_MIN: f64 = 1e-9;
pub const TDIV_MAX: f64 = 100.0;

/// Relative slack so that "10 V" typed as 10.000000001 is still in range.
const RANGE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Volt,
    Second,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Volt => "V",
            Unit::Second => "s",
        }
    }
}

/// Parse user input such as `"2V"`, `"500 mV"`, `"1 ms"` or a bare `"0.002"`.
///
/// A bare number is taken in base units.
pub fn parse_quantity(input: &str, unit: Unit) -> Result<f64, ScopeError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ScopeError::Validation(format!(
            "empty value, expected a number in {}",
            unit.symbol()
        )));
    }

    let (value, suffix) = split_number(trimmed).ok_or_else(|| {
        ScopeError::Validation(format!("'{trimmed}' is not a number"))
    })?;

    let symbol = unit.symbol();
    let scale = if suffix.is_empty() || suffix.eq_ignore_ascii_case(symbol) {
        1.0
    } else {
        let mut chars = suffix.chars();
        let prefix = chars.next().and_then(si_prefix);
        match prefix {
            Some(scale) if chars.as_str().eq_ignore_ascii_case(symbol) => scale,
            _ => {
                return Err(ScopeError::Validation(format!(
                    "unit '{suffix}' in '{trimmed}' is not {symbol}"
                )));
            }
        }
    };

    let scaled = value * scale;
    if !scaled.is_finite() {
        return Err(ScopeError::Validation(format!("'{trimmed}' is not finite")));
    }
    Ok(scaled)
}

fn check_range(value: f64, min: f64, max: f64, what: &str, unit: Unit) -> Result<f64, ScopeError> {
    if value < min * (1.0 - RANGE_TOLERANCE) || value > max * (1.0 + RANGE_TOLERANCE) {
        return Err(ScopeError::Validation(format!(
            "{what} {} is outside {} .. {}",
            format_engineering(value, unit),
            format_engineering(min, unit),
            format_engineering(max, unit)
        )));
    }
    Ok(value)
}

/// Parse and range-check a volts/division entry.
pub fn parse_volts_per_div(input: &str) -> Result<f64, ScopeError> {
    let value = parse_quantity(input, Unit::Volt)?;
    check_range(value, VDIV_MIN, VDIV_MAX, "volts/div", Unit::Volt)
}

/// Parse and range-check a time/division entry.
pub fn parse_time_per_div(input: &str) -> Result<f64, ScopeError> {
    let value = parse_quantity(input, Unit::Second)?;
    check_range(value, TDIV_MIN, TDIV_MAX, "time/div", Unit::Second)
}

/// Clamp a measured voltage into the settable volts/division range.
pub fn clamp_volts_per_div(volts: f64) -> f64 {
    volts.abs().clamp(VDIV_MIN, VDIV_MAX)
}

/// Index into `TDIV_LEVELS` of the level closest to `seconds`.
///
/// Values at or beyond either end of the table snap to that end.
pub fn nearest_tdiv_index(seconds: f64) -> usize {
    let last = TDIV_SECONDS.len() - 1;
    if seconds.is_nan() || seconds <= TDIV_SECONDS[0] {
        return 0;
    }
    if seconds >= TDIV_SECONDS[last] {
        return last;
    }
    TDIV_SECONDS
        .windows(2)
        .position(|w| seconds >= w[0] && seconds < w[1])
        .map(|i| {
            let lower = (seconds - TDIV_SECONDS[i]).abs();
            let upper = (seconds - TDIV_SECONDS[i + 1]).abs();
            if lower < upper { i } else { i + 1 }
        })
        .unwrap_or(last)
}

pub fn nearest_tdiv(seconds: f64) -> f64 {
    TDIV_SECONDS[nearest_tdiv_index(seconds)]
}

/// Format with an engineering prefix: `0.0005` V -> `"500 uV"`.
pub fn format_engineering(value: f64, unit: Unit) -> String {
    let abs = value.abs();
    let (scale, prefix) = if abs == 0.0 || abs >= 1.0 {
        (1.0, "")
    } else if abs >= 1e-3 {
        (1e3, "m")
    } else if abs >= 1e-6 {
        (1e6, "u")
    } else if abs >= 1e-9 {
        (1e9, "n")
    } else {
        (1e12, "p")
    };
    let scaled = value * scale;
    // Up to 3 significant decimals, without trailing zeros
    let mut text = format!("{scaled:.3}");
    if text.contains('.') {
        text = text.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    format!("{text} {prefix}{}", unit.symbol())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * b.abs().max(1.0)
    }

    #[test]
    fn test_parse_quantity_forms() {
        assert!(close(parse_quantity("2V", Unit::Volt).unwrap(), 2.0));
        assert!(close(parse_quantity("2 V", Unit::Volt).unwrap(), 2.0));
        assert!(close(parse_quantity("500 mV", Unit::Volt).unwrap(), 0.5));
        assert!(close(parse_quantity("500uV", Unit::Volt).unwrap(), 500e-6));
        assert!(close(parse_quantity("500 µV", Unit::Volt).unwrap(), 500e-6));
        assert!(close(parse_quantity("1e-3", Unit::Second).unwrap(), 1e-3));
        assert!(close(parse_quantity("1 ms", Unit::Second).unwrap(), 1e-3));
        assert!(close(parse_quantity("100 S", Unit::Second).unwrap(), 100.0));
    }

    #[test]
    fn test_parse_quantity_rejects_bad_input() {
        for bad in ["abc", "", "   ", "2 A", "1 ms", "V2"] {
            assert!(
                matches!(parse_quantity(bad, Unit::Volt), Err(ScopeError::Validation(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_every_listed_level_parses_in_range() {
        for level in VDIV_LEVELS {
            parse_volts_per_div(level).unwrap();
        }
        for (level, seconds) in TDIV_LEVELS.iter().zip(TDIV_SECONDS) {
            assert!(close(parse_time_per_div(level).unwrap(), seconds), "{level}");
        }
    }

    #[test]
    fn test_range_limits() {
        assert!(parse_volts_per_div("20 V").is_err());
        assert!(parse_volts_per_div("100 uV").is_err());
        assert!(parse_volts_per_div("-1 V").is_err());
        assert!(parse_time_per_div("500 ps").is_err());
        assert!(parse_time_per_div("200 s").is_err());
        assert!(parse_volts_per_div("10 V").is_ok());
    }

    #[test]
    fn test_nearest_tdiv() {
        assert_eq!(nearest_tdiv(1.4e-3), 1e-3);
        assert_eq!(nearest_tdiv(1.6e-3), 2e-3);
        assert_eq!(nearest_tdiv(1e-12), 1e-9);
        assert_eq!(nearest_tdiv(1e3), 100.0);
        assert_eq!(nearest_tdiv(5e-6), 5e-6);
        assert_eq!(TDIV_LEVELS[nearest_tdiv_index(142.857e-6)], "100 us");
    }

    #[test]
    fn test_format_engineering() {
        assert_eq!(format_engineering(0.0005, Unit::Volt), "500 uV");
        assert_eq!(format_engineering(2.0, Unit::Volt), "2 V");
        assert_eq!(format_engineering(1e-3, Unit::Second), "1 ms");
        assert_eq!(format_engineering(2.5e-8, Unit::Second), "25 ns");
    }
}
