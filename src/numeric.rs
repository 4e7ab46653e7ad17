//! Coercion of possibly-string/unknown entity states into a numeric value.
//!
//! Mirrors how the home-automation bridge represents sensor state: a
//! entity's `state` is nominally a number but arrives over the wire as a
//! string, and several sentinel strings ("unavailable", "unknown") or a
//! bare `null` mean "no reading" rather than zero.

use std::fmt;

/// A numeric sensor reading, or the absence of one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericState {
    Number(f64),
    Absent,
}

impl NumericState {
    /// Observed value, falling back to `0.0` when absent.
    pub fn or_zero(self) -> f64 {
        match self {
            NumericState::Number(v) => v,
            NumericState::Absent => 0.0,
        }
    }

    pub fn is_absent(self) -> bool {
        matches!(self, NumericState::Absent)
    }

    pub fn value(self) -> Option<f64> {
        match self {
            NumericState::Number(v) => Some(v),
            NumericState::Absent => None,
        }
    }

    /// Coerce a raw entity state string into a `NumericState`.
    ///
    /// Accepts a string parsing exactly as a finite number; anything else
    /// ("unavailable", "unknown", empty string, non-numeric garbage) maps to
    /// `Absent`.
    pub fn from_str_state(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => NumericState::Number(v),
            _ => NumericState::Absent,
        }
    }

    /// Coerce a raw `f64` into a `NumericState`, treating NaN/±inf as absent.
    pub fn from_f64(raw: f64) -> Self {
        if raw.is_finite() {
            NumericState::Number(raw)
        } else {
            NumericState::Absent
        }
    }

    /// Coerce a `serde_json::Value` the way the bridge's JSON payloads do:
    /// numbers pass through, strings are parsed, everything else (including
    /// `null`) is absent.
    pub fn from_json(raw: &serde_json::Value) -> Self {
        match raw {
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(NumericState::from_f64)
                .unwrap_or(NumericState::Absent),
            serde_json::Value::String(s) => NumericState::from_str_state(s),
            _ => NumericState::Absent,
        }
    }
}

impl fmt::Display for NumericState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericState::Number(v) => write!(f, "{v}"),
            NumericState::Absent => write!(f, "absent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_numbers() {
        assert_eq!(NumericState::from_str_state("42.5"), NumericState::Number(42.5));
        assert_eq!(NumericState::from_str_state("  -3 "), NumericState::Number(-3.0));
    }

    #[test]
    fn sentinel_strings_are_absent() {
        for raw in ["unavailable", "unknown", "", "garbage", "NaN", "inf"] {
            assert_eq!(NumericState::from_str_state(raw), NumericState::Absent, "{raw}");
        }
    }

    #[test]
    fn json_null_and_non_numeric_are_absent() {
        assert_eq!(NumericState::from_json(&serde_json::Value::Null), NumericState::Absent);
        assert_eq!(
            NumericState::from_json(&serde_json::Value::Bool(true)),
            NumericState::Absent
        );
        assert_eq!(
            NumericState::from_json(&serde_json::json!("12.3")),
            NumericState::Number(12.3)
        );
        assert_eq!(NumericState::from_json(&serde_json::json!(7)), NumericState::Number(7.0));
    }

    #[test]
    fn or_zero_falls_back() {
        assert_eq!(NumericState::Absent.or_zero(), 0.0);
        assert_eq!(NumericState::Number(5.0).or_zero(), 5.0);
    }
}
