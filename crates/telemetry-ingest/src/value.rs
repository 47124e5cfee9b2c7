// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Field value coercion
//!
//! Sensors send every value as text. Each value is narrowed to the most
//! specific scalar it parses as: integer first, then float, then the text
//! itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed field value.
///
/// Serializes untagged, so `Int(21)` becomes `21`, `Float(1.5)` becomes
/// `1.5` and `Text("C")` becomes `"C"` in the stored payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Returns the integer, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the float, if this is a `Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text, if this is a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Coerce raw field text into a [`Value`].
///
/// Never fails. Non-finite floats (`nan`, `inf`, `1e999`) stay as text
/// because the JSON payload cannot represent them.
pub fn coerce(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Int(v);
    }

    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Value::Float(v),
        _ => Value::Text(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_wins_over_float() {
        assert_eq!(coerce("21"), Value::Int(21));
        assert_eq!(coerce("-7"), Value::Int(-7));
        assert_eq!(coerce("+7"), Value::Int(7));
        assert_eq!(coerce("007"), Value::Int(7));
        assert_eq!(coerce("0"), Value::Int(0));
    }

    #[test]
    fn test_integer_extremes_are_exact() {
        assert_eq!(coerce(&i64::MAX.to_string()), Value::Int(i64::MAX));
        assert_eq!(coerce(&i64::MIN.to_string()), Value::Int(i64::MIN));
    }

    #[test]
    fn test_out_of_range_integer_falls_back_to_float() {
        assert_eq!(
            coerce("9223372036854775808"),
            Value::Float(9_223_372_036_854_775_808.0)
        );
    }

    #[test]
    fn test_float_forms() {
        assert_eq!(coerce("1.5"), Value::Float(1.5));
        assert_eq!(coerce("-0.25"), Value::Float(-0.25));
        assert_eq!(coerce("1e3"), Value::Float(1000.0));
        assert_eq!(coerce(".5"), Value::Float(0.5));
        assert_eq!(coerce("21.0"), Value::Float(21.0));
    }

    #[test]
    fn test_float_display_round_trips() {
        for v in [0.1_f64, 3.141_592_653_589_793, -1.0e-300, 6.02e23] {
            assert_eq!(coerce(&v.to_string()), Value::Float(v));
        }
    }

    #[test]
    fn test_non_numeric_text_is_unchanged() {
        assert_eq!(coerce("C"), Value::Text("C".to_string()));
        assert_eq!(coerce("aa:bb:cc"), Value::Text("aa:bb:cc".to_string()));
        assert_eq!(coerce(""), Value::Text(String::new()));
        assert_eq!(coerce("1_000"), Value::Text("1_000".to_string()));
    }

    #[test]
    fn test_non_finite_floats_stay_text() {
        assert_eq!(coerce("nan"), Value::Text("nan".to_string()));
        assert_eq!(coerce("inf"), Value::Text("inf".to_string()));
        assert_eq!(coerce("1e999"), Value::Text("1e999".to_string()));
    }

    #[test]
    fn test_coerce_is_deterministic() {
        for raw in ["12", "1.25", "x", "-0", "1e-2"] {
            assert_eq!(coerce(raw), coerce(raw));
        }
    }

    #[test]
    fn test_untagged_serialization() {
        assert_eq!(serde_json::to_string(&Value::Int(21)).unwrap(), "21");
        assert_eq!(serde_json::to_string(&Value::Float(1.5)).unwrap(), "1.5");
        assert_eq!(
            serde_json::to_string(&Value::Text("C".into())).unwrap(),
            "\"C\""
        );
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Int(3).as_int(), Some(3));
        assert_eq!(Value::Int(3).as_float(), None);
        assert_eq!(Value::Float(0.5).as_float(), Some(0.5));
        assert_eq!(Value::Text("a".into()).as_text(), Some("a"));
    }
}
