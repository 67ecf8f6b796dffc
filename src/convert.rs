//! Coercion of generated or extracted values between text and numbers.

use crate::error::{ConversionError, SpecError};
use serde_json::{Number, Value};
use std::fmt;
use std::str::FromStr;

/// Post-extraction coercion policy of a mapped value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conversion {
    #[default]
    None,
    Text,
    Number,
}

impl FromStr for Conversion {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(Conversion::None),
            // "string" is accepted as an alias of "text"
            "text" | "string" => Ok(Conversion::Text),
            "number" => Ok(Conversion::Number),
            other => Err(SpecError::UnsupportedConversion(other.to_string())),
        }
    }
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Conversion::None => "none",
            Conversion::Text => "text",
            Conversion::Number => "number",
        })
    }
}

impl Conversion {
    /// Apply the conversion to an extracted value.
    pub fn apply(self, value: Value) -> Result<Value, ConversionError> {
        match self {
            Conversion::None => Ok(value),
            Conversion::Text => to_text(&value).map(Value::String),
            Conversion::Number => to_number(&value),
        }
    }
}

/// Name of the runtime type of a value, used in error details.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Format a number in plain decimal notation, never in exponent form.
pub fn format_number(number: &Number) -> String {
    if let Some(i) = number.as_i64() {
        i.to_string()
    } else if let Some(u) = number.as_u64() {
        u.to_string()
    } else {
        // f64's Display writes the shortest round-trip decimal without an exponent
        number.as_f64().map(|f| f.to_string()).unwrap_or_default()
    }
}

/// Numbers are formatted, strings pass through, anything else fails.
pub fn to_text(value: &Value) -> Result<String, ConversionError> {
    match value {
        Value::Number(n) => Ok(format_number(n)),
        Value::String(s) => Ok(s.clone()),
        other => Err(not_convertible(other, "text")),
    }
}

/// Numbers pass through, strings are parsed as floating point, anything else fails.
pub fn to_number(value: &Value) -> Result<Value, ConversionError> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => {
            let parsed = s.parse::<f64>().map_err(|e| ConversionError::Unparsable {
                value: s.clone(),
                reason: e.to_string(),
            })?;
            number_value(parsed).ok_or_else(|| ConversionError::Unparsable {
                value: s.clone(),
                reason: "value is not finite".to_string(),
            })
        }
        other => Err(not_convertible(other, "number")),
    }
}

/// Coerce a value into the string placed in an outbound url or query.
pub fn display_string(value: &Value) -> Result<String, ConversionError> {
    match value {
        Value::Number(n) => Ok(format_number(n)),
        Value::String(s) => Ok(s.clone()),
        other => Err(not_convertible(other, "string")),
    }
}

// Integral values are kept as integers so they serialize as `12`, not `12.0`.
fn number_value(f: f64) -> Option<Value> {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;
    if !f.is_finite() {
        return None;
    }
    if f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER {
        return Some(Value::Number(Number::from(f as i64)));
    }
    Number::from_f64(f).map(Value::Number)
}

fn not_convertible(value: &Value, target: &'static str) -> ConversionError {
    ConversionError::NotConvertible {
        type_name: type_name(value),
        value: value.to_string(),
        target,
    }
}
