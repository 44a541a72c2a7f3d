//! Point value normalization.
//!
//! The controller reports every attribute value as a bare string. Some points
//! carry undocumented numeric enumeration codes which are rewritten into
//! semantic strings first; the result is then classified into a type tag that
//! drives the typed projection every consumer reads.

use std::fmt;
use strum::{Display, EnumString};

/// Type tag stored alongside a point's raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PointType {
    #[default]
    String,
    Int,
    Float,
    Bool,
}

/// A raw value after rewrite and classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub value: String,
    pub kind: PointType,
}

/// Rewrite enumeration codes for points whose raw values are not self-describing.
fn rewrite_for_point(point_name: &str, raw: &str) -> Option<&'static str> {
    match point_name {
        "OccupancyRequest" | "OccupancyStatus" => {
            Some(if raw == "1" { "true" } else { "false" })
        }
        "CommunicationStatus" => Some(if raw == "3" { "true" } else { "false" }),
        "HeatCoolModeStatus" => Some(heat_cool_mode_label(raw)),
        _ => None,
    }
}

/// Decode a `HeatCoolModeStatus` code. Unmapped codes read as `Off`.
pub fn heat_cool_mode_label(code: &str) -> &'static str {
    match code {
        "1" => "Auto",
        "2" | "3" | "13" => "Heat",
        "9" => "Emergency Heat",
        "4" | "6" | "11" => "Cool",
        _ => "Off",
    }
}

/// Normalize a raw point value into a stored value and type tag.
///
/// `hint` is the type used when the value is neither a boolean literal nor in
/// scientific notation; values read from the wire use [`PointType::String`].
pub fn normalize(point_name: &str, raw: &str, hint: PointType) -> Normalized {
    let value = rewrite_for_point(point_name, raw).unwrap_or(raw);
    let lowered = value.to_lowercase();

    if lowered == "true" {
        return Normalized {
            value: "True".to_string(),
            kind: PointType::Bool,
        };
    }
    if lowered == "false" {
        return Normalized {
            value: "False".to_string(),
            kind: PointType::Bool,
        };
    }
    if (lowered.contains("e+") || lowered.contains("e-"))
        && let Ok(parsed) = value.trim().parse::<f64>()
    {
        return Normalized {
            value: format_float(parsed),
            kind: PointType::Float,
        };
    }

    Normalized {
        value: value.to_string(),
        kind: hint,
    }
}

/// Format a float so whole numbers keep a trailing `.0` (`68.0`, not `68`).
pub fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Typed projection of a stored (value, type tag) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl TypedValue {
    /// Interpret a stored value according to its type tag.
    ///
    /// Floats are rounded to two decimal places. Values that do not parse as
    /// their tag fall back to text.
    pub fn project(value: &str, kind: PointType) -> Self {
        match kind {
            PointType::Int => value
                .trim()
                .parse()
                .map(TypedValue::Int)
                .unwrap_or_else(|_| TypedValue::Text(value.to_string())),
            PointType::Float => value
                .trim()
                .parse::<f64>()
                .map(|v| TypedValue::Float((v * 100.0).round() / 100.0))
                .unwrap_or_else(|_| TypedValue::Text(value.to_string())),
            PointType::Bool => TypedValue::Bool(value == "True"),
            PointType::String => TypedValue::Text(value.to_string()),
        }
    }

    /// Numeric reading, if the value has one. Booleans count as 1/0 and
    /// numeric text is parsed.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            TypedValue::Int(v) => Some(*v as f64),
            TypedValue::Float(v) => Some(*v),
            TypedValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            TypedValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Bool(v) => Some(*v),
            TypedValue::Int(v) => Some(*v != 0),
            TypedValue::Float(v) => Some(*v != 0.0),
            TypedValue::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Int(v) => write!(f, "{v}"),
            TypedValue::Float(v) => f.write_str(&format_float(*v)),
            TypedValue::Bool(true) => f.write_str("True"),
            TypedValue::Bool(false) => f.write_str("False"),
            TypedValue::Text(s) => f.write_str(s),
        }
    }
}
