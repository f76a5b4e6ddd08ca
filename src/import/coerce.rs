//! Per-cell conversion of raw source text into values for the destination column.
//!
//! Conversion never fails: text that does not parse for a typed column is
//! forwarded unchanged as [`Value::Fallback`] and the database decides.

use super::mapper::ColumnMapping;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// Timestamp layouts tried in order. `%.f` accepts any fractional precision.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

const TEMPORAL_TYPES: &[&str] = &[
    "timestamp",
    "timestamp without time zone",
    "timestamp with time zone",
    "timestamptz",
    "date",
    "time",
    "time without time zone",
    "datetime",
    "datetime2",
    "smalldatetime",
];

const NUMERIC_TYPES: &[&str] = &[
    "smallint",
    "integer",
    "bigint",
    "int",
    "int2",
    "int4",
    "int8",
    "tinyint",
    "decimal",
    "numeric",
    "real",
    "double precision",
    "float",
    "float4",
    "float8",
    "money",
    "smallmoney",
];

const BOOLEAN_TYPES: &[&str] = &["boolean", "bool"];

/// Coarse family of a declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TypeClass {
    Temporal,
    Numeric,
    Boolean,
    Text,
}

impl TypeClass {
    pub fn of(data_type: &str) -> Self {
        let data_type = data_type.trim();
        let is = |names: &[&str]| names.iter().any(|name| name.eq_ignore_ascii_case(data_type));

        if is(TEMPORAL_TYPES) {
            TypeClass::Temporal
        } else if is(NUMERIC_TYPES) {
            TypeClass::Numeric
        } else if is(BOOLEAN_TYPES) {
            TypeClass::Boolean
        } else {
            TypeClass::Text
        }
    }
}

/// A converted cell ready to be encoded for the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Null,
    Integer(i64),
    /// Non-integer or out-of-range number. `literal` is the source text,
    /// which is what gets written so no precision is lost.
    Float { value: f64, literal: String },
    Boolean(bool),
    Timestamp(NaiveDateTime),
    Text(String),
    /// Source text that did not parse for a typed column.
    Fallback(String),
}

impl Value {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Value::Fallback(_))
    }
}

/// Convert one raw cell for a column of the given class and nullability.
pub fn coerce_value(raw: &str, class: TypeClass, nullable: bool) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return if nullable {
            Value::Null
        } else {
            Value::Text(String::new())
        };
    }

    match class {
        TypeClass::Temporal => parse_timestamp(trimmed)
            .map(Value::Timestamp)
            .unwrap_or_else(|| Value::Fallback(trimmed.to_string())),
        TypeClass::Numeric => parse_number(trimmed)
            .unwrap_or_else(|| Value::Fallback(trimmed.to_string())),
        TypeClass::Boolean => parse_bool(trimmed)
            .map(Value::Boolean)
            .unwrap_or_else(|| Value::Fallback(trimmed.to_string())),
        TypeClass::Text => Value::Text(trimmed.to_string()),
    }
}

/// Convert a source record into destination order.
///
/// Returns the typed row plus how many cells fell back to raw text.
pub fn coerce_row(raw: &[String], mappings: &[ColumnMapping]) -> (Vec<Value>, usize) {
    let mut fallbacks = 0;
    let row = mappings
        .iter()
        .map(|mapping| {
            let value = match raw.get(mapping.source_index) {
                Some(cell) => {
                    coerce_value(cell, mapping.type_class, mapping.column.nullable)
                }
                None => Value::Null,
            };
            if value.is_fallback() {
                fallbacks += 1;
            }
            value
        })
        .collect();

    (row, fallbacks)
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn parse_number(value: &str) -> Option<Value> {
    if let Ok(int) = value.parse::<i64>() {
        return Some(Value::Integer(int));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|float| float.is_finite())
        .map(|float| Value::Float {
            value: float,
            literal: value.to_string(),
        })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Some(true),
        "0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}
