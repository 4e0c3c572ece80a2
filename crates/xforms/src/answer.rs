//! Typed answer values.
//!
//! Submissions carry every value as text. Binds declare a `type`, and answers are coerced into an
//! [`AnswerValue`] so that downstream consumers see typed data. Entity properties are opaque
//! strings, so every value also has a canonical string form (its `Display` output):
//!
//! | Type       | Canonical form                    |
//! |------------|-----------------------------------|
//! | `date`     | `2024-11-15`                      |
//! | `dateTime` | RFC 3339 with milliseconds        |
//! | `time`     | `HH:MM:SS` (fraction when present)|
//! | `select`   | space separated choice values     |

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Data type declared by a bind's `type` attribute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Time,
    /// Multiple choice (`select`), stored as space separated values.
    Select,
}

impl DataType {
    /// Maps a bind `type` attribute onto a data type.
    ///
    /// Any namespace prefix (`xsd:`, `odk:`) is ignored. Unknown types (geopoint, barcode,
    /// binary, ...) are treated as plain strings.
    pub fn from_bind_type(raw: &str) -> Self {
        let local = raw.rsplit(':').next().unwrap_or(raw);
        match local {
            "int" | "integer" | "long" | "short" => DataType::Integer,
            "decimal" | "double" | "float" => DataType::Decimal,
            "boolean" => DataType::Boolean,
            "date" => DataType::Date,
            "dateTime" => DataType::DateTime,
            "time" => DataType::Time,
            "select" | "rank" => DataType::Select,
            _ => DataType::String,
        }
    }
}

/// A typed answer held by an instance node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AnswerValue {
    String(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    Time(NaiveTime),
    Select(Vec<String>),
}

impl AnswerValue {
    /// Coerces submitted text into a typed value.
    ///
    /// Returns `Ok(None)` for blank input: an empty element is an unanswered question, whatever
    /// its type.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message when the text is not valid for `data_type`.
    pub fn parse(data_type: DataType, raw: &str) -> Result<Option<Self>, String> {
        let text = raw.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let value = match data_type {
            DataType::String => AnswerValue::String(raw.to_string()),
            DataType::Integer => AnswerValue::Integer(
                text.parse::<i64>()
                    .map_err(|e| format!("'{text}' is not an integer: {e}"))?,
            ),
            DataType::Decimal => {
                let parsed = text
                    .parse::<f64>()
                    .map_err(|e| format!("'{text}' is not a decimal: {e}"))?;
                if !parsed.is_finite() {
                    return Err(format!("'{text}' is not a finite decimal"));
                }
                AnswerValue::Decimal(parsed)
            }
            DataType::Boolean => match text {
                "true" | "1" => AnswerValue::Boolean(true),
                "false" | "0" => AnswerValue::Boolean(false),
                _ => return Err(format!("'{text}' is not a boolean")),
            },
            DataType::Date => AnswerValue::Date(
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .map_err(|e| format!("'{text}' is not a date: {e}"))?,
            ),
            DataType::DateTime => AnswerValue::DateTime(
                DateTime::parse_from_rfc3339(text)
                    .map_err(|e| format!("'{text}' is not a dateTime: {e}"))?,
            ),
            DataType::Time => AnswerValue::Time(parse_time(text)?),
            DataType::Select => AnswerValue::Select(
                text.split_whitespace().map(str::to_string).collect(),
            ),
        };

        Ok(Some(value))
    }
}

// XForms times may carry a UTC offset (`10:15:00.000+02:00`); the offset is dropped.
fn parse_time(text: &str) -> Result<NaiveTime, String> {
    let without_zone = text.trim_end_matches('Z');
    let without_offset = match without_zone.rfind(['+', '-']) {
        Some(idx) if idx >= 8 => &without_zone[..idx],
        _ => without_zone,
    };

    NaiveTime::parse_from_str(without_offset, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(without_offset, "%H:%M"))
        .map_err(|e| format!("'{text}' is not a time: {e}"))
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::String(s) => f.write_str(s),
            AnswerValue::Integer(i) => write!(f, "{i}"),
            AnswerValue::Decimal(d) => write!(f, "{d}"),
            AnswerValue::Boolean(b) => write!(f, "{b}"),
            AnswerValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            AnswerValue::DateTime(dt) => {
                f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, false))
            }
            AnswerValue::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            AnswerValue::Select(choices) => f.write_str(&choices.join(" ")),
        }
    }
}
