//! Row values and their conversion to destination SQL literals.

use crate::migration::typemap::ValueKind;
use crate::migration::writer::escape_literal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static NUMERIC_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").expect("numeric literal pattern is valid")
});

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const TIMESTAMPTZ_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f %:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
];

/// A single decoded source value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Exact numeric kept as text to avoid precision loss
    Decimal(String),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    /// The source driver returned something that could not be decoded
    Garbled(String),
}

pub type Row = Vec<Value>;

/// Why a value could not be rendered
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("undecodable source value: {0}")]
    Garbled(String),

    #[error("unrecognized flag value '{0}'")]
    Flag(String),

    #[error("not a number: '{0}'")]
    Numeric(String),
}

fn format_timestamp(ts: &NaiveDateTime) -> String {
    let base = ts.format("%Y-%m-%d %H:%M:%S").to_string();
    let micros = ts.nanosecond() / 1_000;
    if micros == 0 {
        base
    } else {
        format!("{}.{:06}", base, micros)
    }
}

fn flag_literal(raw: &str) -> Result<&'static str, ValueError> {
    match raw.trim().to_uppercase().as_str() {
        "A" | "S" | "Y" | "T" | "TRUE" | "1" => Ok("'1'"),
        "I" | "N" | "F" | "FALSE" | "0" => Ok("'0'"),
        _ => Err(ValueError::Flag(raw.to_string())),
    }
}

fn quoted(text: &str) -> String {
    let cleaned: String = text.chars().filter(|c| *c != '\0').collect();
    format!("'{}'", escape_literal(&cleaned))
}

/// Render a value as a literal for a multi-row INSERT.
///
/// `flag` marks boolean-like columns, which are written as `'1'` / `'0'`.
pub fn to_sql_literal(value: &Value, flag: bool) -> Result<String, ValueError> {
    if flag {
        return match value {
            Value::Null => Ok("NULL".to_string()),
            Value::Bool(b) => Ok(if *b { "'1'" } else { "'0'" }.to_string()),
            Value::Int(n) => flag_literal(&n.to_string()).map(str::to_string),
            Value::Text(s) | Value::Decimal(s) => flag_literal(s).map(str::to_string),
            Value::Garbled(reason) => Err(ValueError::Garbled(reason.clone())),
            other => Err(ValueError::Flag(format!("{:?}", other))),
        };
    }

    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Value::Int(n) => Ok(n.to_string()),
        Value::Decimal(s) => {
            let trimmed = s.trim();
            if NUMERIC_LITERAL.is_match(trimmed) {
                Ok(trimmed.to_string())
            } else {
                Err(ValueError::Numeric(s.clone()))
            }
        }
        Value::Float(f) if f.is_nan() => Ok("'NaN'".to_string()),
        Value::Float(f) if f.is_infinite() => {
            Ok(if *f > 0.0 { "'Infinity'" } else { "'-Infinity'" }.to_string())
        }
        Value::Float(f) => Ok(f.to_string()),
        Value::Text(s) => Ok(quoted(s)),
        Value::Bytes(b) => Ok(format!("'\\x{}'::bytea", hex::encode(b))),
        Value::Timestamp(ts) => Ok(format!("'{}'", format_timestamp(ts))),
        Value::TimestampTz(ts) => Ok(format!("'{}+00'", format_timestamp(&ts.naive_utc()))),
        Value::Date(d) => Ok(format!("'{}'", d.format("%Y-%m-%d"))),
        Value::Time(t) => Ok(format!("'{}'", t.format("%H:%M:%S%.f"))),
        Value::Garbled(reason) => Err(ValueError::Garbled(reason.clone())),
    }
}

/// Decode a value delivered as text (ODBC) according to its column kind
pub fn parse_text_value(raw: Option<&str>, kind: ValueKind) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };
    let text = raw.trim();

    match kind {
        ValueKind::Text => Value::Text(raw.to_string()),
        _ if text.is_empty() => Value::Null,
        ValueKind::Integer => match text.parse::<i64>() {
            Ok(n) => Value::Int(n),
            Err(_) if NUMERIC_LITERAL.is_match(text) => Value::Decimal(text.to_string()),
            Err(_) => Value::Garbled(format!("'{}' is not an integer", text)),
        },
        ValueKind::Decimal => {
            if NUMERIC_LITERAL.is_match(text) {
                Value::Decimal(text.to_string())
            } else {
                Value::Garbled(format!("'{}' is not a number", text))
            }
        }
        ValueKind::Float => match text.parse::<f64>() {
            Ok(f) => Value::Float(f),
            Err(_) => Value::Garbled(format!("'{}' is not a float", text)),
        },
        ValueKind::Boolean => Value::Text(text.to_string()),
        ValueKind::Binary => match hex::decode(text) {
            Ok(bytes) => Value::Bytes(bytes),
            Err(e) => Value::Garbled(format!("binary value is not hex: {}", e)),
        },
        ValueKind::Timestamp => parse_timestamp(text)
            .map(Value::Timestamp)
            .unwrap_or_else(|| Value::Garbled(format!("'{}' is not a timestamp", text))),
        ValueKind::TimestampTz => TIMESTAMPTZ_FORMATS
            .iter()
            .find_map(|f| DateTime::parse_from_str(text, f).ok())
            .map(|ts| Value::TimestampTz(ts.with_timezone(&Utc)))
            .unwrap_or_else(|| Value::Garbled(format!("'{}' is not a timestamp with time zone", text))),
        ValueKind::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Value::Date)
            .unwrap_or_else(|_| Value::Garbled(format!("'{}' is not a date", text))),
        ValueKind::Time => NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
            .map(Value::Time)
            .unwrap_or_else(|_| Value::Garbled(format!("'{}' is not a time", text))),
    }
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
