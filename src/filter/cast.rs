//! Casting JSON values to column-typed [`SqlValue`]s.

use crate::config::ScalarType;
use crate::error::AppError;
use crate::sql::SqlValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Date-time formats accepted in filter values, tried in order.
const FILTER_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M"];
const FILTER_DATE_FORMAT: &str = "%Y-%m-%d";

/// Formats accepted in create/update payloads, besides RFC 3339.
const WRITE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

fn invalid(kind: &str, value: &Value) -> AppError {
    AppError::BadRequest(format!("expected {} value, got {}", kind, value))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, FILTER_DATE_FORMAT).ok()
}

fn parse_filter_datetime(s: &str) -> Option<NaiveDateTime> {
    FILTER_DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn parse_write_datetime(s: &str) -> Option<NaiveDateTime> {
    WRITE_DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.naive_utc()))
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn cast_common(scalar: ScalarType, value: &Value) -> Result<Option<SqlValue>, AppError> {
    let v = match (scalar, value) {
        (_, Value::Null) => SqlValue::Null,
        (ScalarType::Text, Value::String(s)) => SqlValue::Text(s.clone()),
        (ScalarType::Text, Value::Number(_) | Value::Bool(_)) => SqlValue::Text(value.to_string()),
        (ScalarType::Integer, Value::Number(n)) => {
            SqlValue::Int(n.as_i64().ok_or_else(|| invalid("integer", value))?)
        }
        (ScalarType::Integer, Value::String(s)) => {
            SqlValue::Int(s.trim().parse().map_err(|_| invalid("integer", value))?)
        }
        (ScalarType::Float, Value::Number(n)) => {
            SqlValue::Float(n.as_f64().ok_or_else(|| invalid("float", value))?)
        }
        (ScalarType::Float, Value::String(s)) => {
            SqlValue::Float(s.trim().parse().map_err(|_| invalid("float", value))?)
        }
        (ScalarType::Boolean, Value::Bool(b)) => SqlValue::Bool(*b),
        (ScalarType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => SqlValue::Bool(true),
            "false" | "0" => SqlValue::Bool(false),
            _ => return Err(invalid("boolean", value)),
        },
        (ScalarType::Json, v) => SqlValue::Json(v.clone()),
        (ScalarType::SearchVector, _) => {
            return Err(AppError::BadRequest("search vectors cannot be compared directly".into()))
        }
        (ScalarType::Date | ScalarType::DateTime, Value::String(_)) => return Ok(None),
        (ScalarType::Date, _) => return Err(invalid("date", value)),
        (ScalarType::DateTime, _) => return Err(invalid("datetime", value)),
        (ScalarType::Text, _) => return Err(invalid("text", value)),
        (ScalarType::Integer, _) => return Err(invalid("integer", value)),
        (ScalarType::Float, _) => return Err(invalid("float", value)),
        (ScalarType::Boolean, _) => return Err(invalid("boolean", value)),
    };
    Ok(Some(v))
}

/// Cast a filter value to the column's type. Date columns accept `YYYY-MM-DD`;
/// date-time columns accept `YYYY-MM-DD HH:MM` or `YYYY-MM-DD`.
pub fn cast_filter_value(scalar: ScalarType, value: &Value) -> Result<SqlValue, AppError> {
    if let Some(v) = cast_common(scalar, value)? {
        return Ok(v);
    }
    let s = value.as_str().unwrap_or_default();
    match scalar {
        ScalarType::Date => parse_date(s).map(SqlValue::Date),
        _ => parse_filter_datetime(s).map(SqlValue::DateTime),
    }
    .ok_or_else(|| AppError::InvalidDateFormat(s.to_string()))
}

/// Cast a create/update payload value. Date-times additionally accept ISO 8601 / RFC 3339.
pub fn cast_write_value(scalar: ScalarType, value: &Value) -> Result<SqlValue, AppError> {
    if let Some(v) = cast_common(scalar, value)? {
        return Ok(v);
    }
    let s = value.as_str().unwrap_or_default();
    match scalar {
        ScalarType::Date => parse_date(s)
            .or_else(|| parse_write_datetime(s).map(|d| d.date()))
            .map(SqlValue::Date),
        _ => parse_write_datetime(s).map(SqlValue::DateTime),
    }
    .ok_or_else(|| AppError::InvalidDateFormat(s.to_string()))
}

/// Operand of the `asdate*` operators: a date, or a date-time truncated to its date.
pub fn cast_date_value(value: &Value) -> Result<SqlValue, AppError> {
    let s = value
        .as_str()
        .ok_or_else(|| AppError::InvalidDateFormat(value.to_string()))?;
    parse_filter_datetime(s)
        .map(|d| SqlValue::Date(d.date()))
        .ok_or_else(|| AppError::InvalidDateFormat(s.to_string()))
}

/// List operand: arrays as-is, strings split on commas.
pub fn split_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect(),
        other => vec![other.clone()],
    }
}

pub fn pattern_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
