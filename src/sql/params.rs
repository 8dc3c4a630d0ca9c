//! Typed values bound as query parameters.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

/// Format used when timestamps are rendered back to JSON.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A value that can be bound to a PostgreSQL query, already cast to its column's type.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Json(Value),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// JSON rendering, matching how rows are decoded.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Int(n) => Value::Number((*n).into()),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            SqlValue::DateTime(d) => Value::String(d.format(DATETIME_FORMAT).to_string()),
            SqlValue::Json(v) => v.clone(),
        }
    }
}

impl<'q> Encode<'q, Postgres> for SqlValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            SqlValue::Null => <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf),
            SqlValue::Text(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf),
            SqlValue::Int(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf),
            SqlValue::Float(f) => <f64 as Encode<Postgres>>::encode_by_ref(f, buf),
            SqlValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf),
            SqlValue::Date(d) => <NaiveDate as Encode<Postgres>>::encode_by_ref(d, buf),
            SqlValue::DateTime(d) => <NaiveDateTime as Encode<Postgres>>::encode_by_ref(d, buf),
            SqlValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            SqlValue::Null | SqlValue::Text(_) => <String as Type<Postgres>>::type_info(),
            SqlValue::Int(_) => <i64 as Type<Postgres>>::type_info(),
            SqlValue::Float(_) => <f64 as Type<Postgres>>::type_info(),
            SqlValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            SqlValue::Date(_) => <NaiveDate as Type<Postgres>>::type_info(),
            SqlValue::DateTime(_) => <NaiveDateTime as Type<Postgres>>::type_info(),
            SqlValue::Json(_) => <Value as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for SqlValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetimes_render_in_decode_format() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap();
        assert_eq!(SqlValue::DateTime(dt).to_json(), Value::String("2024-03-09T14:05:00".into()));
        assert_eq!(
            SqlValue::Date(dt.date()).to_json(),
            Value::String("2024-03-09".into())
        );
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(SqlValue::Float(f64::NAN).to_json(), Value::Null);
    }
}
