//! PostgreSQL type mapping to Rust types.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::debug;
use uuid::Uuid;

/// A SQL value that can be serialized to JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Json(serde_json::Value),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Integer view of the value, if it is integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            SqlValue::Decimal(v) => v.trunc().to_string().parse().ok(),
            _ => None,
        }
    }

    /// String view of the value, if it is textual.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Convert to a display string.
    pub fn to_display_string(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(v) => v.to_string(),
            SqlValue::I16(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F32(v) => v.to_string(),
            SqlValue::F64(v) => v.to_string(),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::String(v) => v.clone(),
            SqlValue::Bytes(v) => format!("<{} bytes>", v.len()),
            SqlValue::Uuid(v) => v.to_string(),
            SqlValue::Date(v) => v.to_string(),
            SqlValue::Time(v) => v.to_string(),
            SqlValue::DateTime(v) => v.to_string(),
            SqlValue::DateTimeUtc(v) => v.to_rfc3339(),
            SqlValue::Json(v) => v.to_string(),
        }
    }

    /// Convert to a plain JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Type mapper for converting PostgreSQL columns to [`SqlValue`].
pub struct TypeMapper;

impl TypeMapper {
    /// Extract a value from a row column.
    pub fn extract_column(row: &PgRow, idx: usize) -> SqlValue {
        let Some(column) = row.columns().get(idx) else {
            return SqlValue::Null;
        };

        match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return SqlValue::Null,
            Err(_) => return SqlValue::Null,
            Ok(_) => {}
        }

        let type_name = column.type_info().name().to_ascii_uppercase();
        let value = match type_name.as_str() {
            "BOOL" => row.try_get::<bool, _>(idx).map(SqlValue::Bool).ok(),
            "INT2" => row.try_get::<i16, _>(idx).map(SqlValue::I16).ok(),
            "INT4" => row.try_get::<i32, _>(idx).map(SqlValue::I32).ok(),
            "INT8" => row.try_get::<i64, _>(idx).map(SqlValue::I64).ok(),
            "OID" => row
                .try_get::<sqlx::postgres::types::Oid, _>(idx)
                .map(|o| SqlValue::I64(i64::from(o.0)))
                .ok(),
            "FLOAT4" => row.try_get::<f32, _>(idx).map(SqlValue::F32).ok(),
            "FLOAT8" => row.try_get::<f64, _>(idx).map(SqlValue::F64).ok(),
            "NUMERIC" => row.try_get::<Decimal, _>(idx).map(SqlValue::Decimal).ok(),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" | "UNKNOWN" => {
                row.try_get::<String, _>(idx).map(SqlValue::String).ok()
            }
            "BYTEA" => row.try_get::<Vec<u8>, _>(idx).map(SqlValue::Bytes).ok(),
            "UUID" => row.try_get::<Uuid, _>(idx).map(SqlValue::Uuid).ok(),
            "DATE" => row.try_get::<NaiveDate, _>(idx).map(SqlValue::Date).ok(),
            "TIME" => row.try_get::<NaiveTime, _>(idx).map(SqlValue::Time).ok(),
            "TIMESTAMP" => row
                .try_get::<NaiveDateTime, _>(idx)
                .map(SqlValue::DateTime)
                .ok(),
            "TIMESTAMPTZ" => row
                .try_get::<DateTime<Utc>, _>(idx)
                .map(SqlValue::DateTimeUtc)
                .ok(),
            "JSON" | "JSONB" => row
                .try_get::<serde_json::Value, _>(idx)
                .map(SqlValue::Json)
                .ok(),
            _ => None,
        };

        value
            .or_else(|| row.try_get::<String, _>(idx).map(SqlValue::String).ok())
            .unwrap_or_else(|| {
                debug!(
                    "Unsupported column type {} for column {}; returning NULL",
                    type_name,
                    column.name()
                );
                SqlValue::Null
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_serialization() {
        assert_eq!(serde_json::to_string(&SqlValue::Null).unwrap(), "null");
        assert_eq!(serde_json::to_string(&SqlValue::I32(7)).unwrap(), "7");
        assert_eq!(
            serde_json::to_string(&SqlValue::String("x".into())).unwrap(),
            "\"x\""
        );
    }

    #[test]
    fn test_as_i64() {
        assert_eq!(SqlValue::I16(3).as_i64(), Some(3));
        assert_eq!(SqlValue::I64(150_000).as_i64(), Some(150_000));
        assert_eq!(SqlValue::Decimal(Decimal::new(42, 0)).as_i64(), Some(42));
        assert_eq!(SqlValue::String("1".into()).as_i64(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(SqlValue::Null.to_display_string(), "NULL");
        assert_eq!(SqlValue::Bool(true).to_display_string(), "true");
        assert_eq!(SqlValue::Bytes(vec![1, 2, 3]).to_display_string(), "<3 bytes>");
    }
}
