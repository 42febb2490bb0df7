//! Scalar kinds and their capabilities
//!
//! Filter and update operators are dispatched through [`ScalarKind::capabilities`]
//! instead of per-kind branches, so adding a kind means adding one row to the
//! table below plus its coercion.

use crate::storage::Value;
use num_bigint::BigInt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Kind of a scalar field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Boolean,
    Bytes,
    DateTime,
    BigInt,
    Decimal,
    Json,
}

/// What a kind supports beyond equality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// lt / lte / gt / gte
    pub ordered: bool,
    /// contains / startsWith / endsWith / mode
    pub textual: bool,
    /// increment / decrement / multiply / divide
    pub arithmetic: bool,
    /// in / notIn
    pub membership: bool,
}

const fn caps(ordered: bool, textual: bool, arithmetic: bool, membership: bool) -> Capabilities {
    Capabilities {
        ordered,
        textual,
        arithmetic,
        membership,
    }
}

impl ScalarKind {
    pub const fn capabilities(self) -> Capabilities {
        match self {
            ScalarKind::String => caps(true, true, false, true),
            ScalarKind::Int => caps(true, false, true, true),
            ScalarKind::Float => caps(true, false, true, true),
            ScalarKind::BigInt => caps(true, false, true, true),
            ScalarKind::Decimal => caps(true, false, true, true),
            ScalarKind::DateTime => caps(true, false, false, true),
            ScalarKind::Boolean => caps(false, false, false, false),
            ScalarKind::Bytes => caps(false, false, false, false),
            ScalarKind::Json => caps(false, false, false, false),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Bytes => "bytes",
            ScalarKind::DateTime => "datetime",
            ScalarKind::BigInt => "bigint",
            ScalarKind::Decimal => "decimal",
            ScalarKind::Json => "json",
        }
    }

    /// Convert a payload literal into this kind. `null` stays null.
    ///
    /// Loose inputs are accepted where unambiguous: RFC 3339 strings or epoch
    /// milliseconds for datetimes, integers or digit strings for bigints and
    /// decimals, arrays of byte values for bytes.
    pub fn coerce(self, json: &Json) -> Result<Value, String> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = || format!("expected {}, got {}", self.name(), json);
        match self {
            ScalarKind::String => json.as_str().map(Value::from).ok_or_else(mismatch),
            ScalarKind::Int => json.as_i64().map(Value::Int).ok_or_else(mismatch),
            ScalarKind::Float => json.as_f64().map(Value::Float).ok_or_else(mismatch),
            ScalarKind::Boolean => json.as_bool().map(Value::Bool).ok_or_else(mismatch),
            ScalarKind::Json => Ok(Value::Json(json.clone())),
            ScalarKind::Bytes => {
                let items = json.as_array().ok_or_else(mismatch)?;
                items
                    .iter()
                    .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()).ok_or_else(mismatch))
                    .collect::<Result<Vec<u8>, String>>()
                    .map(Value::Bytes)
            }
            ScalarKind::DateTime => match json {
                Json::String(s) => OffsetDateTime::parse(s, &Rfc3339)
                    .map(Value::DateTime)
                    .map_err(|e| format!("invalid RFC 3339 datetime '{}': {}", s, e)),
                Json::Number(n) => {
                    let millis = n.as_i64().ok_or_else(mismatch)?;
                    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
                        .map(Value::DateTime)
                        .map_err(|e| format!("timestamp {} out of range: {}", millis, e))
                }
                _ => Err(mismatch()),
            },
            ScalarKind::BigInt => match json {
                Json::Number(n) if n.is_i64() || n.is_u64() => BigInt::from_str(&n.to_string())
                    .map(Value::BigInt)
                    .map_err(|e| e.to_string()),
                Json::String(s) => BigInt::from_str(s.trim())
                    .map(Value::BigInt)
                    .map_err(|e| format!("invalid bigint '{}': {}", s, e)),
                _ => Err(mismatch()),
            },
            ScalarKind::Decimal => match json {
                Json::Number(n) => Decimal::from_str(&n.to_string())
                    .or_else(|_| Decimal::from_scientific(&n.to_string()))
                    .map(Value::Decimal)
                    .map_err(|e| e.to_string()),
                Json::String(s) => Decimal::from_str(s.trim())
                    .map(Value::Decimal)
                    .map_err(|e| format!("invalid decimal '{}': {}", s, e)),
                _ => Err(mismatch()),
            },
        }
    }
}

/// Declared default of a field
///
/// Written the way schema files spell it: `autoincrement()`, `uuid()`,
/// `cuid()` and `now()` are generators, anything else is a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    AutoIncrement,
    Uuid,
    Cuid,
    Now,
    Value(Json),
}

impl DefaultValue {
    /// Whether the value is produced at create time rather than declared
    pub fn is_generated(&self) -> bool {
        !matches!(self, DefaultValue::Value(_))
    }
}

impl From<Json> for DefaultValue {
    fn from(json: Json) -> Self {
        match json.as_str() {
            Some("autoincrement()") => DefaultValue::AutoIncrement,
            Some("uuid()") => DefaultValue::Uuid,
            Some("cuid()") => DefaultValue::Cuid,
            Some("now()") => DefaultValue::Now,
            _ => DefaultValue::Value(json),
        }
    }
}

impl From<DefaultValue> for Json {
    fn from(default: DefaultValue) -> Self {
        match default {
            DefaultValue::AutoIncrement => Json::from("autoincrement()"),
            DefaultValue::Uuid => Json::from("uuid()"),
            DefaultValue::Cuid => Json::from("cuid()"),
            DefaultValue::Now => Json::from("now()"),
            DefaultValue::Value(json) => json,
        }
    }
}

impl Serialize for DefaultValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Json::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DefaultValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Json::deserialize(deserializer).map(DefaultValue::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capability_table() {
        assert!(ScalarKind::String.capabilities().textual);
        assert!(!ScalarKind::Int.capabilities().textual);
        assert!(ScalarKind::Decimal.capabilities().arithmetic);
        assert!(!ScalarKind::Boolean.capabilities().ordered);
    }

    #[test]
    fn test_loose_coercion() {
        let dt = ScalarKind::DateTime.coerce(&json!("2024-01-15T10:00:00Z")).unwrap();
        let from_millis = ScalarKind::DateTime.coerce(&json!(1_705_312_800_000i64)).unwrap();
        assert_eq!(dt, from_millis);

        assert_eq!(
            ScalarKind::BigInt.coerce(&json!("123456789012345678901234567890")).unwrap(),
            Value::BigInt(BigInt::from_str("123456789012345678901234567890").unwrap())
        );
        assert_eq!(
            ScalarKind::Decimal.coerce(&json!("10.25")).unwrap(),
            Value::Decimal(Decimal::from_str("10.25").unwrap())
        );
        assert_eq!(ScalarKind::Bytes.coerce(&json!([1, 2, 255])).unwrap(), Value::Bytes(vec![1, 2, 255]));
        assert_eq!(ScalarKind::Int.coerce(&json!(null)).unwrap(), Value::Null);
    }

    #[test]
    fn test_coercion_mismatch() {
        assert!(ScalarKind::Int.coerce(&json!("7")).is_err());
        assert!(ScalarKind::Bytes.coerce(&json!([256])).is_err());
        assert!(ScalarKind::DateTime.coerce(&json!("yesterday")).is_err());
    }

    #[test]
    fn test_default_spelling() {
        assert_eq!(DefaultValue::from(json!("autoincrement()")), DefaultValue::AutoIncrement);
        assert_eq!(DefaultValue::from(json!("member")), DefaultValue::Value(json!("member")));
        let yaml: DefaultValue = serde_yaml::from_str("now()").unwrap();
        assert_eq!(yaml, DefaultValue::Now);
    }
}
