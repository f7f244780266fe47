use crate::error::{MarshalError, Result};
use crate::protocol::guid::SqlGuid;
use crate::protocol::numeric::render_decimal;
use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A host-side value crossing the driver boundary in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Decimal(BigDecimal),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Uuid(Uuid),
}

impl HostValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::Float(_) => "float",
            HostValue::Str(_) => "str",
            HostValue::Bytes(_) => "bytes",
            HostValue::Decimal(_) => "decimal",
            HostValue::Date(_) => "date",
            HostValue::Time(_) => "time",
            HostValue::DateTime(_) => "datetime",
            HostValue::DateTimeOffset(_) => "datetimeoffset",
            HostValue::Uuid(_) => "uuid",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    /// Only string and byte values can be sent through `SQLPutData`.
    pub fn is_streamable(&self) -> bool {
        matches!(self, HostValue::Str(_) | HostValue::Bytes(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            HostValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HostValue::Int(n) => Some(*n),
            HostValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Float(f) => Some(*f),
            HostValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Integer extraction bounded to `T`, failing with a range error naming
    /// the parameter position.
    pub fn to_bounded_int<T>(&self, index: usize) -> Result<Option<T>>
    where
        T: TryFrom<i64>,
    {
        let Some(n) = self.as_i64() else {
            return Ok(None);
        };
        T::try_from(n).map(Some).map_err(|_| {
            MarshalError::Range(format!(
                "integer {} out of range for {} (parameter {})",
                n,
                std::any::type_name::<T>(),
                index
            ))
        })
    }

    /// Display form used by `Row` rendering and JSON export.
    pub fn to_text(&self) -> Option<String> {
        match self {
            HostValue::Null => None,
            HostValue::Bool(b) => Some(b.to_string()),
            HostValue::Int(n) => Some(n.to_string()),
            HostValue::Float(f) => Some(f.to_string()),
            HostValue::Str(s) => Some(s.clone()),
            HostValue::Bytes(b) => Some(b.iter().map(|x| format!("{:02X}", x)).collect()),
            HostValue::Decimal(d) => Some(render_decimal(d)),
            HostValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            HostValue::Time(t) => Some(t.format("%H:%M:%S%.f").to_string()),
            HostValue::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            HostValue::DateTimeOffset(dt) => {
                Some(dt.format("%Y-%m-%d %H:%M:%S%.f %:z").to_string())
            }
            HostValue::Uuid(u) => Some(SqlGuid::from(u).to_hyphenated()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            HostValue::Null => JsonValue::Null,
            HostValue::Bool(b) => JsonValue::Bool(*b),
            HostValue::Int(n) => JsonValue::from(*n),
            HostValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            other => other
                .to_text()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}

impl<T> From<Option<T>> for HostValue
where
    T: Into<HostValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(HostValue::Null)
    }
}

macro_rules! host_value_from {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for HostValue {
                fn from(value: $ty) -> Self {
                    HostValue::$variant(value $(as $cast)?)
                }
            }
        )*
    };
}

host_value_from! {
    bool => Bool,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int,
    u8 => Int as i64,
    u16 => Int as i64,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float,
    String => Str,
    Vec<u8> => Bytes,
    BigDecimal => Decimal,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<FixedOffset> => DateTimeOffset,
    Uuid => Uuid,
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::Str(value.to_string())
    }
}

impl From<&[u8]> for HostValue {
    fn from(value: &[u8]) -> Self {
        HostValue::Bytes(value.to_vec())
    }
}
