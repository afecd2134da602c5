use std::cmp::Ordering;
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::EngineError;
use crate::util;

pub const GEOMETRIC_SIZE: usize = 32;
pub const JSON_SIZE: usize = 1024;
pub const DECIMAL_SIZE: usize = 16;

/// Scalar type tags. The discriminant is the on-disk tag stored in every
/// self-identifying index header.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, TryFromPrimitive,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum DataTypeTag {
    SmallInt = 0,
    Int = 1,
    BigInt = 2,
    Double = 3,
    Char = 4,
    Varchar = 5,
    Boolean = 6,
    Uuid = 7,
    Date = 8,
    Time = 9,
    Timestamp = 10,
    Geometric = 11,
    Json = 12,
    Decimal = 13,
}

/// Packed width in bytes of a value of the given tag. `max_len` only
/// matters for the length-parameterized string types.
pub fn type_size(tag: DataTypeTag, max_len: usize) -> usize {
    match tag {
        DataTypeTag::SmallInt => 2,
        DataTypeTag::Int => 4,
        DataTypeTag::BigInt => 8,
        DataTypeTag::Double => 8,
        DataTypeTag::Char => max_len,
        DataTypeTag::Varchar => max_len,
        DataTypeTag::Boolean => 1,
        DataTypeTag::Uuid => 16,
        DataTypeTag::Date => 4,
        DataTypeTag::Time => 8,
        DataTypeTag::Timestamp => 8,
        DataTypeTag::Geometric => GEOMETRIC_SIZE,
        DataTypeTag::Json => JSON_SIZE,
        DataTypeTag::Decimal => DECIMAL_SIZE,
    }
}

/// A typed scalar. The all-zero payload is the null sentinel in both
/// directions, so zero integers and `false` round-trip to `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Char(String),
    Varchar(String),
    Boolean(bool),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Geometric(String),
    Json(serde_json::Value),
    Decimal(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Key-domain comparison. Within one index every key shares a tag, so
    /// the same-variant arms carry the ordering; the string fallback only
    /// fires for heterogeneous operands.
    pub fn key_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::SmallInt(a), Value::SmallInt(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::BigInt(a), Value::BigInt(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Char(a), Value::Char(b)) => a.cmp(b),
            (Value::Varchar(a), Value::Varchar(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Geometric(a), Value::Geometric(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => match (a.parse::<f64>(), b.parse::<f64>()) {
                (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.cmp(b),
            },
            _ => self.to_string().cmp(&other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "{}", v),
            Value::Varchar(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Uuid(v) => write!(f, "{}", v),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::Time(v) => write!(f, "{}", v.format("%H:%M:%S")),
            Value::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
            Value::Geometric(v) => write!(f, "{}", v),
            Value::Json(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
        }
    }
}

fn pad_text(text: &str, width: usize) -> Result<Vec<u8>> {
    let raw = text.as_bytes();
    if raw.len() > width {
        return Err(EngineError::ValueTooLong {
            len: raw.len(),
            max: width,
        }
        .into());
    }
    let mut buf = raw.to_vec();
    buf.resize(width, 0);
    Ok(buf)
}

fn mismatch(value: &Value, tag: DataTypeTag) -> anyhow::Error {
    EngineError::ValueOutOfRange {
        value: value.to_string(),
        type_name: tag.to_string(),
    }
    .into()
}

/// Serialize a value into exactly `type_size(tag, max_len)` bytes,
/// little-endian, NUL-padded.
pub fn serialize(value: &Value, tag: DataTypeTag, max_len: usize) -> Result<Vec<u8>> {
    let width = type_size(tag, max_len);
    if value.is_null() {
        return Ok(vec![0u8; width]);
    }

    match (tag, value) {
        (DataTypeTag::SmallInt, Value::SmallInt(v)) => Ok(v.to_le_bytes().to_vec()),
        (DataTypeTag::Int, Value::Int(v)) => Ok(v.to_le_bytes().to_vec()),
        (DataTypeTag::BigInt, Value::BigInt(v)) => Ok(v.to_le_bytes().to_vec()),
        (DataTypeTag::Double, Value::Double(v)) => Ok(v.to_le_bytes().to_vec()),
        (DataTypeTag::Char, Value::Char(v)) | (DataTypeTag::Char, Value::Varchar(v)) => {
            pad_text(v, width)
        }
        (DataTypeTag::Varchar, Value::Varchar(v)) | (DataTypeTag::Varchar, Value::Char(v)) => {
            pad_text(v, width)
        }
        (DataTypeTag::Boolean, Value::Boolean(v)) => Ok(vec![*v as u8]),
        (DataTypeTag::Uuid, Value::Uuid(v)) => Ok(v.as_bytes().to_vec()),
        (DataTypeTag::Date, Value::Date(v)) => {
            let packed = v.year() as u32 * 10_000 + v.month() * 100 + v.day();
            Ok(packed.to_le_bytes().to_vec())
        }
        (DataTypeTag::Time, Value::Time(v)) => {
            let packed = v.hour() as u64 * 10_000_000_000
                + v.minute() as u64 * 100_000_000
                + v.second() as u64 * 1_000_000
                + (v.nanosecond() / 1_000) as u64;
            Ok(packed.to_le_bytes().to_vec())
        }
        (DataTypeTag::Timestamp, Value::Timestamp(v)) => {
            let secs = v.and_utc().timestamp();
            if secs < 0 {
                return Err(mismatch(value, tag));
            }
            Ok((secs as u64).to_le_bytes().to_vec())
        }
        (DataTypeTag::Geometric, Value::Geometric(v)) => pad_text(v, width),
        (DataTypeTag::Json, Value::Json(v)) => pad_text(&v.to_string(), width),
        (DataTypeTag::Decimal, Value::Decimal(v)) => pad_text(v, width),
        _ => Err(mismatch(value, tag)),
    }
}

/// Deserialize the leading `type_size(tag, max_len)` bytes of `data`.
pub fn deserialize(data: &[u8], tag: DataTypeTag, max_len: usize) -> Result<Value> {
    let width = type_size(tag, max_len);
    if data.len() < width {
        return Err(EngineError::ShortBlock {
            expected: width,
            got: data.len(),
        }
        .into());
    }
    let data = &data[..width];
    if util::is_all_zero(data) {
        return Ok(Value::Null);
    }

    let value = match tag {
        DataTypeTag::SmallInt => Value::SmallInt(util::i16_val(data, 0)),
        DataTypeTag::Int => Value::Int(util::i32_val(data, 0)),
        DataTypeTag::BigInt => Value::BigInt(util::i64_val(data, 0)),
        DataTypeTag::Double => Value::Double(util::f64_val(data, 0)),
        DataTypeTag::Char => Value::Char(text_from(data)?),
        DataTypeTag::Varchar => Value::Varchar(text_from(data)?),
        DataTypeTag::Boolean => Value::Boolean(data[0] != 0),
        DataTypeTag::Uuid => Value::Uuid(Uuid::from_slice(data)?),
        DataTypeTag::Date => {
            let packed = util::u32_val(data, 0);
            let (y, m, d) = (packed / 10_000, packed / 100 % 100, packed % 100);
            let date = NaiveDate::from_ymd_opt(y as i32, m, d)
                .ok_or_else(|| EngineError::BadTemporalValue(format!("packed date {}", packed)))?;
            Value::Date(date)
        }
        DataTypeTag::Time => {
            let packed = util::u64_val(data, 0);
            let (h, m) = (packed / 10_000_000_000, packed / 100_000_000 % 100);
            let (s, us) = (packed / 1_000_000 % 100, packed % 1_000_000);
            let time = NaiveTime::from_hms_micro_opt(h as u32, m as u32, s as u32, us as u32)
                .ok_or_else(|| EngineError::BadTemporalValue(format!("packed time {}", packed)))?;
            Value::Time(time)
        }
        DataTypeTag::Timestamp => {
            let secs = util::u64_val(data, 0);
            let ts = DateTime::from_timestamp(secs as i64, 0)
                .ok_or_else(|| EngineError::BadTemporalValue(format!("epoch {}", secs)))?;
            Value::Timestamp(ts.naive_utc())
        }
        DataTypeTag::Geometric => Value::Geometric(text_from(data)?),
        DataTypeTag::Json => Value::Json(serde_json::from_slice(util::trim_nul(data))?),
        DataTypeTag::Decimal => Value::Decimal(text_from(data)?),
    };
    Ok(value)
}

fn text_from(data: &[u8]) -> Result<String> {
    Ok(String::from_utf8(util::trim_nul(data).to_vec())?)
}

/// Convert a text literal (SQL string literal, CSV field) into a typed
/// value. Empty text maps to `Null`.
pub fn parse_text(text: &str, tag: DataTypeTag) -> Result<Value> {
    if text.is_empty() {
        return Ok(Value::Null);
    }
    let out_of_range = || EngineError::ValueOutOfRange {
        value: text.to_string(),
        type_name: tag.to_string(),
    };

    let value = match tag {
        DataTypeTag::SmallInt => Value::SmallInt(text.parse().map_err(|_| out_of_range())?),
        DataTypeTag::Int => Value::Int(text.parse().map_err(|_| out_of_range())?),
        DataTypeTag::BigInt => Value::BigInt(text.parse().map_err(|_| out_of_range())?),
        DataTypeTag::Double => Value::Double(text.parse().map_err(|_| out_of_range())?),
        DataTypeTag::Char => Value::Char(text.to_string()),
        DataTypeTag::Varchar => Value::Varchar(text.to_string()),
        DataTypeTag::Boolean => {
            Value::Boolean(matches!(text.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        }
        DataTypeTag::Uuid => Value::Uuid(Uuid::parse_str(text).map_err(|_| out_of_range())?),
        DataTypeTag::Date => {
            let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map_err(|_| EngineError::BadTemporalValue(text.to_string()))?;
            Value::Date(date)
        }
        DataTypeTag::Time => {
            let time = NaiveTime::parse_from_str(text, "%H:%M:%S")
                .map_err(|_| EngineError::BadTemporalValue(text.to_string()))?;
            Value::Time(time)
        }
        DataTypeTag::Timestamp => {
            let ts = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .map_err(|_| EngineError::BadTemporalValue(text.to_string()))?;
            Value::Timestamp(ts)
        }
        DataTypeTag::Geometric => Value::Geometric(text.to_string()),
        DataTypeTag::Json => Value::Json(serde_json::from_str(text)?),
        DataTypeTag::Decimal => {
            text.parse::<f64>().map_err(|_| out_of_range())?;
            Value::Decimal(text.to_string())
        }
    };
    Ok(value)
}
