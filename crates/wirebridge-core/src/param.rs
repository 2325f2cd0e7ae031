//! Typed parameters
//!
//! A [`TypedParameter`] is a named single-value cell bound to a wire type.
//! It carries a default and a current value, can be merged from text, JSON
//! or another cell of the same name, and writes itself into a
//! [`WireBuffer`] using the writer of its wire type.
//!
//! Temporal cells hold raw ticks: days for `Date`, seconds for `DateTime`
//! and `10^-scale` seconds for `DateTime64`. Their text form also accepts
//! `YYYY-MM-DD` and `YYYY-MM-DD hh:mm:ss[.fff]` literals, read as UTC.

use bigdecimal::num_bigint::BigInt;
use bigdecimal::num_traits::{ToPrimitive, Zero};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value as JsonValue;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use uuid::Uuid;
use wirebridge_common::{BridgeError, Result};

use crate::buffer::WireBuffer;
use crate::types::{ValueKind, WireType};

/// Canonical all-zero UUID
pub const ZERO_UUID: &str = "00000000-0000-0000-0000-000000000000";

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// A strongly typed single value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    BigInt(BigInt),
    Decimal(BigDecimal),
    Str(String),
}

impl ParamValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ParamValue::Bool(_) => ValueKind::Bool,
            ParamValue::Int(_) => ValueKind::Int,
            ParamValue::Long(_) => ValueKind::Long,
            ParamValue::Float(_) => ValueKind::Float,
            ParamValue::Double(_) => ValueKind::Double,
            ParamValue::BigInt(_) => ValueKind::BigInt,
            ParamValue::Decimal(_) => ValueKind::Decimal,
            ParamValue::Str(_) => ValueKind::Str,
        }
    }

    /// Canonical zero value of a wire type
    pub fn zero(wire_type: WireType) -> ParamValue {
        match wire_type.value_kind() {
            ValueKind::Bool => ParamValue::Bool(false),
            ValueKind::Int => ParamValue::Int(0),
            // epoch floor, the smallest value the engine stores for temporals
            ValueKind::Long if wire_type.is_temporal() => ParamValue::Long(1),
            ValueKind::Long => ParamValue::Long(0),
            ValueKind::Float => ParamValue::Float(0.0),
            ValueKind::Double => ParamValue::Double(0.0),
            ValueKind::BigInt => ParamValue::BigInt(BigInt::zero()),
            ValueKind::Decimal => ParamValue::Decimal(BigDecimal::zero()),
            ValueKind::Str => ParamValue::Str(
                match wire_type {
                    WireType::UUID => ZERO_UUID,
                    WireType::IPv4 => "0.0.0.0",
                    WireType::IPv6 => "::",
                    _ => "",
                }
                .to_string(),
            ),
        }
    }

    /// Parse text into the representation used by `wire_type`.
    /// `scale` is the tick scale of `DateTime64` values.
    pub fn parse(text: &str, wire_type: WireType, scale: u32) -> Result<ParamValue> {
        let trimmed = text.trim();
        let invalid = || {
            BridgeError::invalid_argument(format!("cannot parse '{}' as {}", text, wire_type))
        };
        let value = match wire_type.value_kind() {
            ValueKind::Bool => ParamValue::Bool(parse_bool(trimmed).ok_or_else(invalid)?),
            ValueKind::Int => ParamValue::Int(trimmed.parse().map_err(|_| invalid())?),
            ValueKind::Long if wire_type.is_temporal() => {
                ParamValue::Long(parse_temporal(trimmed, wire_type, scale).ok_or_else(invalid)?)
            }
            ValueKind::Long => ParamValue::Long(trimmed.parse().map_err(|_| invalid())?),
            ValueKind::Float => ParamValue::Float(trimmed.parse().map_err(|_| invalid())?),
            ValueKind::Double => ParamValue::Double(trimmed.parse().map_err(|_| invalid())?),
            ValueKind::BigInt => ParamValue::BigInt(BigInt::from_str(trimmed).map_err(|_| invalid())?),
            ValueKind::Decimal => {
                ParamValue::Decimal(BigDecimal::from_str(trimmed).map_err(|_| invalid())?)
            }
            ValueKind::Str => ParamValue::Str(text.to_string()),
        };
        Ok(value)
    }

    /// Convert a JSON scalar, `None` for JSON `null`
    pub fn from_json(value: &JsonValue, wire_type: WireType, scale: u32) -> Result<Option<ParamValue>> {
        let kind = wire_type.value_kind();
        let invalid = || {
            BridgeError::invalid_argument(format!("cannot convert {} to {}", value, wire_type))
        };
        let converted = match value {
            JsonValue::Null => return Ok(None),
            JsonValue::String(s) => ParamValue::parse(s, wire_type, scale)?,
            JsonValue::Bool(b) => match kind {
                ValueKind::Bool => ParamValue::Bool(*b),
                ValueKind::Str => ParamValue::Str(b.to_string()),
                _ => ParamValue::parse(if *b { "1" } else { "0" }, wire_type, scale)?,
            },
            JsonValue::Number(n) => match kind {
                ValueKind::Bool => ParamValue::Bool(n.as_f64().map(|f| f != 0.0).ok_or_else(invalid)?),
                ValueKind::Int => ParamValue::Int(
                    n.as_i64()
                        .and_then(|v| i32::try_from(v).ok())
                        .ok_or_else(invalid)?,
                ),
                ValueKind::Long => ParamValue::Long(n.as_i64().ok_or_else(invalid)?),
                ValueKind::Float => ParamValue::Float(n.as_f64().ok_or_else(invalid)? as f32),
                ValueKind::Double => ParamValue::Double(n.as_f64().ok_or_else(invalid)?),
                ValueKind::Str => ParamValue::Str(n.to_string()),
                ValueKind::BigInt | ValueKind::Decimal => ParamValue::parse(&n.to_string(), wire_type, scale)?,
            },
            JsonValue::Array(_) | JsonValue::Object(_) => match kind {
                ValueKind::Str => ParamValue::Str(value.to_string()),
                _ => return Err(invalid()),
            },
        };
        Ok(Some(converted))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            ParamValue::Str(s) => parse_bool(s.trim()),
            other => other.as_f64().map(|v| v != 0.0),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Bool(b) => Some(*b as i64),
            ParamValue::Int(v) => Some(*v as i64),
            ParamValue::Long(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 => v.to_i64(),
            ParamValue::Double(v) if v.fract() == 0.0 => v.to_i64(),
            ParamValue::BigInt(v) => v.to_i64(),
            ParamValue::Decimal(v) if v.is_integer() => v.to_i64(),
            ParamValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Bool(b) => Some(*b as i64 as f64),
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Long(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v as f64),
            ParamValue::Double(v) => Some(*v),
            ParamValue::BigInt(v) => v.to_f64(),
            ParamValue::Decimal(v) => v.to_f64(),
            ParamValue::Str(s) => s.trim().parse().ok(),
        }
    }

    pub fn to_bigint(&self) -> Option<BigInt> {
        match self {
            ParamValue::BigInt(v) => Some(v.clone()),
            ParamValue::Decimal(v) if v.is_integer() => {
                let (digits, exp) = v.with_scale(0).into_bigint_and_exponent();
                (exp == 0).then_some(digits)
            }
            ParamValue::Str(s) => BigInt::from_str(s.trim()).ok(),
            other => other.as_i64().map(BigInt::from),
        }
    }

    pub fn to_decimal(&self) -> Option<BigDecimal> {
        match self {
            ParamValue::Decimal(v) => Some(v.clone()),
            ParamValue::BigInt(v) => Some(BigDecimal::from(v.clone())),
            ParamValue::Int(v) => Some(BigDecimal::from(*v)),
            ParamValue::Long(v) => Some(BigDecimal::from(*v)),
            ParamValue::Float(v) => BigDecimal::from_str(&v.to_string()).ok(),
            ParamValue::Double(v) => BigDecimal::from_str(&v.to_string()).ok(),
            ParamValue::Str(s) => BigDecimal::from_str(s.trim()).ok(),
            ParamValue::Bool(b) => Some(BigDecimal::from(*b as i32)),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Long(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Double(v) => write!(f, "{}", v),
            ParamValue::BigInt(v) => write!(f, "{}", v),
            ParamValue::Decimal(v) => write!(f, "{}", v),
            ParamValue::Str(v) => f.write_str(v),
        }
    }
}

/// Layout applied when writing a value. `None` falls back to the wire type's default.
#[derive(Debug, Clone, Default)]
pub struct ValueFormat {
    /// `FixedString` width
    pub length: Option<usize>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub timezone: Option<Tz>,
}

impl ValueFormat {
    /// Effective precision and scale for `wire_type`, scale never above precision
    pub fn resolve(&self, wire_type: WireType) -> (u32, u32) {
        let precision = if wire_type.is_sized_decimal() {
            wire_type.max_precision()
        } else {
            self.precision
                .filter(|p| *p > 0)
                .map(|p| p.min(wire_type.max_precision().max(1)))
                .unwrap_or_else(|| wire_type.default_precision())
        };
        let scale = self
            .scale
            .unwrap_or_else(|| wire_type.default_scale())
            .min(wire_type.max_scale().max(wire_type.default_scale()));
        (precision, scale.min(precision))
    }
}

/// Write `value` using the writer of `wire_type`
pub fn write_value(
    buf: &mut WireBuffer,
    wire_type: WireType,
    value: &ParamValue,
    format: &ValueFormat,
    source_scale: u32,
) -> Result<()> {
    let mismatch = || BridgeError::encode(format!("cannot write '{}' as {}", value, wire_type));
    let tz = format.timezone.as_ref();
    match wire_type {
        WireType::Bool => {
            buf.write_bool(value.as_bool().ok_or_else(mismatch)?);
        }
        WireType::Int8 | WireType::Enum | WireType::Enum8 => {
            buf.write_int8(small_int(value).ok_or_else(mismatch)?)?;
        }
        WireType::Int16 | WireType::Enum16 => {
            buf.write_int16(small_int(value).ok_or_else(mismatch)?)?;
        }
        WireType::UInt8 => {
            buf.write_uint8(small_int(value).ok_or_else(mismatch)?)?;
        }
        WireType::UInt16 => {
            buf.write_uint16(small_int(value).ok_or_else(mismatch)?)?;
        }
        WireType::Int32 => {
            buf.write_int32(value.as_i64().ok_or_else(mismatch)?)?;
        }
        WireType::UInt32 => {
            buf.write_uint32(value.as_i64().ok_or_else(mismatch)?)?;
        }
        WireType::Int64 => {
            buf.write_int64(value.as_i64().ok_or_else(mismatch)?);
        }
        WireType::UInt64 => {
            buf.write_uint64_big(&value.to_bigint().ok_or_else(mismatch)?)?;
        }
        WireType::Int128 => {
            buf.write_int128(&value.to_bigint().ok_or_else(mismatch)?)?;
        }
        WireType::UInt128 => {
            buf.write_uint128(&value.to_bigint().ok_or_else(mismatch)?)?;
        }
        WireType::Int256 => {
            buf.write_int256(&value.to_bigint().ok_or_else(mismatch)?)?;
        }
        WireType::UInt256 => {
            buf.write_uint256(&value.to_bigint().ok_or_else(mismatch)?)?;
        }
        WireType::Float32 => {
            buf.write_float32(value.as_f64().ok_or_else(mismatch)? as f32);
        }
        WireType::Float64 => {
            buf.write_float64(value.as_f64().ok_or_else(mismatch)?);
        }
        WireType::Decimal
        | WireType::Decimal32
        | WireType::Decimal64
        | WireType::Decimal128
        | WireType::Decimal256 => {
            let (precision, scale) = format.resolve(wire_type);
            buf.write_decimal(&value.to_decimal().ok_or_else(mismatch)?, precision, scale)?;
        }
        WireType::Date => {
            // day counts are calendar days already, a zone offset would move them
            buf.write_date_days(value.as_i64().ok_or_else(mismatch)?);
        }
        WireType::DateTime => {
            let secs = value.as_i64().ok_or_else(mismatch)?;
            match (tz, instant(secs, 0)) {
                (Some(tz), Some(at)) => buf.write_datetime(&at, Some(tz)),
                _ => buf.write_datetime_secs(secs),
            };
        }
        WireType::DateTime64 => {
            let (_, scale) = format.resolve(wire_type);
            let ticks = rescale_ticks(value.as_i64().ok_or_else(mismatch)?, source_scale, scale);
            let unit = 10i64.pow(scale);
            let at = instant(ticks.div_euclid(unit), 0);
            match (tz, at) {
                (Some(tz), Some(at)) => {
                    let shift = crate::buffer::offset_seconds(&at, Some(tz)).saturating_mul(unit);
                    buf.write_datetime64_ticks(ticks.saturating_add(shift))
                }
                _ => buf.write_datetime64_ticks(ticks),
            };
        }
        WireType::IPv4 => {
            let addr = match value {
                ParamValue::Str(s) => Ipv4Addr::from_str(s.trim()).map_err(|_| mismatch())?,
                other => Ipv4Addr::from(
                    other
                        .as_i64()
                        .and_then(|v| u32::try_from(v).ok())
                        .ok_or_else(mismatch)?,
                ),
            };
            buf.write_ipv4(&addr);
        }
        WireType::IPv6 => {
            let text = value.as_str().ok_or_else(mismatch)?;
            buf.write_ipv6(&Ipv6Addr::from_str(text.trim()).map_err(|_| mismatch())?);
        }
        WireType::UUID => {
            let text = value.as_str().ok_or_else(mismatch)?;
            buf.write_uuid(&Uuid::parse_str(text.trim()).map_err(|_| mismatch())?);
        }
        WireType::FixedString => {
            let text = value.to_string();
            let length = format.length.unwrap_or(text.len()).max(1);
            buf.write_fixed_string(text.as_bytes(), length)?;
            buf.write_zeros(length - text.len());
        }
        WireType::String => {
            buf.write_string(&value.to_string(), false)?;
        }
    }
    Ok(())
}

/// Convert ticks between `DateTime64` scales, rounding towards negative infinity
pub fn rescale_ticks(ticks: i64, from_scale: u32, to_scale: u32) -> i64 {
    let (from, to) = (from_scale.min(9), to_scale.min(9));
    if to >= from {
        ticks.saturating_mul(10i64.pow(to - from))
    } else {
        ticks.div_euclid(10i64.pow(from - to))
    }
}

/// A named, typed value cell
#[derive(Debug, Clone, PartialEq)]
pub struct TypedParameter {
    name: String,
    wire_type: WireType,
    default: ParamValue,
    value: ParamValue,
    scale: u32,
}

impl TypedParameter {
    /// Cell holding the wire type's zero value
    pub fn new(name: impl Into<String>, wire_type: WireType) -> Self {
        Self::with_default(name, wire_type, ParamValue::zero(wire_type))
    }

    pub fn with_default(name: impl Into<String>, wire_type: WireType, default: ParamValue) -> Self {
        Self {
            name: name.into(),
            wire_type,
            value: default.clone(),
            default,
            scale: wire_type.default_scale(),
        }
    }

    /// Cell whose wire type is inferred from the value kind
    pub fn of(name: impl Into<String>, default: ParamValue) -> Self {
        let wire_type = WireType::for_kind(default.kind());
        Self::with_default(name, wire_type, default)
    }

    /// Tick scale for `DateTime64` cells
    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = scale.min(9);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    pub fn kind(&self) -> ValueKind {
        self.wire_type.value_kind()
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn value(&self) -> &ParamValue {
        &self.value
    }

    pub fn default_value(&self) -> &ParamValue {
        &self.default
    }

    /// Current value differs from the default
    pub fn is_customized(&self) -> bool {
        self.value != self.default
    }

    /// Merge from text. Absent or empty input leaves the value untouched.
    /// Malformed input fails for numeric kinds and is ignored otherwise.
    pub fn merge_str(&mut self, text: Option<&str>) -> Result<()> {
        let text = match text {
            Some(t) if !t.is_empty() => t,
            _ => return Ok(()),
        };
        match ParamValue::parse(text, self.wire_type, self.scale) {
            Ok(v) => self.value = v,
            Err(e) if self.kind().is_numeric() => return Err(e),
            Err(_) => {}
        }
        Ok(())
    }

    /// Merge a JSON scalar. `null` leaves the value untouched.
    pub fn merge_json_value(&mut self, value: &JsonValue) -> Result<()> {
        if let JsonValue::String(s) = value {
            return self.merge_str(Some(s));
        }
        match ParamValue::from_json(value, self.wire_type, self.scale) {
            Ok(Some(v)) => self.value = v,
            Ok(None) => {}
            Err(e) if self.kind().is_numeric() => return Err(e),
            Err(_) => {}
        }
        Ok(())
    }

    /// Merge the entry named like this cell from a JSON object
    pub fn merge_object(&mut self, object: &serde_json::Map<String, JsonValue>) -> Result<()> {
        match object.get(&self.name) {
            Some(value) => self.merge_json_value(value),
            None => Ok(()),
        }
    }

    /// Take the value of another cell with the same name
    pub fn merge(&mut self, other: &TypedParameter) -> bool {
        if other.name != self.name {
            return false;
        }
        self.value = other.value.clone();
        true
    }

    /// Write the current value with the writer of this cell's wire type
    pub fn write_value_to(&self, buf: &mut WireBuffer, format: &ValueFormat) -> Result<()> {
        write_value(buf, self.wire_type, &self.value, format, self.scale)
    }
}

fn small_int(value: &ParamValue) -> Option<i32> {
    value.as_i64().and_then(|v| i32::try_from(v).ok())
}

fn instant(secs: i64, nanos: u32) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, nanos).single()
}

/// `true/false/1/0/yes/no`, case-insensitive
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Ticks of a temporal literal: an integer, a date or a date-time (UTC)
fn parse_temporal(text: &str, wire_type: WireType, scale: u32) -> Option<i64> {
    if let Ok(ticks) = text.parse::<i64>() {
        return Some(ticks);
    }
    let at = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?
        .and_utc();

    match wire_type {
        WireType::Date => Some(at.timestamp().div_euclid(86_400)),
        WireType::DateTime => Some(at.timestamp()),
        _ => i64::try_from(crate::buffer::datetime64_ticks(&at, scale, None)).ok(),
    }
}
