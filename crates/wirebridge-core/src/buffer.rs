//! Wire buffer
//!
//! A growable byte buffer with a read cursor, exposing the typed primitives
//! of the engine's binary row format:
//!
//! - fixed-width integers and floats, little-endian
//! - 128/256-bit integers as little-endian two's complement
//! - decimals as scaled integers whose width follows the precision tier
//! - `Date` as u16 days, `DateTime` as u32 seconds, `DateTime64` as u64 ticks
//! - strings with an unsigned LEB128 length prefix
//!
//! Writes always append. Reads always advance the cursor.
//!
//! ## Signed to unsigned promotion
//!
//! `write_int8`, `write_int16` and `write_int32` accept values above the
//! signed maximum as long as they fit the unsigned type of the same width,
//! and write them through the unsigned writer. This matches what upstream
//! readers hand us for unsigned columns declared with a signed type.

use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::{BigDecimal, RoundingMode};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Days, NaiveDate, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use std::net::{Ipv4Addr, Ipv6Addr};
use uuid::Uuid;
use wirebridge_common::{BridgeError, Result};

use crate::types::decimal_byte_length;

/// Most groups a length prefix may use
const MAX_VARINT_GROUPS: usize = 5;

const SECONDS_PER_DAY: i64 = 86_400;

/// Largest value a `Date` column can hold (days since epoch)
pub const MAX_DATE_DAYS: i64 = u16::MAX as i64;
/// Largest value a `DateTime` column can hold (seconds since epoch)
pub const MAX_DATETIME_SECONDS: i64 = u32::MAX as i64;

/// Growable byte buffer with a read cursor
#[derive(Debug, Default, Clone)]
pub struct WireBuffer {
    buf: BytesMut,
    pos: usize,
}

impl WireBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            pos: 0,
        }
    }

    /// Wrap existing bytes for reading
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self {
            buf: BytesMut::from(bytes.as_ref()),
            pos: 0,
        }
    }

    /// Total bytes written
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes left between the read cursor and the end
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current read cursor
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Convert the written bytes into an immutable `Bytes`
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(BridgeError::decode(format!(
                "unexpected end of buffer: need {} bytes at offset {}, {} available",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..start + n])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    // ===== LEB128 =====

    pub fn write_unsigned_varint(&mut self, mut value: u32) -> &mut Self {
        loop {
            let group = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.put_u8(group);
                break;
            }
            self.buf.put_u8(group | 0x80);
        }
        self
    }

    pub fn read_unsigned_varint(&mut self) -> Result<u32> {
        let mut result: u64 = 0;
        for group in 0..MAX_VARINT_GROUPS {
            let byte = self.take(1)?[0];
            result |= ((byte & 0x7F) as u64) << (7 * group);
            if byte & 0x80 == 0 {
                return u32::try_from(result).map_err(|_| {
                    BridgeError::decode(format!("varint value {} exceeds 32 bits", result))
                });
            }
        }
        Err(BridgeError::decode(format!(
            "malformed varint: continuation bit set after {} groups",
            MAX_VARINT_GROUPS
        )))
    }

    // ===== Fixed-width integers =====

    pub fn write_null_flag(&mut self, is_null: bool) -> &mut Self {
        self.buf.put_u8(is_null as u8);
        self
    }

    pub fn read_null_flag(&mut self) -> Result<bool> {
        Ok(self.take(1)?[0] != 0)
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.buf.put_u8(value as u8);
        self
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.take(1)?[0] != 0)
    }

    /// Signed byte, promoted to `UInt8` for values in `(127, 255]`
    pub fn write_int8(&mut self, value: i32) -> Result<&mut Self> {
        if i8::try_from(value).is_ok() {
            self.buf.put_i8(value as i8);
            Ok(self)
        } else if value > i8::MAX as i32 && value <= u8::MAX as i32 {
            self.write_uint8(value)
        } else {
            Err(out_of_range(value, "Int8", i8::MIN, u8::MAX))
        }
    }

    pub fn read_int8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn write_uint8(&mut self, value: i32) -> Result<&mut Self> {
        let v = u8::try_from(value).map_err(|_| out_of_range(value, "UInt8", 0, u8::MAX))?;
        self.buf.put_u8(v);
        Ok(self)
    }

    pub fn read_uint8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Signed 16-bit, promoted to `UInt16` for values in `(32767, 65535]`
    pub fn write_int16(&mut self, value: i32) -> Result<&mut Self> {
        if let Ok(v) = i16::try_from(value) {
            self.buf.put_i16_le(v);
            Ok(self)
        } else if value > i16::MAX as i32 && value <= u16::MAX as i32 {
            self.write_uint16(value)
        } else {
            Err(out_of_range(value, "Int16", i16::MIN, u16::MAX))
        }
    }

    pub fn read_int16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn write_uint16(&mut self, value: i32) -> Result<&mut Self> {
        let v = u16::try_from(value).map_err(|_| out_of_range(value, "UInt16", 0, u16::MAX))?;
        self.buf.put_u16_le(v);
        Ok(self)
    }

    pub fn read_uint16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    /// Signed 32-bit, promoted to `UInt32` for values in `(2^31-1, 2^32-1]`
    pub fn write_int32(&mut self, value: i64) -> Result<&mut Self> {
        if let Ok(v) = i32::try_from(value) {
            self.buf.put_i32_le(v);
            Ok(self)
        } else if value > i32::MAX as i64 && value <= u32::MAX as i64 {
            self.write_uint32(value)
        } else {
            Err(out_of_range(value, "Int32", i32::MIN, u32::MAX))
        }
    }

    pub fn read_int32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn write_uint32(&mut self, value: i64) -> Result<&mut Self> {
        let v = u32::try_from(value).map_err(|_| out_of_range(value, "UInt32", 0, u32::MAX))?;
        self.buf.put_u32_le(v);
        Ok(self)
    }

    pub fn read_uint32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn write_int64(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64_le(value);
        self
    }

    pub fn read_int64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn write_uint64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    /// `UInt64` from an arbitrary precision value, range-checked
    pub fn write_uint64_big(&mut self, value: &BigInt) -> Result<&mut Self> {
        self.write_big_integer(value, 8, false, "UInt64")
    }

    pub fn read_uint64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn write_int128(&mut self, value: &BigInt) -> Result<&mut Self> {
        self.write_big_integer(value, 16, true, "Int128")
    }

    pub fn read_int128(&mut self) -> Result<BigInt> {
        Ok(BigInt::from_signed_bytes_le(self.take(16)?))
    }

    pub fn write_uint128(&mut self, value: &BigInt) -> Result<&mut Self> {
        self.write_big_integer(value, 16, false, "UInt128")
    }

    pub fn read_uint128(&mut self) -> Result<BigInt> {
        Ok(BigInt::from_bytes_le(Sign::Plus, self.take(16)?))
    }

    pub fn write_int256(&mut self, value: &BigInt) -> Result<&mut Self> {
        self.write_big_integer(value, 32, true, "Int256")
    }

    pub fn read_int256(&mut self) -> Result<BigInt> {
        Ok(BigInt::from_signed_bytes_le(self.take(32)?))
    }

    pub fn write_uint256(&mut self, value: &BigInt) -> Result<&mut Self> {
        self.write_big_integer(value, 32, false, "UInt256")
    }

    pub fn read_uint256(&mut self) -> Result<BigInt> {
        Ok(BigInt::from_bytes_le(Sign::Plus, self.take(32)?))
    }

    fn write_big_integer(
        &mut self,
        value: &BigInt,
        width: usize,
        signed: bool,
        type_name: &str,
    ) -> Result<&mut Self> {
        let bytes = if signed {
            let mut bytes = value.to_signed_bytes_le();
            if bytes.len() > width {
                return Err(big_out_of_range(value, type_name, width, signed));
            }
            let fill = if value.sign() == Sign::Minus { 0xFF } else { 0x00 };
            bytes.resize(width, fill);
            bytes
        } else {
            if value.sign() == Sign::Minus {
                return Err(big_out_of_range(value, type_name, width, signed));
            }
            let (_, mut bytes) = value.to_bytes_le();
            if bytes.len() > width {
                return Err(big_out_of_range(value, type_name, width, signed));
            }
            bytes.resize(width, 0);
            bytes
        };
        self.buf.put_slice(&bytes);
        Ok(self)
    }

    // ===== Floating point =====

    pub fn write_float32(&mut self, value: f32) -> &mut Self {
        self.buf.put_u32_le(value.to_bits());
        self
    }

    pub fn read_float32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_uint32()?))
    }

    pub fn write_float64(&mut self, value: f64) -> &mut Self {
        self.buf.put_u64_le(value.to_bits());
        self
    }

    pub fn read_float64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_uint64()?))
    }

    // ===== Decimal =====

    /// Scaled integer whose width follows the precision tier (4/8/16/32 bytes).
    /// The value is rounded half-up to `scale` digits.
    pub fn write_decimal(&mut self, value: &BigDecimal, precision: u32, scale: u32) -> Result<&mut Self> {
        let width = decimal_byte_length(precision);
        let (unscaled, _) = value
            .with_scale_round(scale as i64, RoundingMode::HalfUp)
            .into_bigint_and_exponent();

        let limit = BigInt::from(10u8).pow(precision);
        if unscaled.magnitude() >= limit.magnitude() {
            return Err(BridgeError::encode(format!(
                "value {} does not fit Decimal({}, {})",
                value, precision, scale
            )));
        }

        let mut bytes = unscaled.to_signed_bytes_le();
        let fill = if unscaled.sign() == Sign::Minus { 0xFF } else { 0x00 };
        bytes.resize(width, fill);
        self.buf.put_slice(&bytes);
        Ok(self)
    }

    pub fn read_decimal(&mut self, precision: u32, scale: u32) -> Result<BigDecimal> {
        let width = decimal_byte_length(precision);
        let unscaled = BigInt::from_signed_bytes_le(self.take(width)?);
        Ok(BigDecimal::new(unscaled, scale as i64))
    }

    // ===== Temporal =====

    /// Days since epoch, clamped to `[1, 65535]`
    pub fn write_date_days(&mut self, days: i64) -> &mut Self {
        self.buf.put_u16_le(days.clamp(1, MAX_DATE_DAYS) as u16);
        self
    }

    /// Calendar date of `value` in `tz` (UTC when absent)
    pub fn write_date(&mut self, value: &DateTime<Utc>, tz: Option<&Tz>) -> &mut Self {
        let local = value.timestamp() + offset_seconds(value, tz);
        self.write_date_days(local.div_euclid(SECONDS_PER_DAY))
    }

    pub fn read_date_days(&mut self) -> Result<u16> {
        self.read_uint16()
    }

    pub fn read_date(&mut self) -> Result<NaiveDate> {
        let days = self.read_date_days()?;
        NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_days(Days::new(days as u64)))
            .ok_or_else(|| BridgeError::decode(format!("invalid Date value {}", days)))
    }

    /// Seconds since epoch, clamped to `[1, 2^32-1]`
    pub fn write_datetime_secs(&mut self, seconds: i64) -> &mut Self {
        self.buf.put_u32_le(seconds.clamp(1, MAX_DATETIME_SECONDS) as u32);
        self
    }

    /// Seconds since epoch after shifting by the offset of `tz`
    pub fn write_datetime(&mut self, value: &DateTime<Utc>, tz: Option<&Tz>) -> &mut Self {
        self.write_datetime_secs(value.timestamp() + offset_seconds(value, tz))
    }

    pub fn read_datetime_secs(&mut self) -> Result<u32> {
        self.read_uint32()
    }

    pub fn read_datetime(&mut self) -> Result<DateTime<Utc>> {
        let secs = self.read_datetime_secs()?;
        Utc.timestamp_opt(secs as i64, 0)
            .single()
            .ok_or_else(|| BridgeError::decode(format!("invalid DateTime value {}", secs)))
    }

    /// Raw ticks, clamped to at least 1
    pub fn write_datetime64_ticks(&mut self, ticks: i64) -> &mut Self {
        self.buf.put_u64_le(ticks.max(1) as u64);
        self
    }

    /// Ticks of `10^-scale` seconds, sub-second fraction truncated to the scale
    pub fn write_datetime64(&mut self, value: &DateTime<Utc>, scale: u32, tz: Option<&Tz>) -> &mut Self {
        let ticks = datetime64_ticks(value, scale, tz);
        let clamped = ticks.clamp(1, u64::MAX as i128) as u64;
        self.buf.put_u64_le(clamped);
        self
    }

    pub fn read_datetime64_ticks(&mut self) -> Result<u64> {
        self.read_uint64()
    }

    pub fn read_datetime64(&mut self, scale: u32) -> Result<DateTime<Utc>> {
        let ticks = self.read_datetime64_ticks()? as i128;
        let unit = 10i128.pow(scale.min(9));
        let secs = ticks.div_euclid(unit);
        let nanos = ticks.rem_euclid(unit) * 10i128.pow(9 - scale.min(9));
        i64::try_from(secs)
            .ok()
            .and_then(|s| Utc.timestamp_opt(s, nanos as u32).single())
            .ok_or_else(|| BridgeError::decode(format!("invalid DateTime64 value {}", ticks)))
    }

    // ===== Text =====

    /// Length-prefixed UTF-8. With `normalize`, `\r` and `\n` become spaces.
    pub fn write_string(&mut self, value: &str, normalize: bool) -> Result<&mut Self> {
        if normalize && value.contains(&['\r', '\n'][..]) {
            let cleaned = value.replace(&['\r', '\n'][..], " ");
            return self.write_binary(cleaned.as_bytes());
        }
        self.write_binary(value.as_bytes())
    }

    /// Length-prefixed raw bytes
    pub fn write_binary(&mut self, value: &[u8]) -> Result<&mut Self> {
        let len = u32::try_from(value.len()).map_err(|_| {
            BridgeError::encode(format!("string of {} bytes exceeds the length prefix", value.len()))
        })?;
        self.write_unsigned_varint(len);
        self.buf.put_slice(value);
        Ok(self)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_binary()?;
        String::from_utf8(bytes).map_err(|e| BridgeError::decode(format!("invalid UTF-8 string: {}", e)))
    }

    pub fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_unsigned_varint()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Up to `length` raw bytes. Padding a shorter value is left to the caller.
    pub fn write_fixed_string(&mut self, value: &[u8], length: usize) -> Result<&mut Self> {
        if value.len() > length {
            return Err(BridgeError::encode(format!(
                "{} bytes do not fit FixedString({})",
                value.len(),
                length
            )));
        }
        self.buf.put_slice(value);
        Ok(self)
    }

    pub fn read_fixed_string(&mut self, length: usize) -> Result<Vec<u8>> {
        Ok(self.take(length)?.to_vec())
    }

    pub fn write_zeros(&mut self, count: usize) -> &mut Self {
        self.buf.put_bytes(0, count);
        self
    }

    // ===== Identifiers and addresses =====

    /// Two little-endian u64 halves, most significant half first
    pub fn write_uuid(&mut self, value: &Uuid) -> &mut Self {
        let (high, low) = value.as_u64_pair();
        self.buf.put_u64_le(high);
        self.buf.put_u64_le(low);
        self
    }

    pub fn read_uuid(&mut self) -> Result<Uuid> {
        let high = self.read_uint64()?;
        let low = self.read_uint64()?;
        Ok(Uuid::from_u64_pair(high, low))
    }

    pub fn write_ipv4(&mut self, value: &Ipv4Addr) -> &mut Self {
        self.buf.put_u32_le(u32::from(*value));
        self
    }

    pub fn read_ipv4(&mut self) -> Result<Ipv4Addr> {
        Ok(Ipv4Addr::from(self.read_uint32()?))
    }

    /// Network byte order
    pub fn write_ipv6(&mut self, value: &Ipv6Addr) -> &mut Self {
        self.buf.put_slice(&value.octets());
        self
    }

    pub fn read_ipv6(&mut self) -> Result<Ipv6Addr> {
        Ok(Ipv6Addr::from(self.take_array::<16>()?))
    }
}

/// UTC offset of `tz` at the given instant, in seconds
pub fn offset_seconds(value: &DateTime<Utc>, tz: Option<&Tz>) -> i64 {
    match tz {
        Some(tz) => tz
            .offset_from_utc_datetime(&value.naive_utc())
            .fix()
            .local_minus_utc() as i64,
        None => 0,
    }
}

/// Ticks of `10^-scale` seconds for a timestamp, shifted into `tz`
pub fn datetime64_ticks(value: &DateTime<Utc>, scale: u32, tz: Option<&Tz>) -> i128 {
    let scale = scale.min(9);
    let secs = (value.timestamp() + offset_seconds(value, tz)) as i128;
    let nanos = value.timestamp_subsec_nanos() as i128;
    secs * 10i128.pow(scale) + nanos / 10i128.pow(9 - scale)
}

fn out_of_range<V, L, H>(value: V, type_name: &str, low: L, high: H) -> BridgeError
where
    V: std::fmt::Display,
    L: std::fmt::Display,
    H: std::fmt::Display,
{
    BridgeError::encode(format!(
        "value {} out of range for {}, expected [{}, {}]",
        value, type_name, low, high
    ))
}

fn big_out_of_range(value: &BigInt, type_name: &str, width: usize, signed: bool) -> BridgeError {
    let bits = (width * 8) as u32;
    let (low, high) = if signed {
        let half = BigInt::from(1u8) << (bits - 1);
        (-half.clone(), half - 1)
    } else {
        (BigInt::from(0u8), (BigInt::from(1u8) << bits) - 1)
    };
    out_of_range(value, type_name, low, high)
}
