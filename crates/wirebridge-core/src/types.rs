//! Wire type catalog
//!
//! The closed set of column types understood by the consuming engine, with
//! their fixed byte lengths and precision/scale rules.
//!
//! | Type            | Bytes | Default precision | Default scale |
//! |-----------------|-------|-------------------|---------------|
//! | Int8 .. Int64   | 1-8   | digits of MIN     | 0             |
//! | Int128/Int256   | 16/32 | 40 / 78           | 0             |
//! | Float32/Float64 | 4/8   | 8 / 17            | 8 / 17        |
//! | Date            | 2     | 10                | 0             |
//! | DateTime        | 4     | 19                | 0             |
//! | DateTime64      | 8     | 23 (max 29)       | 3 (max 9)     |
//! | Decimal         | var   | 10 (max 76)       | 4             |
//! | Decimal32..256  | 4-32  | 9/18/38/76 fixed  | 2/4/8/16      |
//! | FixedString     | n     | -                 | -             |
//! | String          | var   | -                 | -             |
//!
//! Name lookup is case-insensitive. Unknown names resolve to `String`.

use std::fmt;

/// Largest length accepted for `FixedString(n)`
pub const MAX_FIXED_STRING_LENGTH: u32 = 0xFF_FFFF;

/// Precision of the widest decimal
pub const MAX_DECIMAL_PRECISION: u32 = 76;

/// In-memory representation used for values of a wire type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    /// 32-bit signed
    Int,
    /// 64-bit signed
    Long,
    Float,
    Double,
    /// Arbitrary precision integer
    BigInt,
    /// Arbitrary precision decimal
    Decimal,
    Str,
}

impl ValueKind {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ValueKind::Bool | ValueKind::Str)
    }
}

/// A wire data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Int256,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    UInt256,
    Float32,
    Float64,
    Date,
    DateTime,
    DateTime64,
    Decimal,
    Decimal32,
    Decimal64,
    Decimal128,
    Decimal256,
    Enum,
    Enum8,
    Enum16,
    IPv4,
    IPv6,
    FixedString,
    String,
    UUID,
}

impl WireType {
    /// Every type in declaration order
    pub const ALL: [WireType; 31] = [
        WireType::Bool,
        WireType::Int8,
        WireType::Int16,
        WireType::Int32,
        WireType::Int64,
        WireType::Int128,
        WireType::Int256,
        WireType::UInt8,
        WireType::UInt16,
        WireType::UInt32,
        WireType::UInt64,
        WireType::UInt128,
        WireType::UInt256,
        WireType::Float32,
        WireType::Float64,
        WireType::Date,
        WireType::DateTime,
        WireType::DateTime64,
        WireType::Decimal,
        WireType::Decimal32,
        WireType::Decimal64,
        WireType::Decimal128,
        WireType::Decimal256,
        WireType::Enum,
        WireType::Enum8,
        WireType::Enum16,
        WireType::IPv4,
        WireType::IPv6,
        WireType::FixedString,
        WireType::String,
        WireType::UUID,
    ];

    /// Resolve a type name, `None` if it is not part of the catalog
    pub fn lookup(name: &str) -> Option<WireType> {
        let ty = match name.trim().to_lowercase().as_str() {
            "bool" | "boolean" => WireType::Bool,
            "int8" => WireType::Int8,
            "int16" => WireType::Int16,
            "int32" => WireType::Int32,
            "int64" => WireType::Int64,
            "int128" => WireType::Int128,
            "int256" => WireType::Int256,
            "uint8" => WireType::UInt8,
            "uint16" => WireType::UInt16,
            "uint32" => WireType::UInt32,
            "uint64" => WireType::UInt64,
            "uint128" => WireType::UInt128,
            "uint256" => WireType::UInt256,
            "float32" => WireType::Float32,
            "float64" => WireType::Float64,
            "date" => WireType::Date,
            "datetime" => WireType::DateTime,
            "datetime64" => WireType::DateTime64,
            "decimal" => WireType::Decimal,
            "decimal32" => WireType::Decimal32,
            "decimal64" => WireType::Decimal64,
            "decimal128" => WireType::Decimal128,
            "decimal256" => WireType::Decimal256,
            "enum" => WireType::Enum,
            "enum8" => WireType::Enum8,
            "enum16" => WireType::Enum16,
            "ipv4" => WireType::IPv4,
            "ipv6" => WireType::IPv6,
            "fixedstring" | "fixed_string" => WireType::FixedString,
            "string" => WireType::String,
            "uuid" => WireType::UUID,
            _ => return None,
        };
        Some(ty)
    }

    /// Resolve a type name, falling back to `String` for unknown names
    pub fn from_name(name: &str) -> WireType {
        Self::lookup(name).unwrap_or(WireType::String)
    }

    /// Canonical name as used in column declarations
    pub fn name(&self) -> &'static str {
        match self {
            WireType::Bool => "Bool",
            WireType::Int8 => "Int8",
            WireType::Int16 => "Int16",
            WireType::Int32 => "Int32",
            WireType::Int64 => "Int64",
            WireType::Int128 => "Int128",
            WireType::Int256 => "Int256",
            WireType::UInt8 => "UInt8",
            WireType::UInt16 => "UInt16",
            WireType::UInt32 => "UInt32",
            WireType::UInt64 => "UInt64",
            WireType::UInt128 => "UInt128",
            WireType::UInt256 => "UInt256",
            WireType::Float32 => "Float32",
            WireType::Float64 => "Float64",
            WireType::Date => "Date",
            WireType::DateTime => "DateTime",
            WireType::DateTime64 => "DateTime64",
            WireType::Decimal => "Decimal",
            WireType::Decimal32 => "Decimal32",
            WireType::Decimal64 => "Decimal64",
            WireType::Decimal128 => "Decimal128",
            WireType::Decimal256 => "Decimal256",
            WireType::Enum => "Enum",
            WireType::Enum8 => "Enum8",
            WireType::Enum16 => "Enum16",
            WireType::IPv4 => "IPv4",
            WireType::IPv6 => "IPv6",
            WireType::FixedString => "FixedString",
            WireType::String => "String",
            WireType::UUID => "UUID",
        }
    }

    /// Fixed encoded width in bytes, 0 for variable-length types
    pub fn byte_length(&self) -> usize {
        match self {
            WireType::Bool | WireType::Int8 | WireType::UInt8 => 1,
            WireType::Enum | WireType::Enum8 => 1,
            WireType::Int16 | WireType::UInt16 | WireType::Enum16 | WireType::Date => 2,
            WireType::Int32 | WireType::UInt32 | WireType::Float32 => 4,
            WireType::DateTime | WireType::Decimal32 | WireType::IPv4 => 4,
            WireType::Int64 | WireType::UInt64 | WireType::Float64 => 8,
            WireType::DateTime64 | WireType::Decimal64 => 8,
            WireType::Int128 | WireType::UInt128 | WireType::Decimal128 => 16,
            WireType::IPv6 | WireType::UUID => 16,
            WireType::Int256 | WireType::UInt256 | WireType::Decimal256 => 32,
            WireType::Decimal | WireType::FixedString | WireType::String => 0,
        }
    }

    /// Largest precision this type accepts
    pub fn max_precision(&self) -> u32 {
        match self {
            WireType::Bool => 1,
            WireType::Int8 => 4,
            WireType::Int16 => 6,
            WireType::Int32 => 11,
            WireType::Int64 => 20,
            WireType::Int128 => 40,
            WireType::Int256 => 78,
            WireType::UInt8 => 3,
            WireType::UInt16 => 5,
            WireType::UInt32 => 10,
            WireType::UInt64 => 20,
            WireType::UInt128 => 39,
            WireType::UInt256 => 78,
            WireType::Float32 => 8,
            WireType::Float64 => 17,
            WireType::Date => 10,
            WireType::DateTime => 19,
            WireType::DateTime64 => 29,
            WireType::Decimal | WireType::Decimal256 => MAX_DECIMAL_PRECISION,
            WireType::Decimal32 => 9,
            WireType::Decimal64 => 18,
            WireType::Decimal128 => 38,
            WireType::IPv4 => 15,
            WireType::IPv6 => 39,
            WireType::UUID => 36,
            WireType::Enum | WireType::Enum8 | WireType::Enum16 => 0,
            WireType::FixedString | WireType::String => 0,
        }
    }

    /// Precision used when a declaration does not give one
    pub fn default_precision(&self) -> u32 {
        match self {
            WireType::DateTime64 => 23,
            WireType::Decimal => 10,
            other => other.max_precision(),
        }
    }

    /// Largest scale this type accepts
    pub fn max_scale(&self) -> u32 {
        match self {
            WireType::Float32 => 8,
            WireType::Float64 => 17,
            WireType::DateTime64 => 9,
            WireType::Decimal
            | WireType::Decimal32
            | WireType::Decimal64
            | WireType::Decimal128
            | WireType::Decimal256 => self.max_precision(),
            _ => 0,
        }
    }

    /// Scale used when a declaration does not give one
    pub fn default_scale(&self) -> u32 {
        match self {
            WireType::Float32 => 8,
            WireType::Float64 => 17,
            WireType::DateTime64 => 3,
            WireType::Decimal => 4,
            WireType::Decimal32 => 2,
            WireType::Decimal64 => 4,
            WireType::Decimal128 => 8,
            WireType::Decimal256 => 16,
            _ => 0,
        }
    }

    pub fn is_decimal(&self) -> bool {
        matches!(
            self,
            WireType::Decimal
                | WireType::Decimal32
                | WireType::Decimal64
                | WireType::Decimal128
                | WireType::Decimal256
        )
    }

    /// Sized decimal families whose precision is fixed by the type itself
    pub fn is_sized_decimal(&self) -> bool {
        self.is_decimal() && *self != WireType::Decimal
    }

    pub fn is_enum(&self) -> bool {
        matches!(self, WireType::Enum | WireType::Enum8 | WireType::Enum16)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, WireType::Date | WireType::DateTime | WireType::DateTime64)
    }

    /// Types whose declaration may carry a timezone argument
    pub fn accepts_timezone(&self) -> bool {
        matches!(self, WireType::DateTime | WireType::DateTime64)
    }

    /// Natural in-memory representation of values of this type
    pub fn value_kind(&self) -> ValueKind {
        match self {
            WireType::Bool => ValueKind::Bool,
            WireType::Int8 | WireType::Int16 | WireType::Int32 => ValueKind::Int,
            WireType::UInt8 | WireType::UInt16 => ValueKind::Int,
            WireType::Enum | WireType::Enum8 | WireType::Enum16 => ValueKind::Int,
            WireType::Int64 | WireType::UInt32 => ValueKind::Long,
            WireType::Date | WireType::DateTime | WireType::DateTime64 => ValueKind::Long,
            WireType::UInt64 | WireType::Int128 | WireType::Int256 => ValueKind::BigInt,
            WireType::UInt128 | WireType::UInt256 => ValueKind::BigInt,
            WireType::Float32 => ValueKind::Float,
            WireType::Float64 => ValueKind::Double,
            WireType::Decimal
            | WireType::Decimal32
            | WireType::Decimal64
            | WireType::Decimal128
            | WireType::Decimal256 => ValueKind::Decimal,
            WireType::IPv4
            | WireType::IPv6
            | WireType::FixedString
            | WireType::String
            | WireType::UUID => ValueKind::Str,
        }
    }

    /// Wire type used for a value kind when none is given explicitly
    pub fn for_kind(kind: ValueKind) -> WireType {
        match kind {
            ValueKind::Bool => WireType::Bool,
            ValueKind::Int => WireType::Int32,
            ValueKind::Long => WireType::Int64,
            ValueKind::Float => WireType::Float32,
            ValueKind::Double => WireType::Float64,
            ValueKind::BigInt => WireType::Int256,
            ValueKind::Decimal => WireType::Decimal,
            ValueKind::Str => WireType::String,
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encoded width of a decimal of the given precision
pub fn decimal_byte_length(precision: u32) -> usize {
    match precision {
        0..=9 => 4,
        10..=18 => 8,
        19..=38 => 16,
        _ => 32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(WireType::lookup("uint64"), Some(WireType::UInt64));
        assert_eq!(WireType::lookup("DATETIME64"), Some(WireType::DateTime64));
        assert_eq!(WireType::lookup("IPv6"), Some(WireType::IPv6));
        assert_eq!(WireType::lookup("Nope"), None);
    }

    #[test]
    fn test_aliases() {
        assert_eq!(WireType::from_name("Boolean"), WireType::Bool);
        assert_eq!(WireType::from_name("fixed_string"), WireType::FixedString);
    }

    #[test]
    fn test_unknown_name_falls_back_to_string() {
        assert_eq!(WireType::from_name("LowCardinality"), WireType::String);
        assert_eq!(WireType::from_name(""), WireType::String);
    }

    #[test]
    fn test_names_round_trip() {
        for ty in WireType::ALL {
            assert_eq!(WireType::lookup(ty.name()), Some(ty), "{}", ty);
        }
    }

    #[test]
    fn test_scale_never_exceeds_precision() {
        for ty in WireType::ALL {
            assert!(ty.default_scale() <= ty.default_precision() || ty.default_precision() == 0, "{}", ty);
            assert!(ty.max_scale() <= ty.max_precision() || ty.max_precision() == 0, "{}", ty);
            assert!(ty.default_precision() <= ty.max_precision(), "{}", ty);
        }
    }

    #[test]
    fn test_byte_lengths() {
        assert_eq!(WireType::UInt256.byte_length(), 32);
        assert_eq!(WireType::Date.byte_length(), 2);
        assert_eq!(WireType::Enum16.byte_length(), 2);
        assert_eq!(WireType::String.byte_length(), 0);
        assert_eq!(WireType::Decimal.byte_length(), 0);
    }

    #[test]
    fn test_decimal_tiers() {
        assert_eq!(decimal_byte_length(9), 4);
        assert_eq!(decimal_byte_length(10), 8);
        assert_eq!(decimal_byte_length(18), 8);
        assert_eq!(decimal_byte_length(38), 16);
        assert_eq!(decimal_byte_length(39), 32);
        assert_eq!(decimal_byte_length(76), 32);
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(WireType::UInt32.value_kind(), ValueKind::Long);
        assert_eq!(WireType::UInt64.value_kind(), ValueKind::BigInt);
        assert_eq!(WireType::Enum16.value_kind(), ValueKind::Int);
        assert_eq!(WireType::UUID.value_kind(), ValueKind::Str);
        assert_eq!(WireType::for_kind(ValueKind::Long), WireType::Int64);
    }
}
