//! Column schema
//!
//! A column is built through [`ColumnBuilder`], which normalizes its shape:
//!
//! 1. type defaults to `String` and nullability to `true` when not given
//! 2. length/precision/scale are clamped to the type's limits; sized decimal
//!    families always use the family precision
//! 3. the default value is parsed with the column's typed parameter
//!
//! Building from an existing column yields the same column.

use chrono_tz::Tz;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::atomic::{AtomicBool, Ordering};
use wirebridge_common::{BridgeError, Result};

use super::declaration::{self, quote_identifier, quote_literal, unquote, Literal, TypeExpr};
use crate::buffer::WireBuffer;
use crate::param::{ParamValue, TypedParameter, ValueFormat};
use crate::types::{ValueKind, WireType, MAX_DECIMAL_PRECISION, MAX_FIXED_STRING_LENGTH};

/// Name used when a column has none
pub const DEFAULT_COLUMN_NAME: &str = "unknown";

static EMIT_DEFAULT_VALUES: AtomicBool = AtomicBool::new(false);

/// Whether rendered declarations carry `DEFAULT` clauses (process-wide)
pub fn set_emit_default_values(enabled: bool) {
    EMIT_DEFAULT_VALUES.store(enabled, Ordering::Relaxed);
}

pub fn emit_default_values() -> bool {
    EMIT_DEFAULT_VALUES.load(Ordering::Relaxed)
}

/// Raw default value before it is typed
#[derive(Debug, Clone)]
enum RawDefault {
    Text(String),
    Json(JsonValue),
}

/// Builder for [`ColumnSchema`]
#[derive(Debug, Clone)]
pub struct ColumnBuilder {
    name: String,
    wire_type: WireType,
    nullable: bool,
    length: Option<u32>,
    precision: Option<u32>,
    scale: Option<u32>,
    timezone: Option<String>,
    options: Vec<(String, i32)>,
    default: Option<RawDefault>,
    current: Option<ParamValue>,
    explicit_default: bool,
}

impl ColumnBuilder {
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Enum option, in declaration order
    pub fn option(mut self, name: impl Into<String>, value: i32) -> Self {
        self.options.push((name.into(), value));
        self
    }

    /// Default value from its textual form
    pub fn default_text(mut self, value: impl Into<String>) -> Self {
        self.default = Some(RawDefault::Text(value.into()));
        self
    }

    /// Default value from a JSON scalar
    pub fn default_json(mut self, value: JsonValue) -> Self {
        self.default = Some(RawDefault::Json(value));
        self
    }

    pub fn build(self) -> Result<ColumnSchema> {
        let name = match self.name.trim() {
            "" => DEFAULT_COLUMN_NAME.to_string(),
            _ => self.name,
        };
        let ty = self.wire_type;

        let length = match ty {
            WireType::FixedString => self.length.unwrap_or(1).clamp(1, MAX_FIXED_STRING_LENGTH),
            _ => 0,
        };

        let precision = if ty.is_sized_decimal() {
            ty.max_precision()
        } else if ty == WireType::Decimal {
            self.precision
                .filter(|p| *p > 0)
                .unwrap_or_else(|| ty.default_precision())
                .min(MAX_DECIMAL_PRECISION)
        } else {
            self.precision
                .filter(|p| *p > 0)
                .unwrap_or_else(|| ty.default_precision())
                .min(ty.max_precision())
        };
        let scale = self
            .scale
            .unwrap_or_else(|| ty.default_scale())
            .min(ty.max_scale())
            .min(precision);

        let timezone = match (&self.timezone, ty.accepts_timezone()) {
            (Some(tz), true) if !tz.trim().is_empty() => Some(
                tz.trim()
                    .parse::<Tz>()
                    .map_err(|_| BridgeError::schema(format!("unknown timezone '{}'", tz), &name))?,
            ),
            _ => None,
        };

        let options = if ty.is_enum() { self.options } else { Vec::new() };
        let (min, max) = match ty {
            WireType::Enum16 => (i16::MIN as i32, i16::MAX as i32),
            _ => (i8::MIN as i32, i8::MAX as i32),
        };
        if let Some((option, value)) = options.iter().find(|(_, v)| *v < min || *v > max) {
            return Err(BridgeError::schema(
                format!("value {} of option '{}' out of range for {}", value, option, ty),
                &name,
            ));
        }

        let zero = match options.first() {
            Some((_, first)) => ParamValue::Int(*first),
            None => ParamValue::zero(ty),
        };
        let default_value = TypedParameter::with_default(name.clone(), ty, zero).with_scale(scale);

        let mut column = ColumnSchema {
            name,
            wire_type: ty,
            nullable: self.nullable,
            length,
            precision,
            scale,
            timezone,
            options,
            default_value,
            explicit_default: self.explicit_default || self.default.is_some(),
            index: None,
        };
        if let Some(current) = self.current {
            column.set_default_param(current)?;
        }
        match self.default {
            Some(RawDefault::Text(text)) => column.merge_default_str(&text)?,
            Some(RawDefault::Json(value)) => column.merge_default_json(&value)?,
            None => {}
        }
        Ok(column)
    }
}

/// One column of a table schema
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    name: String,
    wire_type: WireType,
    nullable: bool,
    length: u32,
    precision: u32,
    scale: u32,
    timezone: Option<Tz>,
    options: Vec<(String, i32)>,
    default_value: TypedParameter,
    /// Default was declared, even when it equals the type's zero value
    explicit_default: bool,
    index: Option<usize>,
}

impl Default for ColumnSchema {
    /// Nullable `String` named `unknown`
    fn default() -> Self {
        let name = DEFAULT_COLUMN_NAME.to_string();
        Self {
            default_value: TypedParameter::new(name.clone(), WireType::String),
            name,
            wire_type: WireType::String,
            nullable: true,
            length: 0,
            precision: 0,
            scale: 0,
            timezone: None,
            options: Vec::new(),
            explicit_default: false,
            index: None,
        }
    }
}

impl ColumnSchema {
    /// Start building a nullable column of `wire_type`
    pub fn builder(name: impl Into<String>, wire_type: WireType) -> ColumnBuilder {
        ColumnBuilder {
            name: name.into(),
            wire_type,
            nullable: true,
            length: None,
            precision: None,
            scale: None,
            timezone: None,
            options: Vec::new(),
            default: None,
            current: None,
            explicit_default: false,
        }
    }

    /// Builder pre-filled with this column's shape and value
    pub fn to_builder(&self) -> ColumnBuilder {
        ColumnBuilder {
            name: self.name.clone(),
            wire_type: self.wire_type,
            nullable: self.nullable,
            length: Some(self.length),
            precision: Some(self.precision),
            scale: Some(self.scale),
            timezone: self.timezone.map(|tz| tz.name().to_string()),
            options: self.options.clone(),
            default: None,
            current: Some(self.default_value.value().clone()),
            explicit_default: self.explicit_default,
        }
    }

    /// Same column under another name
    pub fn renamed(&self, name: impl Into<String>) -> Result<ColumnSchema> {
        let mut builder = self.to_builder();
        builder.name = name.into();
        builder.build()
    }

    /// Parse `` `name` Type[(args)] [DEFAULT literal] ``
    pub fn from_declaration(text: &str) -> Result<ColumnSchema> {
        let decl = declaration::parse_declaration(text)?;
        let builder = builder_for_type(decl.name, &decl.ty)
            .map_err(|e| reframe(e, text))?;
        let builder = match decl.default {
            Some(Literal::Raw(raw)) if raw.eq_ignore_ascii_case("NULL") => builder,
            Some(literal) => builder.default_text(literal.text()),
            None => builder,
        };
        builder.build().map_err(|e| reframe(e, text))
    }

    /// Render as a declaration, honoring the process-wide default-value toggle
    pub fn to_declaration(&self) -> String {
        self.to_declaration_with(emit_default_values())
    }

    pub fn to_declaration_with(&self, emit_default: bool) -> String {
        let mut out = format!("{} {}", quote_identifier(&self.name), self.type_expr());
        if emit_default && self.declares_default() {
            out.push_str(" DEFAULT ");
            out.push_str(&self.default_literal());
        }
        out
    }

    /// Type expression, including `Nullable(...)` when nullable
    pub fn type_expr(&self) -> String {
        let base = match self.wire_type {
            WireType::FixedString => format!("FixedString({})", self.length),
            WireType::DateTime => match &self.timezone {
                Some(tz) => format!("DateTime({})", quote_literal(tz.name())),
                None => "DateTime".to_string(),
            },
            WireType::DateTime64 => match &self.timezone {
                Some(tz) => format!("DateTime64({}, {})", self.scale, quote_literal(tz.name())),
                None => format!("DateTime64({})", self.scale),
            },
            WireType::Decimal => format!("Decimal({}, {})", self.precision, self.scale),
            ty if ty.is_sized_decimal() => format!("{}({})", ty, self.scale),
            ty if ty.is_enum() => {
                let entries: Vec<String> = self
                    .options
                    .iter()
                    .map(|(name, value)| format!("{} = {}", quote_literal(name), value))
                    .collect();
                format!("{}({})", ty, entries.join(", "))
            }
            ty => ty.name().to_string(),
        };
        if self.nullable {
            format!("Nullable({})", base)
        } else {
            base
        }
    }

    fn default_literal(&self) -> String {
        let value = self.default_value.value();
        if self.wire_type.is_enum() {
            let known = value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .and_then(|v| self.option_name_of(v));
            return match known {
                Some(name) => quote_literal(name),
                None => value.to_string(),
            };
        }
        match value {
            ParamValue::Str(s) => quote_literal(s),
            other => other.to_string(),
        }
    }

    /// Parse a structured configuration object
    pub fn from_config(config: &JsonValue) -> Result<ColumnSchema> {
        let object = config
            .as_object()
            .ok_or_else(|| BridgeError::schema("column config must be an object", config.to_string()))?;
        let fragment = || config.to_string();

        let name = object.get("name").and_then(JsonValue::as_str).unwrap_or_default();
        let ty = match object.get("type").and_then(JsonValue::as_str) {
            Some(expr) => declaration::parse_type_expr(expr).map_err(|e| reframe(e, &fragment()))?,
            None => TypeExpr {
                name: WireType::String.name().to_string(),
                args: Vec::new(),
                nullable: true,
            },
        };
        let mut builder = builder_for_type(name.to_string(), &ty).map_err(|e| reframe(e, &fragment()))?;
        builder.nullable = object
            .get("nullable")
            .and_then(JsonValue::as_bool)
            .unwrap_or(true);
        if let Some(v) = get_u32(object, "length") {
            builder.length = Some(v);
        }
        if let Some(v) = get_u32(object, "precision") {
            builder.precision = Some(v);
        }
        if let Some(v) = get_u32(object, "scale") {
            builder.scale = Some(v);
        }
        if let Some(tz) = object.get("timezone").and_then(JsonValue::as_str) {
            builder.timezone = Some(tz.to_string());
        }
        match object.get("options") {
            Some(JsonValue::Object(options)) => {
                builder.options = options
                    .iter()
                    .map(|(k, v)| {
                        v.as_i64()
                            .and_then(|v| i32::try_from(v).ok())
                            .map(|v| (k.clone(), v))
                            .ok_or_else(|| BridgeError::schema(format!("invalid value for option '{}'", k), fragment()))
                    })
                    .collect::<Result<_>>()?;
            }
            Some(JsonValue::Array(names)) => {
                let names: Vec<String> = names
                    .iter()
                    .map(|n| n.as_str().map(str::to_string).unwrap_or_else(|| n.to_string()))
                    .collect();
                builder.options = number_options(names.iter().map(|n| (n.clone(), None)));
            }
            _ => {}
        }
        if let Some(value) = object.get("value").filter(|v| !v.is_null()) {
            builder = builder.default_json(value.clone());
        }
        builder.build().map_err(|e| reframe(e, &fragment()))
    }

    /// Structured configuration form
    pub fn to_config(&self) -> JsonValue {
        let mut object = Map::new();
        object.insert("name".into(), json!(self.name));
        object.insert("type".into(), json!(self.wire_type.name()));
        object.insert("nullable".into(), json!(self.nullable));
        if self.wire_type == WireType::FixedString {
            object.insert("length".into(), json!(self.length));
        }
        if self.wire_type.is_decimal() {
            object.insert("precision".into(), json!(self.precision));
        }
        if self.wire_type.is_decimal() || self.wire_type == WireType::DateTime64 {
            object.insert("scale".into(), json!(self.scale));
        }
        if let Some(tz) = &self.timezone {
            object.insert("timezone".into(), json!(tz.name()));
        }
        if self.wire_type.is_enum() {
            let options: Map<String, JsonValue> =
                self.options.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            object.insert("options".into(), JsonValue::Object(options));
        }
        if self.declares_default() {
            let literal = self.default_literal();
            let value = match self.default_value.value() {
                ParamValue::Str(s) => json!(s),
                _ if self.wire_type.is_enum() => json!(unquote(&literal)),
                ParamValue::Bool(b) => json!(b),
                ParamValue::Int(v) => json!(v),
                ParamValue::Long(v) => json!(v),
                ParamValue::Float(v) => json!(v),
                ParamValue::Double(v) => json!(v),
                other => json!(other.to_string()),
            };
            object.insert("value".into(), value);
        }
        JsonValue::Object(object)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn timezone(&self) -> Option<&Tz> {
        self.timezone.as_ref()
    }

    pub fn options(&self) -> &[(String, i32)] {
        &self.options
    }

    pub fn default_value(&self) -> &TypedParameter {
        &self.default_value
    }

    /// Whether the column carries an explicit default (or is an enum, whose
    /// implicit default is its first option)
    pub fn has_default(&self) -> bool {
        self.declares_default() || !self.options.is_empty()
    }

    /// Default was declared, enum first options aside
    pub(crate) fn declares_default(&self) -> bool {
        self.explicit_default || self.default_value.is_customized()
    }

    /// Zero-based position, set once the owning table is finalized
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn set_index(&mut self, index: usize) -> Result<()> {
        match self.index {
            Some(existing) => Err(BridgeError::Internal(format!(
                "index of column '{}' already set to {}",
                self.name, existing
            ))),
            None => {
                self.index = Some(index);
                Ok(())
            }
        }
    }

    /// Value of an enum option by name
    pub fn option_value_of(&self, name: &str) -> Result<i32> {
        self.options
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| {
                BridgeError::invalid_argument(format!("unknown option '{}' for column '{}'", name, self.name))
            })
    }

    pub fn option_name_of(&self, value: i32) -> Option<&str> {
        self.options.iter().find(|(_, v)| *v == value).map(|(n, _)| n.as_str())
    }

    /// Fail unless some option maps to `value`
    pub fn require_known_value(&self, value: i32) -> Result<i32> {
        match self.option_name_of(value) {
            Some(_) => Ok(value),
            None => Err(BridgeError::invalid_argument(format!(
                "value {} is not an option of column '{}'",
                value, self.name
            ))),
        }
    }

    /// Layout used when writing values of this column
    pub fn value_format(&self) -> ValueFormat {
        ValueFormat {
            length: (self.wire_type == WireType::FixedString).then_some(self.length as usize),
            precision: Some(self.precision),
            scale: Some(self.scale),
            timezone: self.timezone,
        }
    }

    /// Merge a textual value into the column's default cell.
    /// Enum columns accept an option name or its number.
    pub fn merge_default_str(&mut self, text: &str) -> Result<()> {
        if self.wire_type.is_enum() && !text.is_empty() {
            let value = self.enum_value_of(text)?;
            return self.set_default_param(ParamValue::Int(value));
        }
        self.default_value.merge_str(Some(text))
    }

    /// Merge a JSON scalar into the column's default cell
    pub fn merge_default_json(&mut self, value: &JsonValue) -> Result<()> {
        match value {
            JsonValue::String(s) => self.merge_default_str(s),
            JsonValue::Number(n) if self.wire_type.is_enum() => {
                let value = n
                    .as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(|| BridgeError::invalid_argument(format!("invalid enum value {}", n)))?;
                let value = self.require_known_value(value)?;
                self.set_default_param(ParamValue::Int(value))
            }
            other => self.default_value.merge_json_value(other),
        }
    }

    /// Take the default of a same-named column with the same type and scale
    pub fn merge_value(&mut self, other: &ColumnSchema) -> bool {
        if other.wire_type != self.wire_type
            || other.scale != self.scale
            || !self.default_value.merge(&other.default_value)
        {
            return false;
        }
        self.explicit_default = true;
        true
    }

    fn enum_value_of(&self, text: &str) -> Result<i32> {
        match self.option_value_of(text) {
            Ok(v) => Ok(v),
            Err(e) => match text.trim().parse::<i32>() {
                Ok(v) => self.require_known_value(v),
                Err(_) => Err(e),
            },
        }
    }

    fn set_default_param(&mut self, value: ParamValue) -> Result<()> {
        let mut cell = self.default_value.clone();
        let mut source = TypedParameter::with_default(self.name.clone(), self.wire_type, value);
        if source.kind() == ValueKind::Long {
            source = source.with_scale(self.scale);
        }
        cell.merge(&source);
        self.default_value = cell;
        Ok(())
    }

    /// Write the column's default value (no null flag)
    pub fn write_default(&self, buf: &mut WireBuffer) -> Result<()> {
        self.default_value.write_value_to(buf, &self.value_format())
    }

    /// Write a value of this column (no null flag)
    pub fn write_value(&self, buf: &mut WireBuffer, value: &ParamValue) -> Result<()> {
        crate::param::write_value(buf, self.wire_type, value, &self.value_format(), self.scale)
    }

    /// Read one cell written for this column and render it as text.
    /// Nullable columns consume their null flag first; null renders as `\N`.
    pub fn read_value_text(&self, buf: &mut WireBuffer) -> Result<String> {
        if self.nullable && buf.read_null_flag()? {
            return Ok("\\N".to_string());
        }
        let text = match self.wire_type {
            WireType::Bool => buf.read_bool()?.to_string(),
            WireType::Int8 => buf.read_int8()?.to_string(),
            WireType::Int16 => buf.read_int16()?.to_string(),
            WireType::Int32 => buf.read_int32()?.to_string(),
            WireType::Int64 => buf.read_int64()?.to_string(),
            WireType::Int128 => buf.read_int128()?.to_string(),
            WireType::Int256 => buf.read_int256()?.to_string(),
            WireType::UInt8 => buf.read_uint8()?.to_string(),
            WireType::UInt16 => buf.read_uint16()?.to_string(),
            WireType::UInt32 => buf.read_uint32()?.to_string(),
            WireType::UInt64 => buf.read_uint64()?.to_string(),
            WireType::UInt128 => buf.read_uint128()?.to_string(),
            WireType::UInt256 => buf.read_uint256()?.to_string(),
            WireType::Float32 => buf.read_float32()?.to_string(),
            WireType::Float64 => buf.read_float64()?.to_string(),
            WireType::Date => buf.read_date()?.to_string(),
            WireType::DateTime => buf.read_datetime()?.format("%Y-%m-%d %H:%M:%S").to_string(),
            WireType::DateTime64 => buf
                .read_datetime64(self.scale)?
                .format("%Y-%m-%d %H:%M:%S%.f")
                .to_string(),
            WireType::Decimal
            | WireType::Decimal32
            | WireType::Decimal64
            | WireType::Decimal128
            | WireType::Decimal256 => buf.read_decimal(self.precision, self.scale)?.to_string(),
            WireType::Enum | WireType::Enum8 => {
                let v = buf.read_int8()? as i32;
                self.option_name_of(v).map(str::to_string).unwrap_or_else(|| v.to_string())
            }
            WireType::Enum16 => {
                let v = buf.read_int16()? as i32;
                self.option_name_of(v).map(str::to_string).unwrap_or_else(|| v.to_string())
            }
            WireType::IPv4 => buf.read_ipv4()?.to_string(),
            WireType::IPv6 => buf.read_ipv6()?.to_string(),
            WireType::UUID => buf.read_uuid()?.to_string(),
            WireType::FixedString => {
                let bytes = buf.read_fixed_string(self.length as usize)?;
                String::from_utf8_lossy(&bytes).trim_end_matches('\0').to_string()
            }
            WireType::String => buf.read_string()?,
        };
        Ok(text)
    }
}

/// Builder for a parsed type expression, interpreting its arguments
fn builder_for_type(name: String, ty: &TypeExpr) -> Result<ColumnBuilder> {
    let wire_type = WireType::from_name(&ty.name);
    let mut builder = ColumnSchema::builder(name, wire_type).nullable(ty.nullable);
    let args = &ty.args;
    let int_arg = |i: usize| -> Result<Option<u32>> {
        match args.get(i) {
            Some(a) => a.trim().parse::<u32>().map(Some).map_err(|_| {
                BridgeError::schema(format!("invalid argument '{}' for {}", a, wire_type), "")
            }),
            None => Ok(None),
        }
    };

    match wire_type {
        WireType::FixedString => builder.length = int_arg(0)?,
        WireType::DateTime => builder.timezone = args.first().map(|a| unquote(a)),
        WireType::DateTime64 => {
            builder.scale = int_arg(0)?;
            builder.timezone = args.get(1).map(|a| unquote(a));
        }
        WireType::Decimal => {
            builder.precision = int_arg(0)?;
            // Decimal(P) means scale 0
            builder.scale = int_arg(1)?.or(builder.precision.map(|_| 0));
        }
        ty if ty.is_sized_decimal() => builder.scale = int_arg(0)?,
        ty if ty.is_enum() => builder.options = parse_enum_entries(args)?,
        _ => {}
    }
    Ok(builder)
}

/// `'name' = value` entries; entries without a value follow the previous one
fn parse_enum_entries(args: &[String]) -> Result<Vec<(String, i32)>> {
    let mut entries = Vec::with_capacity(args.len());
    for arg in args {
        let parts = declaration::split_top_level(arg, '=')?;
        let value = match parts.get(1) {
            Some(v) => Some(v.trim().parse::<i32>().map_err(|_| {
                BridgeError::schema(format!("invalid enum value '{}'", v), arg.as_str())
            })?),
            None => None,
        };
        let name = parts.first().map(|n| unquote(n)).unwrap_or_default();
        entries.push((name, value));
    }
    Ok(number_options(entries.into_iter()))
}

fn number_options(entries: impl Iterator<Item = (String, Option<i32>)>) -> Vec<(String, i32)> {
    let mut next = 1;
    entries
        .map(|(name, value)| {
            let value = value.unwrap_or(next);
            next = value.saturating_add(1);
            (name, value)
        })
        .collect()
}

fn get_u32(object: &Map<String, JsonValue>, key: &str) -> Option<u32> {
    object
        .get(key)
        .and_then(JsonValue::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}

/// Attach the full declaration to schema errors raised deeper down
fn reframe(err: BridgeError, fragment: &str) -> BridgeError {
    match err {
        BridgeError::SchemaParse { message, .. } => BridgeError::schema(message, fragment),
        BridgeError::InvalidArgument(message) => BridgeError::schema(message, fragment),
        other => other,
    }
}
