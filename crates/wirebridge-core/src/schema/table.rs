//! Table schema
//!
//! Ordered, versioned list of columns. Two textual forms are accepted:
//!
//! ```text
//! columns format version: 1
//! 2 columns:
//! `id` UInt64
//! `name` Nullable(String)
//! ```
//!
//! and the inline form `id UInt64, name Nullable(String)`.

use serde_json::Value as JsonValue;
use wirebridge_common::{BridgeError, Result};

use super::column::ColumnSchema;
use super::declaration::split_top_level;

/// Version written in the multi-line header
pub const CURRENT_FORMAT_VERSION: u32 = 1;

const VERSION_PREFIX: &str = "columns format version:";
const COUNT_SUFFIX: &str = "columns:";

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    format_version: u32,
    columns: Vec<ColumnSchema>,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION,
            columns,
        }
    }

    /// Parse either textual form
    pub fn from_text(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::default());
        }
        if text
            .get(..VERSION_PREFIX.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(VERSION_PREFIX))
        {
            Self::from_multiline(text)
        } else {
            Self::from_inline(text)
        }
    }

    fn from_multiline(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let header = lines.next().unwrap_or_default();
        let format_version = header[VERSION_PREFIX.len()..]
            .trim()
            .parse::<u32>()
            .map_err(|_| BridgeError::schema("invalid format version", header))?;

        let count_line = lines
            .next()
            .ok_or_else(|| BridgeError::schema("missing column count", text))?;
        let count = count_line
            .trim()
            .strip_suffix(COUNT_SUFFIX)
            .and_then(|n| n.trim().parse::<usize>().ok())
            .ok_or_else(|| BridgeError::schema("invalid column count", count_line))?;

        let columns = lines
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ColumnSchema::from_declaration)
            .collect::<Result<Vec<_>>>()?;
        if columns.len() != count {
            return Err(BridgeError::schema(
                format!("expected {} columns but found {}", count, columns.len()),
                count_line,
            ));
        }
        Ok(Self {
            format_version,
            columns,
        })
    }

    fn from_inline(text: &str) -> Result<Self> {
        let columns = split_top_level(text, ',')?
            .into_iter()
            .map(ColumnSchema::from_declaration)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(columns))
    }

    /// Parse an array of column objects, or `{"version": n, "columns": [...]}`
    pub fn from_config(config: &JsonValue) -> Result<Self> {
        let (format_version, columns) = match config {
            JsonValue::Array(columns) => (CURRENT_FORMAT_VERSION, columns),
            JsonValue::Object(object) => {
                let version = object
                    .get("version")
                    .and_then(JsonValue::as_u64)
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(CURRENT_FORMAT_VERSION);
                match object.get("columns") {
                    Some(JsonValue::Array(columns)) => (version, columns),
                    _ => return Err(BridgeError::schema("missing 'columns' array", config.to_string())),
                }
            }
            JsonValue::Null => return Ok(Self::default()),
            other => return Err(BridgeError::schema("table config must be an array", other.to_string())),
        };
        let columns = columns
            .iter()
            .map(ColumnSchema::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            format_version,
            columns,
        })
    }

    /// Multi-line form, one declaration per line
    pub fn to_text(&self) -> String {
        let mut out = format!(
            "{} {}\n{} {}\n",
            VERSION_PREFIX,
            self.format_version,
            self.columns.len(),
            COUNT_SUFFIX
        );
        for column in &self.columns {
            out.push_str(&column.to_declaration());
            out.push('\n');
        }
        out
    }

    /// Comma-separated declarations
    pub fn to_inline(&self) -> String {
        self.columns
            .iter()
            .map(ColumnSchema::to_declaration)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn to_config(&self) -> JsonValue {
        JsonValue::Array(self.columns.iter().map(ColumnSchema::to_config).collect())
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// First column with the given name
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    /// Merge declared defaults of `values` into columns by name. Only the
    /// first column with a matching name is considered, and a column that
    /// declares its own default keeps it. Returns the number of merged values.
    pub fn merge_values(&mut self, values: &[ColumnSchema]) -> usize {
        let mut merged = 0;
        for value in values.iter().filter(|v| v.declares_default()) {
            if let Some(column) = self.columns.iter_mut().find(|c| c.name() == value.name()) {
                if !column.declares_default() && column.merge_value(value) {
                    merged += 1;
                }
            }
        }
        merged
    }

    /// Assign zero-based indices. Fails on an empty schema.
    pub fn finalize(mut self) -> Result<Self> {
        if self.columns.is_empty() {
            return Err(BridgeError::schema("schema has no columns", ""));
        }
        for (i, column) in self.columns.iter_mut().enumerate() {
            column.set_index(i)?;
        }
        Ok(self)
    }

    /// Fall back to a single default column when empty
    pub fn or_default_column(self) -> Self {
        if self.columns.is_empty() {
            Self::new(vec![ColumnSchema::default()])
        } else {
            self
        }
    }
}
