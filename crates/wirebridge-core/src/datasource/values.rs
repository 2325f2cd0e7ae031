//! Static data source backed by configuration
//!
//! ```json
//! {
//!   "type": "values",
//!   "columns": [{"name": "id", "type": "UInt32", "nullable": false}, {"name": "label"}],
//!   "rows": [[1, "a"], [2, null]],
//!   "customColumns": [{"name": "region", "type": "String", "value": "eu-west"}],
//!   "defaults": {"String": "n/a"},
//!   "timezone": "Europe/Berlin"
//! }
//! ```
//!
//! Cells are converted once at load time; `null` is a null cell.

use anyhow::{anyhow, bail, Context};
use chrono_tz::Tz;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use super::DataSource;
use crate::buffer::WireBuffer;
use crate::defaults::DefaultValues;
use crate::param::{write_value, ParamValue};
use crate::pipeline::{QueryParameters, RowSource};
use crate::schema::{ColumnSchema, TableSchema};

type Cells = Vec<Vec<Option<ParamValue>>>;

pub struct ValuesDataSource {
    id: String,
    columns: TableSchema,
    rows: Arc<Cells>,
    custom_columns: TableSchema,
    defaults: DefaultValues,
    timezone: Option<Tz>,
}

impl ValuesDataSource {
    pub const TYPE_NAME: &'static str = "values";

    /// Factory registered under [`Self::TYPE_NAME`]
    pub fn create(id: &str, config: &JsonValue) -> anyhow::Result<Arc<dyn DataSource>> {
        Ok(Arc::new(Self::from_config(id, config)?))
    }

    pub fn from_config(id: &str, config: &JsonValue) -> anyhow::Result<Self> {
        let columns = TableSchema::from_config(config.get("columns").unwrap_or(&JsonValue::Null))
            .context("invalid 'columns'")?;
        if columns.is_empty() {
            bail!("'columns' must name at least one column");
        }
        let custom_columns = TableSchema::from_config(config.get("customColumns").unwrap_or(&JsonValue::Null))
            .context("invalid 'customColumns'")?;
        let defaults = DefaultValues::from_config(config.get("defaults").unwrap_or(&JsonValue::Null))
            .context("invalid 'defaults'")?;
        let timezone = match config.get("timezone").and_then(JsonValue::as_str) {
            Some(name) => Some(
                name.parse::<Tz>()
                    .map_err(|_| anyhow!("unknown timezone '{}'", name))?,
            ),
            None => None,
        };

        let rows = match config.get("rows") {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Array(rows)) => rows
                .iter()
                .enumerate()
                .map(|(i, row)| convert_row(&columns, row).with_context(|| format!("invalid row {}", i + 1)))
                .collect::<anyhow::Result<Cells>>()?,
            Some(_) => bail!("'rows' must be an array of arrays"),
        };

        Ok(Self {
            id: id.to_string(),
            columns,
            rows: Arc::new(rows),
            custom_columns,
            defaults,
            timezone,
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

fn convert_row(columns: &TableSchema, row: &JsonValue) -> anyhow::Result<Vec<Option<ParamValue>>> {
    let cells = row.as_array().ok_or_else(|| anyhow!("expected an array, got {}", row))?;
    if cells.len() != columns.len() {
        bail!("expected {} cells, got {}", columns.len(), cells.len());
    }
    columns
        .columns()
        .iter()
        .zip(cells)
        .map(|(column, cell)| convert_cell(column, cell).with_context(|| format!("column '{}'", column.name())))
        .collect()
}

fn convert_cell(column: &ColumnSchema, cell: &JsonValue) -> anyhow::Result<Option<ParamValue>> {
    if column.wire_type().is_enum() {
        if let JsonValue::String(name) = cell {
            return Ok(Some(ParamValue::Int(column.option_value_of(name)?)));
        }
    }
    Ok(ParamValue::from_json(cell, column.wire_type(), column.scale())?)
}

impl DataSource for ValuesDataSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn custom_columns(&self) -> &TableSchema {
        &self.custom_columns
    }

    fn default_values(&self) -> &DefaultValues {
        &self.defaults
    }

    fn timezone(&self) -> Option<Tz> {
        self.timezone
    }

    /// The configured columns, whatever the query
    fn infer_schema(&self, _query: &str, _params: &QueryParameters) -> anyhow::Result<TableSchema> {
        Ok(self.columns.clone())
    }

    fn open(
        &self,
        _query: &str,
        _schema: &TableSchema,
        _params: &QueryParameters,
    ) -> anyhow::Result<Box<dyn RowSource>> {
        Ok(Box::new(ValuesRows {
            rows: Arc::clone(&self.rows),
            scales: self.columns.columns().iter().map(ColumnSchema::scale).collect(),
            timezone: self.timezone,
            current: None,
        }))
    }
}

/// Cursor over the rows of a [`ValuesDataSource`]
pub struct ValuesRows {
    rows: Arc<Cells>,
    /// Scale each column's cells were converted with
    scales: Vec<u32>,
    timezone: Option<Tz>,
    current: Option<usize>,
}

impl ValuesRows {
    fn cell(&self, column: usize) -> anyhow::Result<&Option<ParamValue>> {
        let row = self
            .current
            .and_then(|r| self.rows.get(r))
            .ok_or_else(|| anyhow!("no current row"))?;
        row.get(column)
            .ok_or_else(|| anyhow!("column {} out of range, row has {} cells", column, row.len()))
    }
}

impl RowSource for ValuesRows {
    fn advance(&mut self) -> anyhow::Result<bool> {
        let next = self.current.map_or(0, |r| r + 1).min(self.rows.len());
        self.current = Some(next);
        Ok(next < self.rows.len())
    }

    fn is_null(&mut self, _row: usize, column: usize, _schema: &ColumnSchema) -> anyhow::Result<bool> {
        Ok(self.cell(column)?.is_none())
    }

    fn read_into(
        &mut self,
        _row: usize,
        column: usize,
        schema: &ColumnSchema,
        buf: &mut WireBuffer,
    ) -> anyhow::Result<()> {
        let value = self
            .cell(column)?
            .as_ref()
            .ok_or_else(|| anyhow!("cell {} is null", column))?;
        let mut format = schema.value_format();
        if format.timezone.is_none() {
            format.timezone = self.timezone;
        }
        let source_scale = self.scales.get(column).copied().unwrap_or_default();
        write_value(buf, schema.wire_type(), value, &format, source_scale)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{stream_rows, StreamRequest, VecSink};
    use serde_json::json;

    fn config() -> JsonValue {
        json!({
            "type": "values",
            "columns": [
                {"name": "id", "type": "UInt32", "nullable": false},
                {"name": "label", "type": "String"},
                {"name": "level", "type": "Enum8", "options": {"low": 1, "high": 2}}
            ],
            "rows": [[1, "a", "low"], [2, null, 2]],
            "customColumns": [{"name": "region", "type": "String", "nullable": false, "value": "eu-west"}],
            "defaults": {"String": "n/a"},
            "timezone": "Europe/Berlin"
        })
    }

    #[test]
    fn test_from_config() {
        let ds = ValuesDataSource::from_config("static", &config()).unwrap();
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.timezone(), Some(chrono_tz::Europe::Berlin));
        assert_eq!(ds.custom_columns().names(), vec!["region"]);
        assert_eq!(ds.default_values().value_of(crate::types::WireType::String), &ParamValue::Str("n/a".into()));
        let schema = ds.infer_schema("anything", &QueryParameters::default()).unwrap();
        assert_eq!(schema.names(), vec!["id", "label", "level"]);
    }

    #[test]
    fn test_invalid_config() {
        let err = ValuesDataSource::from_config("s", &json!({"columns": []})).err().unwrap();
        assert!(err.to_string().contains("at least one column"));

        let bad_row = json!({"columns": [{"name": "a", "type": "Int32"}], "rows": [[1, 2]]});
        let err = ValuesDataSource::from_config("s", &bad_row).err().unwrap();
        assert!(format!("{:#}", err).contains("invalid row 1"));

        let bad_cell = json!({"columns": [{"name": "a", "type": "Int32"}], "rows": [["x"]]});
        assert!(ValuesDataSource::from_config("s", &bad_cell).is_err());

        let bad_tz = json!({"columns": [{"name": "a"}], "timezone": "Mars/Olympus"});
        assert!(ValuesDataSource::from_config("s", &bad_tz).is_err());
    }

    #[test]
    fn test_streams_through_pipeline() {
        let ds = ValuesDataSource::from_config("static", &config()).unwrap();
        let params = QueryParameters {
            null_as_default: true,
            custom_columns: true,
            ..QueryParameters::default()
        };
        let result = ds.infer_schema("", &params).unwrap();
        let requested = TableSchema::from_text("level Enum8('low' = 1, 'high' = 2), label String, region String").unwrap();
        let request = StreamRequest {
            datasource_id: ds.id(),
            requested_columns: &requested,
            custom_columns: ds.custom_columns(),
            result_columns: &result,
            defaults: ds.default_values(),
            timezone: ds.timezone(),
            params: &params,
        };
        let mut rows = ds.open("", &result, &params).unwrap();
        let mut sink = VecSink::new();
        let stats = stream_rows(&request, rows.as_mut(), &mut sink).unwrap();
        assert_eq!(stats.rows, 2);

        let mut buf = WireBuffer::from_bytes(sink.concat());
        assert_eq!(buf.read_int8().unwrap(), 1);
        assert_eq!(buf.read_string().unwrap(), "a");
        assert_eq!(buf.read_string().unwrap(), "eu-west");
        assert_eq!(buf.read_int8().unwrap(), 2);
        // null label in a non-nullable requested column takes the registry default
        assert_eq!(buf.read_string().unwrap(), "n/a");
        assert_eq!(buf.read_string().unwrap(), "eu-west");
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_dates_keep_calendar_day_west_of_utc() {
        let config = json!({
            "columns": [
                {"name": "d", "type": "Date", "nullable": false},
                {"name": "at", "type": "DateTime", "nullable": false}
            ],
            "rows": [["2024-01-01", "2024-01-01 12:00:00"]],
            "timezone": "America/New_York"
        });
        let ds = ValuesDataSource::from_config("ny", &config).unwrap();
        let params = QueryParameters::default();
        let result = ds.infer_schema("", &params).unwrap();
        let request = StreamRequest {
            datasource_id: ds.id(),
            requested_columns: &result,
            custom_columns: ds.custom_columns(),
            result_columns: &result,
            defaults: ds.default_values(),
            timezone: ds.timezone(),
            params: &params,
        };
        let mut rows = ds.open("", &result, &params).unwrap();
        let mut sink = VecSink::new();
        stream_rows(&request, rows.as_mut(), &mut sink).unwrap();

        let mut buf = WireBuffer::from_bytes(sink.concat());
        assert_eq!(buf.read_date().unwrap(), chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        // instants still move by the zone offset
        let noon_utc = 1_704_110_400i64;
        assert_eq!(buf.read_datetime_secs().unwrap() as i64, noon_utc - 5 * 3600);
    }

    #[test]
    fn test_cursor_stays_exhausted() {
        let ds = ValuesDataSource::from_config("static", &config()).unwrap();
        let mut rows = ds.open("", &ds.columns, &QueryParameters::default()).unwrap();
        assert!(rows.advance().unwrap());
        assert!(rows.advance().unwrap());
        assert!(!rows.advance().unwrap());
        assert!(!rows.advance().unwrap());
    }
}
