//! Row streaming pipeline
//!
//! Turns a [`RowSource`] into batches of the binary row format:
//!
//! 1. every requested column is resolved, by name, to the virtual data
//!    source column, a custom column, or a result column of the source
//! 2. leading rows are skipped (`position` wins over `offset`)
//! 3. rows are written cell by cell into a [`WireBuffer`], with null flags
//!    for nullable columns and default substitution for null cells
//! 4. every `batch_size` rows the buffer is flushed to the sink; the
//!    remainder is flushed at the end
//!
//! The sink's open state and deadline are checked before each flush, never
//! mid-row. Mutation and debug requests do not stream; they each write a
//! single fixed-shape row.

mod params;
mod sink;
mod source;

pub use params::QueryParameters;
pub use sink::{ChannelSink, ResponseSink, VecSink};
pub use source::RowSource;

use bytes::Bytes;
use chrono_tz::Tz;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use wirebridge_common::{BridgeError, Result};

use crate::buffer::WireBuffer;
use crate::defaults::DefaultValues;
use crate::param::{write_value, ParamValue, ValueFormat};
use crate::schema::{ColumnSchema, TableSchema};
use crate::types::WireType;

/// Column of the mutation result row
pub const AFFECTED_ROWS_COLUMN: &str = "affected_rows";

/// Columns of the debug result row
pub const DEBUG_COLUMNS: [&str; 6] = [
    "datasource",
    "query",
    "requested_columns",
    "result_columns",
    "custom_columns",
    "parameters",
];

/// Bytes reserved per cell when sizing a fresh batch buffer
const BYTES_PER_CELL_HINT: usize = 4;

/// Cap on the bytes reserved up front for one batch; buffers still grow past it
const MAX_BATCH_CAPACITY_HINT: usize = 16 * 1024 * 1024;

/// Everything the pipeline needs besides the row source and the sink
#[derive(Debug, Clone, Copy)]
pub struct StreamRequest<'a> {
    pub datasource_id: &'a str,
    /// Shape the caller wants back
    pub requested_columns: &'a TableSchema,
    /// Constant columns configured on the data source
    pub custom_columns: &'a TableSchema,
    /// What the row source yields
    pub result_columns: &'a TableSchema,
    pub defaults: &'a DefaultValues,
    /// Applied to temporal columns without their own timezone
    pub timezone: Option<Tz>,
    pub params: &'a QueryParameters,
}

/// Counters of one streamed response
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    pub rows: u64,
    pub batches: u64,
    pub bytes: u64,
}

/// Where a requested column's values come from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnOrigin<'a> {
    /// The data source id
    DataSource,
    /// A custom column's configured value
    Custom(&'a ColumnSchema),
    /// Column `index` of the row source
    Result { index: usize },
}

/// A requested column and the origin of its values
#[derive(Debug, Clone)]
pub struct ResolvedColumn<'a> {
    pub column: &'a ColumnSchema,
    pub origin: ColumnOrigin<'a>,
    format: ValueFormat,
}

impl<'a> ResolvedColumn<'a> {
    /// Write the value used in place of a null cell: the column's own
    /// default if it has one, otherwise the registry default of its type.
    fn write_substitute(&self, buf: &mut WireBuffer, defaults: &DefaultValues) -> Result<()> {
        let ty = self.column.wire_type();
        if self.column.has_default() {
            let cell = self.column.default_value();
            write_value(buf, ty, cell.value(), &self.format, cell.scale())
        } else {
            let slot = defaults.get(ty);
            write_value(buf, ty, slot.value(), &self.format, slot.scale())
        }
    }

    fn write_constant(&self, buf: &mut WireBuffer, value: &ParamValue, source_scale: u32) -> Result<()> {
        if self.column.is_nullable() {
            buf.write_null_flag(false);
        }
        write_value(buf, self.column.wire_type(), value, &self.format, source_scale)
    }
}

/// Resolve each requested column to its origin.
///
/// Priority: virtual data source column (when enabled), custom column (when
/// enabled), then result column. A column with no origin is an error listing
/// the available result columns.
pub fn resolve_columns<'a>(request: &StreamRequest<'a>) -> Result<Vec<ResolvedColumn<'a>>> {
    let params = request.params;
    request
        .requested_columns
        .columns()
        .iter()
        .map(|column| {
            let name = column.name();
            let origin = if params.datasource_column && name == params.datasource_column_name {
                ColumnOrigin::DataSource
            } else if let Some(custom) = request
                .custom_columns
                .column(name)
                .filter(|_| params.custom_columns)
            {
                ColumnOrigin::Custom(custom)
            } else if let Some(index) = request.result_columns.position_of(name) {
                ColumnOrigin::Result { index }
            } else {
                return Err(BridgeError::Resolution {
                    column: name.to_string(),
                    available: request.result_columns.names(),
                });
            };
            let mut format = column.value_format();
            if format.timezone.is_none() {
                format.timezone = request.timezone;
            }
            Ok(ResolvedColumn {
                column,
                origin,
                format,
            })
        })
        .collect()
}

/// Stream all rows of `source` to `sink`
pub fn stream_rows(
    request: &StreamRequest<'_>,
    source: &mut dyn RowSource,
    sink: &mut dyn ResponseSink,
) -> Result<StreamStats> {
    let started = Instant::now();
    let params = request.params;
    let id = request.datasource_id;
    let columns = resolve_columns(request)?;

    let deadline = effective_deadline(sink, started, params.timeout);
    let batch_size = params.batch_size.max(1);
    let capacity = batch_capacity(columns.len(), batch_size);

    info!(
        datasource = %id,
        columns = columns.len(),
        batch_size,
        offset = params.offset,
        position = params.position,
        "streaming rows"
    );

    // skip leading rows; with a position the source ends up on the first row to emit
    let skip = if params.position > 0 { params.position } else { params.offset };
    for skipped in 0..skip {
        let more = source.advance().map_err(|e| BridgeError::row_source(id, e))?;
        if !more {
            return Err(BridgeError::row_source(
                id,
                anyhow::anyhow!("cannot skip {} rows, result ended after {}", skip, skipped),
            ));
        }
    }
    let mut on_row = params.position > 0;
    let mut row_number = skip.saturating_sub(on_row as u64) as usize;

    let mut stats = StreamStats::default();
    let mut buf = WireBuffer::with_capacity(capacity);
    let mut rows_in_batch = 0usize;

    loop {
        if !on_row && !source.advance().map_err(|e| BridgeError::row_source(id, e))? {
            break;
        }
        on_row = false;

        write_row(request, &columns, source, &mut buf, row_number)?;
        row_number += 1;
        rows_in_batch += 1;
        stats.rows += 1;

        if rows_in_batch == batch_size {
            let batch = std::mem::replace(&mut buf, WireBuffer::with_capacity(capacity));
            flush(sink, batch, deadline, &mut stats)?;
            rows_in_batch = 0;
        }
    }

    if rows_in_batch > 0 {
        flush(sink, buf, deadline, &mut stats)?;
    }

    info!(
        datasource = %id,
        rows = stats.rows,
        batches = stats.batches,
        bytes = stats.bytes,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "streaming completed"
    );
    Ok(stats)
}

fn write_row(
    request: &StreamRequest<'_>,
    columns: &[ResolvedColumn<'_>],
    source: &mut dyn RowSource,
    buf: &mut WireBuffer,
    row: usize,
) -> Result<()> {
    let id = request.datasource_id;
    for resolved in columns {
        let column = resolved.column;
        match resolved.origin {
            ColumnOrigin::DataSource => {
                resolved.write_constant(buf, &ParamValue::Str(id.to_string()), 0)?;
            }
            ColumnOrigin::Custom(custom) => {
                let cell = custom.default_value();
                resolved.write_constant(buf, cell.value(), cell.scale())?;
            }
            ColumnOrigin::Result { index } => {
                let is_null = source
                    .is_null(row, index, column)
                    .map_err(|e| BridgeError::row_source(id, e))?;
                match (is_null, column.is_nullable()) {
                    (true, true) if request.params.null_as_default => {
                        buf.write_null_flag(false);
                        resolved.write_substitute(buf, request.defaults)?;
                    }
                    (true, true) => {
                        buf.write_null_flag(true);
                    }
                    (true, false) => resolved.write_substitute(buf, request.defaults)?,
                    (false, nullable) => {
                        if nullable {
                            buf.write_null_flag(false);
                        }
                        source
                            .read_into(row, index, column, buf)
                            .map_err(|e| BridgeError::row_source(id, e))?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Hand a finished batch to the sink, unless it is closed or out of time
/// Earlier of the sink's deadline and `timeout` counted from `started`
fn effective_deadline(
    sink: &dyn ResponseSink,
    started: Instant,
    timeout: Option<Duration>,
) -> Option<Instant> {
    let own = timeout.and_then(|t| started.checked_add(t));
    match (sink.deadline(), own) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn batch_capacity(columns: usize, batch_size: usize) -> usize {
    columns
        .max(1)
        .saturating_mul(BYTES_PER_CELL_HINT)
        .saturating_mul(batch_size)
        .min(MAX_BATCH_CAPACITY_HINT)
}

fn flush(
    sink: &mut dyn ResponseSink,
    batch: WireBuffer,
    deadline: Option<Instant>,
    stats: &mut StreamStats,
) -> Result<()> {
    if !sink.is_open() {
        return Err(BridgeError::aborted("response sink closed"));
    }
    if deadline.is_some_and(|d| Instant::now() >= d) {
        return Err(BridgeError::aborted("deadline exceeded"));
    }
    let bytes: Bytes = batch.freeze();
    let len = bytes.len() as u64;
    sink.write(bytes)
        .map_err(|e| BridgeError::aborted(format!("write failed: {:#}", e)))?;
    stats.batches += 1;
    stats.bytes += len;
    debug!(batch = stats.batches, bytes = len, rows = stats.rows, "flushed batch");
    Ok(())
}

/// Schema of the mutation result row
pub fn mutation_schema() -> TableSchema {
    let column = ColumnSchema::builder(AFFECTED_ROWS_COLUMN, WireType::UInt64)
        .nullable(false)
        .build()
        .unwrap_or_default();
    TableSchema::new(vec![column])
}

/// Write the single-row mutation result
pub fn write_mutation_result(
    affected_rows: u64,
    timeout: Option<Duration>,
    started: Instant,
    sink: &mut dyn ResponseSink,
) -> Result<StreamStats> {
    let mut buf = WireBuffer::with_capacity(8);
    buf.write_uint64(affected_rows);
    let mut stats = StreamStats {
        rows: 1,
        ..Default::default()
    };
    let deadline = effective_deadline(sink, started, timeout);
    flush(sink, buf, deadline, &mut stats)?;
    info!(affected_rows, "mutation completed");
    Ok(stats)
}

/// Diagnostic dump of a resolved request
#[derive(Debug, Clone, PartialEq)]
pub struct DebugInfo {
    pub datasource: String,
    pub query: String,
    pub requested_columns: String,
    pub result_columns: String,
    pub custom_columns: String,
    pub parameters: String,
}

impl DebugInfo {
    pub fn new(request: &StreamRequest<'_>, query: &str) -> Self {
        Self {
            datasource: request.datasource_id.to_string(),
            query: query.to_string(),
            requested_columns: request.requested_columns.to_inline(),
            result_columns: request.result_columns.to_inline(),
            custom_columns: request.custom_columns.to_inline(),
            parameters: request.params.to_string(),
        }
    }

    fn values(&self) -> [&str; 6] {
        [
            &self.datasource,
            &self.query,
            &self.requested_columns,
            &self.result_columns,
            &self.custom_columns,
            &self.parameters,
        ]
    }
}

/// Schema of the debug result row
pub fn debug_schema() -> TableSchema {
    let columns = DEBUG_COLUMNS
        .iter()
        .filter_map(|name| {
            ColumnSchema::builder(*name, WireType::String)
                .nullable(false)
                .build()
                .ok()
        })
        .collect();
    TableSchema::new(columns)
}

/// Write the single-row debug result
pub fn write_debug_info(info: &DebugInfo, sink: &mut dyn ResponseSink) -> Result<StreamStats> {
    let mut buf = WireBuffer::new();
    for value in info.values() {
        buf.write_string(value, false)?;
    }
    let mut stats = StreamStats {
        rows: 1,
        ..Default::default()
    };
    let deadline = sink.deadline();
    flush(sink, buf, deadline, &mut stats)?;
    Ok(stats)
}
