//! Row source contract
//!
//! Implemented by whatever reads the underlying data (driver cursors,
//! script results, static config). Failures are reported as
//! `anyhow::Error`; the pipeline attributes them to the data source.

use crate::buffer::WireBuffer;
use crate::schema::ColumnSchema;

/// Row-at-a-time access to a result
pub trait RowSource: Send {
    /// Move to the next row. `false` once the source is exhausted.
    fn advance(&mut self) -> anyhow::Result<bool>;

    /// Whether the cell at `column` of the current row is null.
    /// `row` is the zero-based number of the current row.
    fn is_null(&mut self, row: usize, column: usize, schema: &ColumnSchema) -> anyhow::Result<bool>;

    /// Write the non-null cell at `column` of the current row, using the
    /// layout of `schema` (no null flag).
    fn read_into(
        &mut self,
        row: usize,
        column: usize,
        schema: &ColumnSchema,
        buf: &mut WireBuffer,
    ) -> anyhow::Result<()>;
}
