//! Column and table schemas
//!
//! - `column`: one column, its declaration and config forms
//! - `table`: ordered list of columns, multi-line and inline forms
//! - `declaration`: the hand-written declaration grammar

mod column;
mod declaration;
mod table;

pub use column::{
    emit_default_values, set_emit_default_values, ColumnBuilder, ColumnSchema, DEFAULT_COLUMN_NAME,
};
pub use table::{TableSchema, CURRENT_FORMAT_VERSION};
