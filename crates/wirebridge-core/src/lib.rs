//! Wirebridge Core Library
//!
//! Binary row codec and streaming pipeline:
//! - `buffer`: little-endian reader/writer of the wire format
//! - `types`: catalog of wire types with their size and precision rules
//! - `param` / `defaults`: typed value cells and per-type defaults
//! - `schema`: column and table schemas, textual and config forms
//! - `pipeline`: batches rows of a row source into a response sink
//! - `schema_cache`, `datasource`, `handler`: request execution around it

pub mod buffer;
pub mod datasource;
pub mod defaults;
pub mod handler;
pub mod param;
pub mod pipeline;
pub mod schema;
pub mod schema_cache;
pub mod types;

// Re-export commonly used types
pub use buffer::WireBuffer;
pub use datasource::{DataSource, DataSourceManager, DataSourceRegistry};
pub use defaults::DefaultValues;
pub use handler::{QueryHandler, QueryRequest};
pub use param::{ParamValue, TypedParameter, ValueFormat};
pub use pipeline::{QueryParameters, ResponseSink, RowSource, StreamRequest, StreamStats};
pub use schema::{ColumnSchema, TableSchema};
pub use schema_cache::SchemaCache;
pub use types::WireType;
