//! Request execution
//!
//! Ties together data source lookup, schema inference through the cache and
//! the three terminal behaviors: mutation, debug and row streaming.

use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use wirebridge_common::{BridgeError, QuerySettings, Result};

use crate::datasource::{DataSource, DataSourceManager};
use crate::pipeline::{
    stream_rows, write_debug_info, write_mutation_result, DebugInfo, QueryParameters, ResponseSink,
    StreamRequest, StreamStats,
};
use crate::schema::TableSchema;
use crate::schema_cache::SchemaCache;

/// One query against a configured data source
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub datasource: String,
    pub query: String,
    /// Requested columns in textual form; all result columns when absent
    pub columns: Option<String>,
    pub params: HashMap<String, String>,
}

impl QueryRequest {
    pub fn new(datasource: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            datasource: datasource.into(),
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = Some(columns.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

pub struct QueryHandler {
    manager: Arc<DataSourceManager>,
    cache: Arc<SchemaCache>,
    settings: QuerySettings,
}

impl QueryHandler {
    pub fn new(manager: Arc<DataSourceManager>, cache: Arc<SchemaCache>, settings: QuerySettings) -> Self {
        Self {
            manager,
            cache,
            settings,
        }
    }

    pub fn manager(&self) -> &DataSourceManager {
        &self.manager
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Reload data sources and drop cached schemas of every id seen before or after
    pub fn reload(&self, configs: &JsonValue) -> Result<usize> {
        let before = self.manager.ids();
        let count = self.manager.reload(configs)?;
        self.invalidate(before);
        Ok(count)
    }

    /// Like [`reload`](Self::reload), reading the configuration from a JSON file
    pub fn load_file(&self, path: &Path) -> Result<usize> {
        let before = self.manager.ids();
        let count = self.manager.load_file(path)?;
        self.invalidate(before);
        Ok(count)
    }

    fn invalidate(&self, before: Vec<String>) {
        let ids: BTreeSet<String> = before.into_iter().chain(self.manager.ids()).collect();
        for id in &ids {
            self.cache.invalidate(id);
        }
        debug!(datasources = ids.len(), "schema cache invalidated after reload");
    }

    /// Run `request`, writing the response to `sink`
    pub fn execute(&self, request: &QueryRequest, sink: &mut dyn ResponseSink) -> Result<StreamStats> {
        let result = self.run(request, sink);
        if let Err(e) = &result {
            if e.is_expected() {
                debug!(datasource = %request.datasource, error = %e, "request aborted");
            } else {
                warn!(datasource = %request.datasource, code = e.code(), error = %e, "request failed");
            }
        }
        result
    }

    fn run(&self, request: &QueryRequest, sink: &mut dyn ResponseSink) -> Result<StreamStats> {
        let started = Instant::now();
        let mut params = QueryParameters::from_settings(&self.settings);
        params.merge_map(&request.params)?;

        let datasource = self.manager.require(&request.datasource)?;
        let id = datasource.id();
        let query = request.query.as_str();
        info!(datasource = %id, mutation = params.mutation, debug = params.debug, "executing query");

        if params.mutation {
            let affected = datasource
                .execute_mutation(query, &params)
                .map_err(|e| BridgeError::row_source(id, e))?;
            return write_mutation_result(affected, params.timeout, started, sink);
        }

        let result_columns = self.result_columns(datasource.as_ref(), query, &params)?;
        let requested_columns = match request.columns.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                let mut requested = TableSchema::from_text(text)?;
                let merged = requested.merge_values(result_columns.columns());
                debug!(datasource = %id, merged, "merged result column defaults");
                requested
            }
            _ => result_columns.as_ref().clone(),
        }
        .finalize()?;

        let stream = StreamRequest {
            datasource_id: id,
            requested_columns: &requested_columns,
            custom_columns: datasource.custom_columns(),
            result_columns: &result_columns,
            defaults: datasource.default_values(),
            timezone: datasource.timezone(),
            params: &params,
        };

        if params.debug {
            return write_debug_info(&DebugInfo::new(&stream, query), sink);
        }

        let mut rows = datasource
            .open(query, &result_columns, &params)
            .map_err(|e| BridgeError::row_source(id, e))?;
        stream_rows(&stream, rows.as_mut(), sink)
    }

    fn result_columns(
        &self,
        datasource: &dyn DataSource,
        query: &str,
        params: &QueryParameters,
    ) -> Result<Arc<TableSchema>> {
        let id = datasource.id();
        self.cache.get_or_infer(id, query, params.no_cache, || {
            datasource
                .infer_schema(query, params)
                .map_err(|e| BridgeError::row_source(id, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::WireBuffer;
    use crate::datasource::DataSourceRegistry;
    use crate::defaults::DefaultValues;
    use crate::pipeline::{debug_schema, RowSource, VecSink};
    use serde_json::{json, Value as JsonValue};

    struct Counter {
        id: String,
        custom: TableSchema,
        defaults: DefaultValues,
    }

    impl DataSource for Counter {
        fn id(&self) -> &str {
            &self.id
        }

        fn type_name(&self) -> &str {
            "counter"
        }

        fn custom_columns(&self) -> &TableSchema {
            &self.custom
        }

        fn default_values(&self) -> &DefaultValues {
            &self.defaults
        }

        fn infer_schema(&self, _query: &str, _params: &QueryParameters) -> anyhow::Result<TableSchema> {
            anyhow::bail!("counter has no rows")
        }

        fn open(
            &self,
            _query: &str,
            _schema: &TableSchema,
            _params: &QueryParameters,
        ) -> anyhow::Result<Box<dyn RowSource>> {
            anyhow::bail!("counter has no rows")
        }

        fn execute_mutation(&self, query: &str, _params: &QueryParameters) -> anyhow::Result<u64> {
            Ok(query.len() as u64)
        }
    }

    fn counter(id: &str, _config: &JsonValue) -> anyhow::Result<Arc<dyn DataSource>> {
        Ok(Arc::new(Counter {
            id: id.to_string(),
            custom: TableSchema::default(),
            defaults: DefaultValues::new(),
        }))
    }

    fn handler() -> QueryHandler {
        let mut registry = DataSourceRegistry::new();
        registry.register("counter", counter);
        let manager = DataSourceManager::new(registry);
        manager
            .reload(&json!({
                "static": {
                    "type": "values",
                    "columns": [
                        {"name": "id", "type": "Int32", "nullable": false},
                        {"name": "name", "type": "String"}
                    ],
                    "rows": [[1, "one"], [2, null], [3, "three"]]
                },
                "counter": {"type": "counter"}
            }))
            .unwrap();
        QueryHandler::new(
            Arc::new(manager),
            Arc::new(SchemaCache::default()),
            QuerySettings::default(),
        )
    }

    #[test]
    fn test_streams_all_result_columns() {
        let handler = handler();
        let mut sink = VecSink::new();
        let request = QueryRequest::new("static", "select *").with_param("batch_size", "2");
        let stats = handler.execute(&request, &mut sink).unwrap();
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.batches, 2);

        let mut buf = WireBuffer::from_bytes(sink.concat());
        assert_eq!(buf.read_int32().unwrap(), 1);
        assert!(!buf.read_null_flag().unwrap());
        assert_eq!(buf.read_string().unwrap(), "one");
        assert_eq!(buf.read_int32().unwrap(), 2);
        assert!(buf.read_null_flag().unwrap());
        assert_eq!(buf.read_int32().unwrap(), 3);
    }

    #[test]
    fn test_requested_columns_and_pagination() {
        let handler = handler();
        let mut sink = VecSink::new();
        let request = QueryRequest::new("static", "select *")
            .with_columns("datasource String, id Int32")
            .with_param("datasource_column", "")
            .with_param("position", "2");
        handler.execute(&request, &mut sink).unwrap();

        let mut buf = WireBuffer::from_bytes(sink.concat());
        for expected in [2, 3] {
            assert_eq!(buf.read_string().unwrap(), "static");
            assert_eq!(buf.read_int32().unwrap(), expected);
        }
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_schema_is_cached_per_query() {
        let handler = handler();
        let request = QueryRequest::new("static", "select *");
        handler.execute(&request, &mut VecSink::new()).unwrap();
        handler.execute(&request, &mut VecSink::new()).unwrap();
        assert_eq!(handler.cache().len(), 1);
        assert_eq!(handler.cache().stats().hits.load(std::sync::atomic::Ordering::Relaxed), 1);

        let bypass = request.clone().with_param("no_cache", "true");
        handler.execute(&bypass, &mut VecSink::new()).unwrap();
        assert_eq!(handler.cache().stats().bypassed.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn test_mutation_mode() {
        let handler = handler();
        let mut sink = VecSink::new();
        let request = QueryRequest::new("counter", "delete 12").with_param("mutation", "1");
        handler.execute(&request, &mut sink).unwrap();
        assert_eq!(sink.concat(), 9u64.to_le_bytes().to_vec());

        let request = QueryRequest::new("static", "delete").with_param("mutation", "1");
        let err = handler.execute(&request, &mut VecSink::new()).unwrap_err();
        assert_eq!(err.code(), "DATA_ACCESS_ERROR");
    }

    #[test]
    fn test_reload_invalidates_cached_schema() {
        let handler = handler();
        let request = QueryRequest::new("static", "select *").with_columns("id Int32");
        let mut sink = VecSink::new();
        handler.execute(&request, &mut sink).unwrap();
        assert_eq!(WireBuffer::from_bytes(sink.concat()).read_int32().unwrap(), 1);
        assert_eq!(handler.cache().len(), 1);

        let count = handler
            .reload(&json!({
                "static": {
                    "type": "values",
                    "columns": [
                        {"name": "label", "type": "String", "nullable": false},
                        {"name": "id", "type": "Int32", "nullable": false}
                    ],
                    "rows": [["seven", 7]]
                }
            }))
            .unwrap();
        assert_eq!(count, 1);
        assert!(handler.cache().is_empty());

        let mut sink = VecSink::new();
        handler.execute(&request, &mut sink).unwrap();
        let mut buf = WireBuffer::from_bytes(sink.concat());
        assert_eq!(buf.read_int32().unwrap(), 7);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_failed_reload_keeps_cache() {
        let handler = handler();
        handler
            .execute(&QueryRequest::new("static", "select *"), &mut VecSink::new())
            .unwrap();
        assert!(handler.reload(&json!({"broken": {"type": "nope"}})).is_err());
        assert_eq!(handler.cache().len(), 1);
    }

    #[test]
    fn test_requested_columns_take_result_defaults() {
        let handler = handler();
        handler
            .reload(&json!({
                "people": {
                    "type": "values",
                    "columns": [
                        {"name": "id", "type": "Int32", "nullable": false},
                        {"name": "name", "type": "String", "value": "anonymous"}
                    ],
                    "rows": [[1, null]]
                }
            }))
            .unwrap();

        let mut sink = VecSink::new();
        let request = QueryRequest::new("people", "select *").with_columns("name String, id Int32");
        handler.execute(&request, &mut sink).unwrap();
        let mut buf = WireBuffer::from_bytes(sink.concat());
        assert_eq!(buf.read_string().unwrap(), "anonymous");
        assert_eq!(buf.read_int32().unwrap(), 1);

        // a default on the request wins
        let mut sink = VecSink::new();
        let request = QueryRequest::new("people", "select *").with_columns("name String DEFAULT 'x'");
        handler.execute(&request, &mut sink).unwrap();
        assert_eq!(WireBuffer::from_bytes(sink.concat()).read_string().unwrap(), "x");
    }

    #[test]
    fn test_huge_batch_size_is_clamped() {
        let handler = handler();
        let request =
            QueryRequest::new("static", "select *").with_param("batch_size", usize::MAX.to_string());
        let stats = handler.execute(&request, &mut VecSink::new()).unwrap();
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.batches, 1);
    }

    #[test]
    fn test_debug_mode() {
        let handler = handler();
        let mut sink = VecSink::new();
        let request = QueryRequest::new("static", "select 1")
            .with_columns("id Int32")
            .with_param("debug", "");
        handler.execute(&request, &mut sink).unwrap();

        let mut buf = WireBuffer::from_bytes(sink.concat());
        let values: Vec<String> = debug_schema()
            .columns()
            .iter()
            .map(|c| c.read_value_text(&mut buf).unwrap())
            .collect();
        assert_eq!(values[0], "static");
        assert_eq!(values[1], "select 1");
        assert_eq!(values[3], "`id` Int32, `name` Nullable(String)");
    }

    #[test]
    fn test_errors() {
        let handler = handler();
        let err = handler
            .execute(&QueryRequest::new("missing", "q"), &mut VecSink::new())
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");

        let err = handler
            .execute(&QueryRequest::new("counter", "q"), &mut VecSink::new())
            .unwrap_err();
        assert_eq!(err.code(), "DATA_ACCESS_ERROR");
        assert!(err.to_string().contains("counter has no rows"));

        let request = QueryRequest::new("static", "q").with_columns("nope Int32");
        let err = handler.execute(&request, &mut VecSink::new()).unwrap_err();
        assert_eq!(err.code(), "RESOLUTION_ERROR");

        let request = QueryRequest::new("static", "q").with_param("batch_size", "many");
        assert!(handler.execute(&request, &mut VecSink::new()).is_err());
    }
}
