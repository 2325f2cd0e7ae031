//! Data sources
//!
//! A data source turns a query into a result schema and a [`RowSource`].
//! Concrete types are picked by the `type` field of their configuration,
//! through a static table of factory functions filled at process start.

mod manager;
mod values;

pub use manager::DataSourceManager;
pub use values::{ValuesDataSource, ValuesRows};

use chrono_tz::Tz;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use wirebridge_common::{BridgeError, Result};

use crate::defaults::DefaultValues;
use crate::pipeline::{QueryParameters, RowSource};
use crate::schema::TableSchema;

/// A configured external data source
pub trait DataSource: Send + Sync {
    /// Identifier the data source was configured under
    fn id(&self) -> &str;

    /// Registered type name, e.g. `values`
    fn type_name(&self) -> &str;

    /// Constant columns exposed with `custom_columns`
    fn custom_columns(&self) -> &TableSchema;

    /// Substitutes for null cells
    fn default_values(&self) -> &DefaultValues;

    /// Timezone applied to temporal columns without their own
    fn timezone(&self) -> Option<Tz> {
        None
    }

    /// Columns `query` yields
    fn infer_schema(&self, query: &str, params: &QueryParameters) -> anyhow::Result<TableSchema>;

    /// Start reading the rows of `query`
    fn open(
        &self,
        query: &str,
        schema: &TableSchema,
        params: &QueryParameters,
    ) -> anyhow::Result<Box<dyn RowSource>>;

    /// Run `query` as a mutation, returning the number of affected rows
    fn execute_mutation(&self, _query: &str, _params: &QueryParameters) -> anyhow::Result<u64> {
        anyhow::bail!("data source type '{}' does not support mutations", self.type_name())
    }
}

/// Builds a data source from its id and configuration object
pub type DataSourceFactory = fn(&str, &JsonValue) -> anyhow::Result<Arc<dyn DataSource>>;

/// Type name → factory
#[derive(Clone)]
pub struct DataSourceRegistry {
    factories: HashMap<String, DataSourceFactory>,
}

impl Default for DataSourceRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(ValuesDataSource::TYPE_NAME, ValuesDataSource::create);
        registry
    }
}

impl DataSourceRegistry {
    /// Registry with the built-in types
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one for the same name
    pub fn register(&mut self, type_name: &str, factory: DataSourceFactory) {
        self.factories.insert(type_name.to_ascii_lowercase(), factory);
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the data source described by `config`
    pub fn create(&self, id: &str, config: &JsonValue) -> Result<Arc<dyn DataSource>> {
        let type_name = config
            .get("type")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| BridgeError::Config(format!("data source '{}' has no 'type'", id)))?;
        let factory = self
            .factories
            .get(&type_name.to_ascii_lowercase())
            .ok_or_else(|| {
                BridgeError::Config(format!(
                    "data source '{}' has unknown type '{}', known types: [{}]",
                    id,
                    type_name,
                    self.type_names().join(", ")
                ))
            })?;
        factory(id, config).map_err(|e| BridgeError::Config(format!("data source '{}': {:#}", id, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Empty {
        id: String,
        columns: TableSchema,
        defaults: DefaultValues,
    }

    impl DataSource for Empty {
        fn id(&self) -> &str {
            &self.id
        }

        fn type_name(&self) -> &str {
            "empty"
        }

        fn custom_columns(&self) -> &TableSchema {
            &self.columns
        }

        fn default_values(&self) -> &DefaultValues {
            &self.defaults
        }

        fn infer_schema(&self, _query: &str, _params: &QueryParameters) -> anyhow::Result<TableSchema> {
            Ok(TableSchema::default())
        }

        fn open(
            &self,
            _query: &str,
            _schema: &TableSchema,
            _params: &QueryParameters,
        ) -> anyhow::Result<Box<dyn RowSource>> {
            anyhow::bail!("nothing to read")
        }
    }

    fn empty(id: &str, _config: &JsonValue) -> anyhow::Result<Arc<dyn DataSource>> {
        Ok(Arc::new(Empty {
            id: id.to_string(),
            columns: TableSchema::default(),
            defaults: DefaultValues::new(),
        }))
    }

    #[test]
    fn test_builtin_values_type() {
        let registry = DataSourceRegistry::new();
        assert_eq!(registry.type_names(), vec!["values"]);
        let ds = registry
            .create("static", &json!({"type": "Values", "columns": [{"name": "a", "type": "Int32"}]}))
            .unwrap();
        assert_eq!(ds.id(), "static");
        assert_eq!(ds.type_name(), "values");
    }

    #[test]
    fn test_register_custom_type() {
        let mut registry = DataSourceRegistry::new();
        registry.register("empty", empty);
        let ds = registry.create("e", &json!({"type": "empty"})).unwrap();
        assert_eq!(ds.type_name(), "empty");
        let err = ds.execute_mutation("delete", &QueryParameters::default()).unwrap_err();
        assert!(err.to_string().contains("does not support mutations"));
    }

    #[test]
    fn test_unknown_type() {
        let registry = DataSourceRegistry::new();
        let err = registry.create("x", &json!({"type": "jdbc"})).err().unwrap();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("known types: [values]"));

        let err = registry.create("x", &json!({})).err().unwrap();
        assert!(err.to_string().contains("has no 'type'"));
    }
}
