use crate::error::AdapterError;
use crate::DataSourceAdapter;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps lowercased database type to its adapter.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn DataSourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new(adapters: HashMap<String, Arc<dyn DataSourceAdapter>>) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|(key, adapter)| (key.to_lowercase(), adapter))
            .collect();
        Self { adapters }
    }

    pub fn adapter_for(&self, db_type: &str) -> Result<Arc<dyn DataSourceAdapter>, AdapterError> {
        self.adapters
            .get(&db_type.to_lowercase())
            .cloned()
            .ok_or_else(|| AdapterError::NotConfigured(db_type.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.adapters.keys().cloned().collect();
        types.sort();
        types
    }
}
