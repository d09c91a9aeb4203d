//! Adapter wiring from a YAML file.
//!
//! ```yaml
//! adapters:
//!   postgres:
//!     type: http
//!     endpoint: http://localhost:9301/rpc
//!   mysql:
//!     type: stdio
//!     command: db-rpc-mysql
//!     args: ["--read-only"]
//! ```

use crate::error::AdapterError;
use crate::registry::AdapterRegistry;
use crate::rpc::RpcAdapter;
use crate::transport::{HttpTransport, StdioTransport, Transport};
use crate::DataSourceAdapter;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct AdapterEntry {
    /// Transport kind: `http` or `stdio`.
    #[serde(rename = "type")]
    pub transport: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdapterFileConfig {
    pub adapters: HashMap<String, AdapterEntry>,
}

impl AdapterFileConfig {
    pub fn load(path: &str) -> Result<Self, AdapterError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| AdapterError::Config(format!("invalid adapter config: {e}")))?;
        if config.adapters.is_empty() {
            return Err(AdapterError::NoAdapters);
        }
        Ok(config)
    }

    pub fn build_registry(&self) -> Result<AdapterRegistry, AdapterError> {
        let mut adapters: HashMap<String, Arc<dyn DataSourceAdapter>> = HashMap::new();
        for (db_type, entry) in &self.adapters {
            let transport = build_transport(entry)?;
            let adapter = build_adapter(&db_type.to_lowercase(), transport)?;
            adapters.insert(db_type.to_lowercase(), adapter);
        }
        Ok(AdapterRegistry::new(adapters))
    }
}

fn build_transport(entry: &AdapterEntry) -> Result<Arc<dyn Transport>, AdapterError> {
    match entry.transport.to_lowercase().as_str() {
        "http" => {
            if entry.endpoint.is_empty() {
                return Err(AdapterError::Config("http endpoint required".into()));
            }
            Ok(Arc::new(HttpTransport::new(entry.endpoint.clone())?))
        }
        "stdio" => {
            if entry.command.is_empty() {
                return Err(AdapterError::Config("stdio command required".into()));
            }
            Ok(Arc::new(StdioTransport::new(
                entry.command.clone(),
                entry.args.clone(),
            )))
        }
        other => Err(AdapterError::Config(format!(
            "unsupported transport type {other:?}"
        ))),
    }
}

pub fn build_adapter(
    db_type: &str,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn DataSourceAdapter>, AdapterError> {
    match db_type {
        "mysql" => Ok(Arc::new(RpcAdapter::mysql(transport))),
        "postgres" | "postgresql" => Ok(Arc::new(RpcAdapter::postgres(transport))),
        "mssql" | "sqlserver" => Ok(Arc::new(RpcAdapter::mssql(transport))),
        other => Err(AdapterError::Config(format!(
            "unsupported adapter type {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_yaml_and_builds_registry() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "adapters:\n  postgres:\n    type: http\n    endpoint: http://localhost:9301/rpc\n  MySQL:\n    type: stdio\n    command: db-rpc\n    args: [\"--mysql\"]"
        )
        .unwrap();

        let config = AdapterFileConfig::load(file.path().to_str().unwrap()).unwrap();
        let registry = config.build_registry().unwrap();
        assert!(registry.adapter_for("postgres").is_ok());
        assert!(registry.adapter_for("mysql").is_ok());
        assert_eq!(registry.types(), vec!["mysql", "postgres"]);
    }

    #[test]
    fn empty_adapter_map_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "adapters: {{}}").unwrap();
        let err = AdapterFileConfig::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, AdapterError::NoAdapters));
    }

    #[test]
    fn http_without_endpoint_is_rejected() {
        let entry = AdapterEntry {
            transport: "http".into(),
            endpoint: String::new(),
            command: String::new(),
            args: Vec::new(),
        };
        assert!(build_transport(&entry).is_err());
    }
}
