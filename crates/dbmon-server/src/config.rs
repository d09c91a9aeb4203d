//! Environment-driven configuration.
//!
//! `DATABASE_URL` and `NATS_URL` are required; everything else has a
//! default. Adapters come from a YAML file (`MCP_CONFIG_PATH`) or, absent
//! that, from per-dialect `MCP_<TYPE>_HTTP` endpoint variables. An empty
//! adapter registry is fatal at startup.

use anyhow::{bail, Context, Result};
use dbmon_adapter::config::build_adapter;
use dbmon_adapter::{AdapterError, AdapterFileConfig, AdapterRegistry, DataSourceAdapter, HttpTransport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub nats_url: String,
    pub worker_count: usize,
    pub job_timeout: Duration,
    pub admin_port: u16,
    pub mcp_config_path: Option<String>,
    pub allowlist_tables: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let nats_url = std::env::var("NATS_URL").context("NATS_URL is required")?;
        Ok(Self {
            database_url,
            nats_url,
            worker_count: env_usize("WORKER_COUNT", default_worker_count()),
            job_timeout: Duration::from_secs(env_u64(
                "JOB_TIMEOUT_SECONDS",
                default_job_timeout_seconds(),
            )),
            admin_port: env_u16("ADMIN_PORT", default_admin_port()),
            mcp_config_path: std::env::var("MCP_CONFIG_PATH").ok().filter(|p| !p.is_empty()),
            allowlist_tables: split_csv(&std::env::var("ALLOWLIST_TABLES").unwrap_or_default()),
        })
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_job_timeout_seconds() -> u64 {
    10
}

fn default_admin_port() -> u16 {
    8091
}

fn env_usize(key: &str, fallback: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn env_u64(key: &str, fallback: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn env_u16(key: &str, fallback: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build the adapter registry from the config file when present,
/// otherwise from `MCP_<TYPE>_HTTP` endpoint variables.
pub fn build_adapter_registry(config: &ServerConfig) -> Result<AdapterRegistry> {
    if let Some(path) = &config.mcp_config_path {
        let file = AdapterFileConfig::load(path)
            .with_context(|| format!("loading adapter config from {path}"))?;
        return Ok(file.build_registry()?);
    }
    let mut adapters: HashMap<String, Arc<dyn DataSourceAdapter>> = HashMap::new();
    for db_type in ["postgres", "mysql", "mssql"] {
        let key = format!("MCP_{}_HTTP", db_type.to_uppercase());
        let Ok(endpoint) = std::env::var(&key) else {
            continue;
        };
        if endpoint.is_empty() {
            continue;
        }
        let transport = Arc::new(HttpTransport::new(endpoint)?);
        adapters.insert(db_type.to_string(), build_adapter(db_type, transport)?);
    }
    if adapters.is_empty() {
        bail!(AdapterError::NoAdapters);
    }
    Ok(AdapterRegistry::new(adapters))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_splitting_trims_and_drops_empties() {
        assert_eq!(
            split_csv(" telemetry , sensors ,,"),
            vec!["telemetry".to_string(), "sensors".to_string()]
        );
        assert!(split_csv("").is_empty());
    }
}
