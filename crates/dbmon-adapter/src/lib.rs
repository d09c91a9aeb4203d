//! Uniform RPC abstraction over per-dialect data-source servers.
//!
//! The core never opens database connections itself: every outward query
//! goes through a [`DataSourceAdapter`], which speaks JSON-RPC 2.0 to an
//! external server over HTTP or stdio. Adapters are registered per
//! lowercased database type; substituting the in-memory [`mock`] adapter
//! makes the whole detector pipeline deterministic in tests.

pub mod config;
pub mod error;
pub mod mock;
pub mod registry;
pub mod rpc;
pub mod transport;

use async_trait::async_trait;
use dbmon_common::WhereSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use config::AdapterFileConfig;
pub use error::AdapterError;
pub use registry::AdapterRegistry;
pub use rpc::RpcAdapter;
pub use transport::{HttpTransport, StdioTransport, Transport};

/// What a given adapter can do; the validator rejects rules the adapter
/// cannot satisfy.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub read_only: bool,
    pub supports_aggregate: bool,
    pub supports_introspection: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestValueRequest {
    pub connection_ref: String,
    pub table: String,
    pub value_column: String,
    pub timestamp_column: String,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<WhereSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRequest {
    pub connection_ref: String,
    pub table: String,
    pub value_column: String,
    pub timestamp_column: String,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<WhereSpec>,
    pub agg: String,
    pub window_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRecentRowsRequest {
    pub connection_ref: String,
    pub table: String,
    pub columns: Vec<String>,
    pub timestamp_column: String,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<WhereSpec>,
    /// RFC3339 lower bound.
    pub since: String,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatestValueResult {
    pub value: Value,
    #[serde(default)]
    pub ts: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateResult {
    pub value: Value,
    #[serde(default, rename = "ts_start")]
    pub ts_start: String,
    #[serde(default, rename = "ts_end")]
    pub ts_end: String,
}

pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchRecentRowsResult {
    #[serde(default)]
    pub rows: Vec<Row>,
}

pub const SUPPORTED_AGGREGATES: [&str; 5] = ["avg", "min", "max", "sum", "count"];

/// The five-operation protocol every dialect adapter implements. Rows come
/// back descending by timestamp; callers bound each operation with their
/// own deadline.
#[async_trait]
pub trait DataSourceAdapter: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    async fn list_tables(&self, connection_ref: &str) -> Result<Vec<String>, AdapterError>;

    async fn list_columns(
        &self,
        connection_ref: &str,
        table: &str,
    ) -> Result<Vec<Column>, AdapterError>;

    async fn query_latest_value(
        &self,
        request: LatestValueRequest,
    ) -> Result<LatestValueResult, AdapterError>;

    async fn query_aggregate(
        &self,
        request: AggregateRequest,
    ) -> Result<AggregateResult, AdapterError>;

    async fn fetch_recent_rows(
        &self,
        request: FetchRecentRowsRequest,
    ) -> Result<FetchRecentRowsResult, AdapterError>;
}
