//! The dialect adapter: one struct per configured database type, all
//! sharing the same five-method JSON-RPC vocabulary.

use crate::error::AdapterError;
use crate::transport::Transport;
use crate::{
    AggregateRequest, AggregateResult, Capabilities, Column, DataSourceAdapter,
    FetchRecentRowsRequest, FetchRecentRowsResult, LatestValueRequest, LatestValueResult,
    SUPPORTED_AGGREGATES,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// A remote data-source server bound to one database dialect. The dialect
/// only affects the registry key and capabilities; the wire protocol is
/// identical across mysql, postgres, and mssql.
pub struct RpcAdapter {
    dialect: &'static str,
    transport: Arc<dyn Transport>,
    capabilities: Capabilities,
}

impl RpcAdapter {
    pub fn mysql(transport: Arc<dyn Transport>) -> Self {
        Self::read_only("mysql", transport)
    }

    pub fn postgres(transport: Arc<dyn Transport>) -> Self {
        Self::read_only("postgres", transport)
    }

    pub fn mssql(transport: Arc<dyn Transport>) -> Self {
        Self::read_only("mssql", transport)
    }

    fn read_only(dialect: &'static str, transport: Arc<dyn Transport>) -> Self {
        Self {
            dialect,
            transport,
            capabilities: Capabilities {
                read_only: true,
                supports_aggregate: true,
                supports_introspection: true,
            },
        }
    }

    pub fn dialect(&self) -> &str {
        self.dialect
    }
}

#[derive(Deserialize)]
struct TablesResult {
    #[serde(default)]
    tables: Vec<String>,
}

#[derive(Deserialize)]
struct ColumnsResult {
    #[serde(default)]
    columns: Vec<Column>,
}

#[async_trait]
impl DataSourceAdapter for RpcAdapter {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn list_tables(&self, connection_ref: &str) -> Result<Vec<String>, AdapterError> {
        let result = self
            .transport
            .call("db.list_tables", json!({ "connectionRef": connection_ref }))
            .await?;
        let parsed: TablesResult = serde_json::from_value(result)?;
        Ok(parsed.tables)
    }

    async fn list_columns(
        &self,
        connection_ref: &str,
        table: &str,
    ) -> Result<Vec<Column>, AdapterError> {
        let result = self
            .transport
            .call(
                "db.list_columns",
                json!({ "connectionRef": connection_ref, "table": table }),
            )
            .await?;
        let parsed: ColumnsResult = serde_json::from_value(result)?;
        Ok(parsed.columns)
    }

    async fn query_latest_value(
        &self,
        request: LatestValueRequest,
    ) -> Result<LatestValueResult, AdapterError> {
        let result = self
            .transport
            .call("db.query_latest_value", serde_json::to_value(&request)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn query_aggregate(
        &self,
        request: AggregateRequest,
    ) -> Result<AggregateResult, AdapterError> {
        if !SUPPORTED_AGGREGATES.contains(&request.agg.as_str()) {
            return Err(AdapterError::UnsupportedAgg(request.agg));
        }
        let result = self
            .transport
            .call("db.query_aggregate", serde_json::to_value(&request)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn fetch_recent_rows(
        &self,
        request: FetchRecentRowsRequest,
    ) -> Result<FetchRecentRowsResult, AdapterError> {
        let result = self
            .transport
            .call("db.fetch_recent_rows", serde_json::to_value(&request)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}
