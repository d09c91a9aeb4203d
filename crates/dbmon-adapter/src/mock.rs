//! In-memory adapter for tests and local development.
//!
//! Canned schema and rows go in through the builder methods; the adapter
//! records every call so tests can assert on the probe traffic.

use crate::error::AdapterError;
use crate::{
    AggregateRequest, AggregateResult, Capabilities, Column, DataSourceAdapter,
    FetchRecentRowsRequest, FetchRecentRowsResult, LatestValueRequest, LatestValueResult, Row,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

pub struct MockAdapter {
    tables: Vec<String>,
    columns: HashMap<String, Vec<Column>>,
    latest: Option<LatestValueResult>,
    aggregate: Option<AggregateResult>,
    rows: Vec<Row>,
    fail_with: Option<String>,
    capabilities: Capabilities,
    calls: Mutex<Vec<String>>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            columns: HashMap::new(),
            latest: None,
            aggregate: None,
            rows: Vec::new(),
            fail_with: None,
            capabilities: Capabilities {
                read_only: true,
                supports_aggregate: true,
                supports_introspection: true,
            },
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockAdapter {
    pub fn with_table(mut self, table: &str, columns: Vec<Column>) -> Self {
        self.tables.push(table.to_string());
        self.columns.insert(table.to_string(), columns);
        self
    }

    pub fn with_latest(mut self, value: serde_json::Value, ts: &str) -> Self {
        self.latest = Some(LatestValueResult {
            value,
            ts: ts.to_string(),
        });
        self
    }

    pub fn with_aggregate(mut self, value: serde_json::Value) -> Self {
        self.aggregate = Some(AggregateResult {
            value,
            ts_start: String::new(),
            ts_end: String::new(),
        });
        self
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    /// Every subsequent call fails with this message as an RPC error.
    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock call log").clone()
    }

    fn record(&self, method: &str) -> Result<(), AdapterError> {
        self.calls.lock().expect("mock call log").push(method.to_string());
        if let Some(message) = &self.fail_with {
            return Err(AdapterError::Rpc {
                code: -32000,
                message: message.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DataSourceAdapter for MockAdapter {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn list_tables(&self, _connection_ref: &str) -> Result<Vec<String>, AdapterError> {
        self.record("db.list_tables")?;
        Ok(self.tables.clone())
    }

    async fn list_columns(
        &self,
        _connection_ref: &str,
        table: &str,
    ) -> Result<Vec<Column>, AdapterError> {
        self.record("db.list_columns")?;
        Ok(self.columns.get(table).cloned().unwrap_or_default())
    }

    async fn query_latest_value(
        &self,
        _request: LatestValueRequest,
    ) -> Result<LatestValueResult, AdapterError> {
        self.record("db.query_latest_value")?;
        self.latest.clone().ok_or(AdapterError::Rpc {
            code: -32000,
            message: "no rows".into(),
        })
    }

    async fn query_aggregate(
        &self,
        request: AggregateRequest,
    ) -> Result<AggregateResult, AdapterError> {
        self.record("db.query_aggregate")?;
        if !crate::SUPPORTED_AGGREGATES.contains(&request.agg.as_str()) {
            return Err(AdapterError::UnsupportedAgg(request.agg));
        }
        self.aggregate.clone().ok_or(AdapterError::Rpc {
            code: -32000,
            message: "no rows".into(),
        })
    }

    async fn fetch_recent_rows(
        &self,
        request: FetchRecentRowsRequest,
    ) -> Result<FetchRecentRowsResult, AdapterError> {
        self.record("db.fetch_recent_rows")?;
        let mut rows = self.rows.clone();
        rows.truncate(request.limit);
        Ok(FetchRecentRowsResult { rows })
    }
}
