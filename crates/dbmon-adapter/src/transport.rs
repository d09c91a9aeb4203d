//! JSON-RPC 2.0 transports.
//!
//! A transport moves one request envelope to the data-source server and
//! returns the raw `result` value. Dialect adapters sit on top and never
//! know which transport carries them.

use crate::error::AdapterError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: REQUEST_ID.fetch_add(1, Ordering::SeqCst),
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    fn into_result(self) -> Result<Value, AdapterError> {
        if let Some(err) = self.error {
            return Err(AdapterError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        self.result.ok_or(AdapterError::EmptyResponse)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value, AdapterError>;
}

/// JSON-RPC over a single HTTP endpoint.
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, AdapterError> {
        Self::with_timeout(endpoint, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        let request = JsonRpcRequest::new(method, params);
        let response: JsonRpcResponse = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;
        response.into_result()
    }
}

/// JSON-RPC over a one-shot child process: the envelope goes to stdin, the
/// response comes back on stdout.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        let request = JsonRpcRequest::new(method, params);
        let payload = serde_json::to_vec(&request)?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            stdin.write_all(b"\n").await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                AdapterError::Process(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "adapter process timed out",
                ))
            })??;

        let response: JsonRpcResponse = serde_json::from_slice(&output.stdout)?;
        response.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_to_jsonrpc_envelope() {
        let request = JsonRpcRequest::new("db.list_tables", json!({"connectionRef": "c1"}));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "db.list_tables");
        assert_eq!(value["params"]["connectionRef"], "c1");
        assert!(value["id"].is_u64());
    }

    #[test]
    fn request_ids_increment() {
        let a = JsonRpcRequest::new("a", Value::Null);
        let b = JsonRpcRequest::new("b", Value::Null);
        assert!(b.id > a.id);
    }

    #[test]
    fn response_error_message_is_verbatim() {
        let response: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"unsafe identifier: tbl;"}}"#,
        )
        .unwrap();
        let err = response.into_result().unwrap_err();
        assert_eq!(err.to_string(), "unsafe identifier: tbl;");
    }

    #[test]
    fn response_result_unwraps() {
        let response: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"tables":["t"]}}"#).unwrap();
        let value = response.into_result().unwrap();
        assert_eq!(value["tables"][0], "t");
    }
}
