//! End-to-end admin API flow against an in-memory store and a mock
//! adapter: a rule gets reconciled into a job, shows up on /jobs, and
//! disappears when disabled.

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use dbmon_adapter::mock::MockAdapter;
use dbmon_adapter::{AdapterRegistry, Column, DataSourceAdapter};
use dbmon_common::{Allowlist, Limits, RuleStatus};
use dbmon_scheduler::Registry;
use dbmon_server::api::build_admin_app;
use dbmon_server::reconcile::process_rule;
use dbmon_server::state::AppState;
use dbmon_storage::{AlertRecord, RuleRow, RuleStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::util::ServiceExt;
use uuid::Uuid;

#[derive(Default)]
struct MemStore {
    rules: Mutex<HashMap<Uuid, RuleRow>>,
    statuses: Mutex<Vec<(Uuid, String)>>,
    alerts: Mutex<Vec<AlertRecord>>,
}

impl MemStore {
    fn put_rule(&self, rule: RuleRow) {
        self.rules.lock().unwrap().insert(rule.id, rule);
    }

    fn set_enabled(&self, id: Uuid, enabled: bool) {
        if let Some(rule) = self.rules.lock().unwrap().get_mut(&id) {
            rule.enabled = enabled;
        }
    }

    fn last_status(&self, id: Uuid) -> Option<String> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(rule_id, _)| *rule_id == id)
            .map(|(_, status)| status.clone())
    }
}

#[async_trait]
impl RuleStore for MemStore {
    async fn list_enabled_rules(&self) -> Result<Vec<RuleRow>> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<RuleRow>> {
        Ok(self.rules.lock().unwrap().get(&id).cloned())
    }

    async fn get_connection_type(&self, _id: Uuid) -> Result<Option<String>> {
        Ok(Some("postgres".into()))
    }

    async fn update_rule_status(
        &self,
        id: Uuid,
        status: RuleStatus,
        _last_error: Option<Value>,
    ) -> Result<()> {
        self.statuses.lock().unwrap().push((id, status.to_string()));
        Ok(())
    }

    async fn create_alert(&self, alert: AlertRecord) -> Result<()> {
        self.alerts.lock().unwrap().push(alert);
        Ok(())
    }

    async fn get_last_alert_for_key(
        &self,
        _rule_id: Uuid,
        _parameter_name: &str,
        _detector_type: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }
}

fn rule_json() -> Value {
    json!({
        "connectionRef": "conn-1",
        "source": {"table": "telemetry", "timestampColumn": "ts"},
        "parameters": [{
            "parameterName": "temperature",
            "valueColumn": "temperature",
            "detector": {"type": "threshold", "threshold": {"op": ">", "value": 80}}
        }],
        "pollIntervalSeconds": 10,
        "enabled": true
    })
}

fn build_state(store: Arc<MemStore>) -> AppState {
    let adapter: Arc<dyn DataSourceAdapter> = Arc::new(
        MockAdapter::default()
            .with_table(
                "telemetry",
                vec![
                    Column {
                        name: "temperature".into(),
                        column_type: "double precision".into(),
                    },
                    Column {
                        name: "ts".into(),
                        column_type: "timestamptz".into(),
                    },
                ],
            )
            .with_latest(json!(90), "2024-01-01T00:00:00Z"),
    );
    let mut adapters: HashMap<String, Arc<dyn DataSourceAdapter>> = HashMap::new();
    adapters.insert("postgres".into(), adapter);

    let store: Arc<dyn RuleStore> = store;
    let registry = Registry::new(
        store.clone(),
        Limits::default(),
        2,
        Duration::from_secs(10),
    );
    AppState {
        store,
        registry,
        adapters: Arc::new(AdapterRegistry::new(adapters)),
        allowlist: Arc::new(Allowlist::default()),
        limits: Limits::default(),
    }
}

async fn get_json(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn healthz_reports_ok() {
    let state = build_state(Arc::new(MemStore::default()));
    let app = build_admin_app(state);
    let (status, body) = get_json(&app, "GET", "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn rule_lifecycle_schedules_and_unschedules() {
    let store = Arc::new(MemStore::default());
    let rule_id = Uuid::new_v4();
    store.put_rule(RuleRow {
        id: rule_id,
        connection_ref: Uuid::new_v4(),
        rule_json: rule_json(),
        enabled: true,
        status: "DRAFT".into(),
        last_error: None,
        last_validated_at: None,
    });

    let state = build_state(store.clone());
    let app = build_admin_app(state.clone());

    // rule.created; processing twice is idempotent and never duplicates
    // the job.
    process_rule(&state, rule_id).await.unwrap();
    process_rule(&state, rule_id).await.unwrap();
    assert_eq!(store.last_status(rule_id).as_deref(), Some("ACTIVE"));

    let (status, body) = get_json(&app, "GET", "/jobs").await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["ruleId"], rule_id.to_string());
    assert_eq!(jobs[0]["pollIntervalSeconds"], 10);

    // rule.disabled
    store.set_enabled(rule_id, false);
    process_rule(&state, rule_id).await.unwrap();
    let (_, body) = get_json(&app, "GET", "/jobs").await;
    assert_eq!(body.as_array().unwrap().len(), 0);

    state.registry.stop();
}

#[tokio::test]
async fn invalid_rule_json_marks_rule_invalid() {
    let store = Arc::new(MemStore::default());
    let rule_id = Uuid::new_v4();
    store.put_rule(RuleRow {
        id: rule_id,
        connection_ref: Uuid::new_v4(),
        rule_json: json!({"parameters": "not-a-list"}),
        enabled: true,
        status: "DRAFT".into(),
        last_error: None,
        last_validated_at: None,
    });
    let state = build_state(store.clone());

    assert!(process_rule(&state, rule_id).await.is_err());
    assert_eq!(store.last_status(rule_id).as_deref(), Some("INVALID"));
    assert!(state.registry.list_jobs().is_empty());
    state.registry.stop();
}

#[tokio::test]
async fn reload_endpoint_reconciles_enabled_rules() {
    let store = Arc::new(MemStore::default());
    let rule_id = Uuid::new_v4();
    store.put_rule(RuleRow {
        id: rule_id,
        connection_ref: Uuid::new_v4(),
        rule_json: rule_json(),
        enabled: true,
        status: "DRAFT".into(),
        last_error: None,
        last_validated_at: None,
    });
    let state = build_state(store.clone());
    let app = build_admin_app(state.clone());

    let (status, body) = get_json(&app, "POST", "/jobs/reload").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(store.last_status(rule_id).as_deref(), Some("ACTIVE"));
    assert_eq!(state.registry.list_jobs().len(), 1);
    state.registry.stop();
}

#[tokio::test]
async fn preview_rejects_unknown_connection_ref() {
    let state = build_state(Arc::new(MemStore::default()));
    let app = build_admin_app(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/rules/preview")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "connectionRef": "not-a-uuid",
                        "table": "telemetry",
                        "timestampColumn": "ts",
                        "valueColumn": "temperature",
                        "ruleType": "TPA",
                        "config": {"windowN": 5, "slopeThreshold": 0.5}
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["ok"], false);
    state.registry.stop();
}
