use crate::evaluator::{evaluate_parameter, execute_run};
use crate::preview::{baseline_check, preview, BaselineCheckRequest, PreviewRequest, SelectorSpec};
use crate::registry::{JobRun, Registry};
use crate::validate::runtime_validate_rule;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use dbmon_adapter::mock::MockAdapter;
use dbmon_adapter::{Capabilities, Column, DataSourceAdapter, Row};
use dbmon_common::{
    Allowlist, Detector, DetectorStatus, Limits, MissingDataSpec, ParameterSpec, RobustZSpec,
    RuleSpec, RuleStatus, SourceSpec, ThresholdSpec,
};
use dbmon_storage::{AlertRecord, RuleRow, RuleStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct MemStore {
    rules: Mutex<HashMap<Uuid, RuleRow>>,
    alerts: Mutex<Vec<AlertRecord>>,
    statuses: Mutex<Vec<(Uuid, String)>>,
}

impl MemStore {
    fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.lock().unwrap().clone()
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
        rule_id: Uuid,
        parameter_name: &str,
        detector_type: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| {
                a.rule_id == rule_id
                    && a.parameter_name == parameter_name
                    && a.detector_type == detector_type
            })
            .map(|a| a.ts_utc)
            .max())
    }
}

fn telemetry_columns() -> Vec<Column> {
    vec![
        Column {
            name: "temperature".into(),
            column_type: "double precision".into(),
        },
        Column {
            name: "ts".into(),
            column_type: "timestamptz".into(),
        },
        Column {
            name: "line".into(),
            column_type: "text".into(),
        },
    ]
}

fn threshold_spec() -> RuleSpec {
    RuleSpec {
        connection_ref: "conn-1".into(),
        source: SourceSpec {
            table: "telemetry".into(),
            timestamp_column: "ts".into(),
            ..Default::default()
        },
        parameters: vec![ParameterSpec {
            parameter_name: "temperature".into(),
            value_column: "temperature".into(),
            detector: Detector::Threshold {
                threshold: ThresholdSpec {
                    op: ">".into(),
                    value: Some(json!(80)),
                    ..Default::default()
                },
            },
        }],
        poll_interval_seconds: 10,
        enabled: true,
        ..Default::default()
    }
}

fn sample_rows(values: &[f64], step_secs: i64) -> Vec<Row> {
    // Newest first, the order the adapter contract promises.
    let base = Utc::now();
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let ts = base - Duration::seconds(i as i64 * step_secs);
            let mut row = Row::new();
            row.insert("temperature".into(), json!(v));
            row.insert(
                "ts".into(),
                json!(ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
            row
        })
        .collect()
}

#[tokio::test]
async fn threshold_rule_produces_alert_record() {
    let adapter = MockAdapter::default()
        .with_table("telemetry", telemetry_columns())
        .with_latest(json!(90), "2024-01-01T00:00:00Z");
    let store = MemStore::default();
    let rule_id = Uuid::new_v4();

    let run = JobRun {
        rule_id,
        spec: threshold_spec(),
        adapter: Arc::new(adapter),
    };
    execute_run(&store, &Limits::default(), &run).await;

    let alerts = store.alerts();
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.rule_id, rule_id);
    assert_eq!(alert.observed_value, "90");
    assert_eq!(alert.limit_expression, "> 80");
    assert_eq!(alert.severity, "high");
    assert_eq!(alert.detector_type, "threshold");
    assert!(alert.hit);
    let metadata = alert.metadata.as_ref().unwrap();
    assert_eq!(metadata["table"], "telemetry");
    assert_eq!(metadata["explain"], "> 80");
}

#[tokio::test]
async fn below_threshold_produces_no_alert() {
    let adapter = MockAdapter::default()
        .with_table("telemetry", telemetry_columns())
        .with_latest(json!(70), "2024-01-01T00:00:00Z");
    let store = MemStore::default();

    let run = JobRun {
        rule_id: Uuid::new_v4(),
        spec: threshold_spec(),
        adapter: Arc::new(adapter),
    };
    execute_run(&store, &Limits::default(), &run).await;
    assert!(store.alerts().is_empty());
}

#[tokio::test]
async fn cooldown_suppresses_repeat_alert() {
    let adapter: Arc<dyn DataSourceAdapter> = Arc::new(
        MockAdapter::default()
            .with_table("telemetry", telemetry_columns())
            .with_latest(json!(90), "2024-01-01T00:00:00Z"),
    );
    let store = MemStore::default();
    let mut spec = threshold_spec();
    spec.cooldown_seconds = Some(600);
    let rule_id = Uuid::new_v4();

    let run = JobRun {
        rule_id,
        spec: spec.clone(),
        adapter: adapter.clone(),
    };
    execute_run(&store, &Limits::default(), &run).await;
    let run = JobRun {
        rule_id,
        spec,
        adapter,
    };
    execute_run(&store, &Limits::default(), &run).await;

    assert_eq!(store.alerts().len(), 1);
}

#[tokio::test]
async fn evaluation_error_is_skipped_silently() {
    let adapter = MockAdapter::default().failing("connection refused");
    let store = MemStore::default();
    let run = JobRun {
        rule_id: Uuid::new_v4(),
        spec: threshold_spec(),
        adapter: Arc::new(adapter),
    };
    execute_run(&store, &Limits::default(), &run).await;
    assert!(store.alerts().is_empty());
}

#[tokio::test]
async fn missing_data_fires_when_source_never_reported() {
    let adapter = MockAdapter::default().with_table("telemetry", telemetry_columns());
    let mut spec = threshold_spec();
    spec.parameters[0].detector = Detector::MissingData {
        missing_data: MissingDataSpec {
            max_gap_seconds: 60,
        },
    };
    let result = evaluate_parameter(
        &adapter,
        &spec,
        &spec.parameters[0],
        &Limits::default(),
    )
    .await
    .unwrap();
    assert!(result.hit);
    assert_eq!(result.status, DetectorStatus::Violation);
}

#[tokio::test]
async fn missing_data_quiet_when_fresh() {
    let now = Utc::now();
    let adapter = MockAdapter::default()
        .with_table("telemetry", telemetry_columns())
        .with_latest(
            json!(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
            &now.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    let mut spec = threshold_spec();
    spec.parameters[0].detector = Detector::MissingData {
        missing_data: MissingDataSpec {
            max_gap_seconds: 3600,
        },
    };
    let result = evaluate_parameter(
        &adapter,
        &spec,
        &spec.parameters[0],
        &Limits::default(),
    )
    .await
    .unwrap();
    assert!(!result.hit);
}

#[tokio::test]
async fn robust_zscore_insufficient_below_min_samples() {
    let adapter = MockAdapter::default()
        .with_table("telemetry", telemetry_columns())
        .with_rows(sample_rows(&[10.0, 10.0, 10.0], 60));
    let mut spec = threshold_spec();
    spec.parameters[0].detector = Detector::RobustZscore {
        robust_z: RobustZSpec {
            baseline_window_seconds: 3600,
            eval_window_seconds: 300,
            z_warn: 3.0,
            z_crit: 5.0,
            min_samples: 20,
        },
    };
    let result = evaluate_parameter(
        &adapter,
        &spec,
        &spec.parameters[0],
        &Limits::default(),
    )
    .await
    .unwrap();
    assert_eq!(result.status, DetectorStatus::InsufficientData);
    assert!(!result.hit);
}

#[tokio::test]
async fn runtime_validation_accepts_live_schema() {
    let adapter = MockAdapter::default()
        .with_table("telemetry", telemetry_columns())
        .with_latest(json!(50), "2024-01-01T00:00:00Z");
    let result = runtime_validate_rule(
        &adapter,
        &threshold_spec(),
        &Allowlist::default(),
        &Limits::default(),
    )
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn runtime_validation_rejects_unknown_table() {
    let adapter = MockAdapter::default()
        .with_table("events", telemetry_columns())
        .with_latest(json!(50), "2024-01-01T00:00:00Z");
    let err = runtime_validate_rule(
        &adapter,
        &threshold_spec(),
        &Allowlist::default(),
        &Limits::default(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.to_string(), "table not found");
}

#[tokio::test]
async fn runtime_validation_rejects_missing_value_column() {
    let adapter = MockAdapter::default()
        .with_table(
            "telemetry",
            vec![Column {
                name: "ts".into(),
                column_type: "timestamptz".into(),
            }],
        )
        .with_latest(json!(50), "2024-01-01T00:00:00Z");
    let err = runtime_validate_rule(
        &adapter,
        &threshold_spec(),
        &Allowlist::default(),
        &Limits::default(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.to_string(), "value column not found");
}

#[tokio::test]
async fn runtime_validation_rejects_non_numeric_statistical_column() {
    let adapter = MockAdapter::default()
        .with_table(
            "telemetry",
            vec![
                Column {
                    name: "temperature".into(),
                    column_type: "text".into(),
                },
                Column {
                    name: "ts".into(),
                    column_type: "timestamptz".into(),
                },
            ],
        )
        .with_rows(sample_rows(&[1.0], 60));
    let mut spec = threshold_spec();
    spec.parameters[0].detector = Detector::RobustZscore {
        robust_z: RobustZSpec {
            baseline_window_seconds: 3600,
            eval_window_seconds: 300,
            z_warn: 3.0,
            z_crit: 5.0,
            min_samples: 20,
        },
    };
    let err = runtime_validate_rule(&adapter, &spec, &Allowlist::default(), &Limits::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("non-numeric column"));
}

#[tokio::test]
async fn runtime_validation_enforces_allowlist() {
    let adapter = MockAdapter::default()
        .with_table("telemetry", telemetry_columns())
        .with_latest(json!(50), "2024-01-01T00:00:00Z");
    let allowlist = Allowlist {
        tables: vec!["other_table".into()],
    };
    let err = runtime_validate_rule(&adapter, &threshold_spec(), &allowlist, &Limits::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "table not allowlisted");
}

#[tokio::test]
async fn runtime_validation_requires_introspection_capability() {
    let adapter = MockAdapter::default()
        .with_table("telemetry", telemetry_columns())
        .with_capabilities(Capabilities {
            read_only: true,
            supports_aggregate: true,
            supports_introspection: false,
        });
    let err = runtime_validate_rule(
        &adapter,
        &threshold_spec(),
        &Allowlist::default(),
        &Limits::default(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("introspection"));
}

#[tokio::test]
async fn registry_holds_one_job_per_rule() {
    let store: Arc<dyn RuleStore> = Arc::new(MemStore::default());
    let registry = Registry::new(
        store,
        Limits::default(),
        2,
        std::time::Duration::from_secs(10),
    );
    let rule_id = Uuid::new_v4();
    let adapter: Arc<dyn DataSourceAdapter> = Arc::new(MockAdapter::default());

    registry.schedule(rule_id, threshold_spec(), adapter.clone());
    assert_eq!(registry.list_jobs().len(), 1);

    // Rescheduling replaces, never duplicates.
    let mut faster = threshold_spec();
    faster.poll_interval_seconds = 5;
    registry.schedule(rule_id, faster, adapter.clone());
    let jobs = registry.list_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].poll_interval_seconds, 5);

    registry.unschedule(rule_id);
    assert!(registry.list_jobs().is_empty());
    assert!(!registry.contains(rule_id));

    registry.stop();
}

#[tokio::test(start_paused = true)]
async fn ticker_enqueues_and_worker_persists() {
    let store = Arc::new(MemStore::default());
    let registry = Registry::new(
        store.clone() as Arc<dyn RuleStore>,
        Limits::default(),
        1,
        std::time::Duration::from_secs(10),
    );
    let adapter: Arc<dyn DataSourceAdapter> = Arc::new(
        MockAdapter::default()
            .with_table("telemetry", telemetry_columns())
            .with_latest(json!(95), "2024-01-01T00:00:00Z"),
    );
    let rule_id = Uuid::new_v4();
    registry.schedule(rule_id, threshold_spec(), adapter);

    // First tick lands one poll interval after scheduling.
    tokio::time::sleep(std::time::Duration::from_secs(11)).await;
    for _ in 0..100 {
        if !store.alerts().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(!store.alerts().is_empty());
    registry.stop();
}

#[tokio::test]
async fn baseline_check_reports_insufficiency() {
    let adapter = MockAdapter::default()
        .with_table("telemetry", telemetry_columns())
        .with_rows(sample_rows(&[10.0, 11.0, 12.0], 60));
    let request = BaselineCheckRequest {
        connection_ref: "conn-1".into(),
        table: "telemetry".into(),
        timestamp_column: "ts".into(),
        value_column: "temperature".into(),
        rule_type: "SHEWHART_3SIGMA".into(),
        baseline_selector: SelectorSpec {
            kind: "lastN".into(),
            value: 50,
            ..Default::default()
        },
        subgrouping: None,
    };
    let response = baseline_check(
        &adapter,
        &Allowlist::default(),
        &Limits::default(),
        &request,
    )
    .await
    .unwrap();
    assert_eq!(response.status, "INSUFFICIENT_DATA");
    assert_eq!(response.available["samples"], 3);
    assert_eq!(response.required["minBaselineSamples"], 20);
}

#[tokio::test]
async fn preview_reports_spec_limit_violation() {
    let adapter = MockAdapter::default()
        .with_table("telemetry", telemetry_columns())
        .with_rows(sample_rows(&[105.0, 90.0, 80.0], 60));
    let request = PreviewRequest {
        connection_ref: "conn-1".into(),
        table: "telemetry".into(),
        timestamp_column: "ts".into(),
        value_column: "temperature".into(),
        rule_type: "SPEC_LIMIT_VIOLATION".into(),
        config: json!({"mode": "spec", "specLimits": {"usl": 100.0}}),
        baseline_selector: None,
        eval_selector: None,
        subgrouping: None,
    };
    let response = preview(
        &adapter,
        &Allowlist::default(),
        &Limits::default(),
        &request,
    )
    .await
    .unwrap();
    assert_eq!(response.status, "VIOLATION");
    assert_eq!(response.violations.len(), 1);
    assert_eq!(response.violations[0]["limitName"], "USL");
    assert_eq!(response.violations[0]["kind"], "point");
}

#[tokio::test]
async fn preview_rejects_unknown_table_as_invalid_config() {
    let adapter = MockAdapter::default().with_table("events", telemetry_columns());
    let request = PreviewRequest {
        connection_ref: "conn-1".into(),
        table: "telemetry".into(),
        timestamp_column: "ts".into(),
        value_column: "temperature".into(),
        rule_type: "TPA".into(),
        config: json!({"windowN": 5, "slopeThreshold": 0.5}),
        baseline_selector: None,
        eval_selector: None,
        subgrouping: None,
    };
    let response = preview(
        &adapter,
        &Allowlist::default(),
        &Limits::default(),
        &request,
    )
    .await
    .unwrap();
    assert_eq!(response.status, "INVALID_CONFIG");
    assert_eq!(response.explain, "table not found");
}
