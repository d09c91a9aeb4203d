//! Per-parameter evaluation: fetch, detect, cooldown, persist.

use crate::cooldown::within_cooldown;
use crate::registry::JobRun;
use crate::samples::{build_baseline_window, clamp_limit, fetch_samples, with_deadline};
use anyhow::{anyhow, bail, Result};
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use dbmon_adapter::{AggregateRequest, DataSourceAdapter, LatestValueRequest};
use dbmon_common::{Detector, DetectorResult, Limits, ParameterSpec, RuleSpec};
use dbmon_detect::{
    apply_window_and_baseline, evaluate_missing_data, evaluate_range_chart, evaluate_robust_z,
    evaluate_shewhart, evaluate_spec_limit, evaluate_threshold, evaluate_tpa, evaluate_trend,
    group_by_subgroup, group_consecutive, has_consecutive_timestamps, parse_time_value, to_float,
    values_of, Sample,
};
use dbmon_storage::{AlertRecord, RuleStore};
use serde_json::{json, Map, Value};

const DEFAULT_TREND_WINDOW: usize = 6;
const LOOKBACK_DAYS: i64 = 365;

/// Evaluate one parameter of a rule against its adapter.
pub async fn evaluate_parameter(
    adapter: &dyn DataSourceAdapter,
    spec: &RuleSpec,
    param: &ParameterSpec,
    limits: &Limits,
) -> Result<DetectorResult> {
    let deadline = limits.max_query_duration;
    let now = Utc::now();

    match &param.detector {
        Detector::MissingData { missing_data } => {
            // The latest timestamp doubles as the value: query the
            // timestamp column itself.
            let latest = with_deadline(
                deadline,
                adapter.query_latest_value(LatestValueRequest {
                    connection_ref: spec.connection_ref.clone(),
                    table: spec.source.table.clone(),
                    value_column: spec.source.timestamp_column.clone(),
                    timestamp_column: spec.source.timestamp_column.clone(),
                    where_clause: spec.source.where_clause.clone(),
                }),
            )
            .await;
            let latest = match latest {
                Ok(latest) => latest,
                Err(err) if err.to_string().contains("no rows") => {
                    return Ok(evaluate_missing_data(
                        None,
                        missing_data.max_gap_seconds,
                        now,
                    ));
                }
                Err(err) => return Err(err),
            };
            let ts = parse_time_value(&latest.value)
                .or_else(|| parse_time_value(&Value::String(latest.ts.clone())))
                .ok_or_else(|| anyhow!("latest timestamp is not RFC3339"))?;
            Ok(evaluate_missing_data(
                Some(ts),
                missing_data.max_gap_seconds,
                now,
            ))
        }
        Detector::RobustZscore { robust_z } => {
            let since = now - ChronoDuration::seconds(robust_z.baseline_window_seconds);
            let samples = fetch_samples(
                adapter,
                spec,
                param,
                since,
                limits.max_sample_rows,
                None,
                deadline,
            )
            .await?;
            if samples.is_empty() || samples.len() < robust_z.min_samples {
                return Ok(DetectorResult::insufficient_data("not enough samples"));
            }
            let values = values_of(&samples);
            let latest = values[values.len() - 1];
            Ok(evaluate_robust_z(
                &values,
                latest,
                robust_z.z_warn,
                robust_z.z_crit,
            ))
        }
        Detector::SpecLimit { spec_limit } => {
            let latest = with_deadline(
                deadline,
                adapter.query_latest_value(LatestValueRequest {
                    connection_ref: spec.connection_ref.clone(),
                    table: spec.source.table.clone(),
                    value_column: param.value_column.clone(),
                    timestamp_column: spec.source.timestamp_column.clone(),
                    where_clause: spec.source.where_clause.clone(),
                }),
            )
            .await?;
            let value = to_float(&latest.value)
                .ok_or_else(|| anyhow!("latest value is not numeric"))?;
            let ts = parse_time_value(&Value::String(latest.ts.clone())).unwrap_or(now);
            Ok(evaluate_spec_limit(&Sample::new(ts, value), spec_limit))
        }
        Detector::Shewhart { shewhart } => {
            let (since, start, end, limit) =
                build_baseline_window(now, &shewhart.baseline, limits.max_sample_rows)?;
            let samples =
                fetch_samples(adapter, spec, param, since, limit, None, deadline).await?;
            let samples = dbmon_detect::filter_samples_by_range(samples, start, end);
            let sigma = if shewhart.sigma_multiplier == 0.0 {
                3.0
            } else {
                shewhart.sigma_multiplier
            };
            let mut result = evaluate_shewhart(&samples, shewhart, sigma);
            apply_window_and_baseline(&mut result, &samples, start, end, true);
            Ok(result)
        }
        Detector::RangeChart { range_chart } => {
            let (since, start, end, limit) =
                build_baseline_window(now, &range_chart.baseline, limits.max_sample_rows)?;
            let subgroup_column = if range_chart.subgrouping.mode == "column" {
                Some(range_chart.subgrouping.column.as_str())
            } else {
                None
            };
            let samples = fetch_samples(
                adapter,
                spec,
                param,
                since,
                limit,
                subgroup_column,
                deadline,
            )
            .await?;
            let samples = dbmon_detect::filter_samples_by_range(samples, start, end);
            let groups = if subgroup_column.is_some() {
                group_by_subgroup(&samples, range_chart.subgroup_size)
            } else {
                group_consecutive(&samples, range_chart.subgroup_size)
            };
            let mut result = evaluate_range_chart(&groups, range_chart);
            apply_window_and_baseline(&mut result, &samples, start, end, true);
            Ok(result)
        }
        Detector::Trend { trend } => {
            let window = if trend.window_size == 0 {
                DEFAULT_TREND_WINDOW
            } else {
                trend.window_size
            };
            let since = now - ChronoDuration::days(LOOKBACK_DAYS);
            let samples = fetch_samples(
                adapter,
                spec,
                param,
                since,
                clamp_limit(window, limits.max_sample_rows),
                None,
                deadline,
            )
            .await?;
            if trend.require_consecutive_timestamps && !has_consecutive_timestamps(&samples) {
                let mut result = DetectorResult::insufficient_data("non-consecutive timestamps");
                apply_window_and_baseline(&mut result, &samples, None, None, false);
                return Ok(result);
            }
            let mut result = evaluate_trend(&samples, trend);
            apply_window_and_baseline(&mut result, &samples, None, None, false);
            Ok(result)
        }
        Detector::Tpa { tpa } => {
            let limit = if tpa.window_n == 0 { 3 } else { tpa.window_n };
            let since = now - ChronoDuration::days(LOOKBACK_DAYS);
            let samples = fetch_samples(
                adapter,
                spec,
                param,
                since,
                clamp_limit(limit, limits.max_sample_rows),
                None,
                deadline,
            )
            .await?;
            let mut result = evaluate_tpa(&samples, tpa);
            apply_window_and_baseline(&mut result, &samples, None, None, false);
            Ok(result)
        }
        Detector::Threshold { threshold } => {
            if threshold.op.is_empty() {
                bail!("threshold detector missing condition");
            }
            if spec.is_aggregate() {
                let window_seconds = spec
                    .window_seconds
                    .ok_or_else(|| anyhow!("windowSeconds required for aggregate rules"))?;
                let aggregate = with_deadline(
                    deadline,
                    adapter.query_aggregate(AggregateRequest {
                        connection_ref: spec.connection_ref.clone(),
                        table: spec.source.table.clone(),
                        value_column: param.value_column.clone(),
                        timestamp_column: spec.source.timestamp_column.clone(),
                        where_clause: spec.source.where_clause.clone(),
                        agg: spec.canonical_aggregation().to_string(),
                        window_seconds,
                    }),
                )
                .await?;
                return Ok(evaluate_threshold(threshold, &aggregate.value));
            }
            let latest = with_deadline(
                deadline,
                adapter.query_latest_value(LatestValueRequest {
                    connection_ref: spec.connection_ref.clone(),
                    table: spec.source.table.clone(),
                    value_column: param.value_column.clone(),
                    timestamp_column: spec.source.timestamp_column.clone(),
                    where_clause: spec.source.where_clause.clone(),
                }),
            )
            .await?;
            Ok(evaluate_threshold(threshold, &latest.value))
        }
    }
}

/// One worker pass over a job: evaluate every parameter in order, apply
/// cooldown, persist alerts. Per-parameter failures are logged and
/// skipped so one misbehaving rule never stalls the worker loop.
pub async fn execute_run(store: &dyn RuleStore, limits: &Limits, run: &JobRun) {
    let params = run.spec.normalize();
    if params.is_empty() {
        return;
    }
    for param in &params {
        let result =
            match evaluate_parameter(run.adapter.as_ref(), &run.spec, param, limits).await {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(
                        rule_id = %run.rule_id,
                        parameter = %param.parameter_name,
                        error = %err,
                        "Parameter evaluation failed"
                    );
                    continue;
                }
            };
        if !result.hit {
            continue;
        }

        let cooldown = run.spec.cooldown_seconds.unwrap_or(0);
        if cooldown > 0 {
            let last = store
                .get_last_alert_for_key(
                    run.rule_id,
                    &param.parameter_name,
                    param.detector.kind(),
                )
                .await;
            if let Ok(Some(last)) = last {
                if within_cooldown(last, cooldown, Utc::now()) {
                    tracing::debug!(
                        rule_id = %run.rule_id,
                        parameter = %param.parameter_name,
                        "Alert suppressed (cooldown)"
                    );
                    continue;
                }
            }
        }

        let record = build_alert_record(run, param, &result);
        if let Err(err) = store.create_alert(record).await {
            tracing::error!(
                rule_id = %run.rule_id,
                parameter = %param.parameter_name,
                error = %err,
                "Failed to persist alert"
            );
        }
    }
}

fn build_alert_record(run: &JobRun, param: &ParameterSpec, result: &DetectorResult) -> AlertRecord {
    let mut metadata = Map::new();
    metadata.insert("table".into(), json!(run.spec.source.table));
    metadata.insert("valueColumn".into(), json!(param.value_column));
    metadata.insert(
        "timestampColumn".into(),
        json!(run.spec.source.timestamp_column),
    );
    metadata.insert("detector".into(), json!(param.detector.kind()));
    for (key, value) in &result.metadata {
        metadata.insert(key.clone(), value.clone());
    }
    for (key, ts) in [
        ("windowStart", result.window_start),
        ("windowEnd", result.window_end),
        ("baselineStart", result.baseline_start),
        ("baselineEnd", result.baseline_end),
    ] {
        if let Some(ts) = ts {
            metadata.insert(
                key.into(),
                json!(ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        }
    }
    if !result.violations.is_empty() {
        metadata.insert("violations".into(), json!(result.violations));
    }
    metadata.insert("explain".into(), json!(build_explain(result, param)));

    AlertRecord {
        rule_id: run.rule_id,
        ts_utc: Utc::now(),
        parameter_name: param.parameter_name.clone(),
        observed_value: result.observed.clone(),
        limit_expression: result.limit_expr.clone(),
        detector_type: param.detector.kind().to_string(),
        severity: result
            .severity
            .map(|s| s.to_string())
            .unwrap_or_else(|| "high".to_string()),
        anomaly_score: result.anomaly_score,
        baseline_median: result.baseline_median,
        baseline_mad: result.baseline_mad,
        hit: true,
        treated: false,
        metadata: Some(Value::Object(metadata)),
    }
}

/// Human-readable summary of why the detector fired, stored in alert
/// metadata and returned by the preview endpoint.
pub fn build_explain(result: &DetectorResult, param: &ParameterSpec) -> String {
    match &param.detector {
        Detector::RobustZscore { robust_z } => {
            match (
                result.anomaly_score,
                result.baseline_median,
                result.baseline_mad,
            ) {
                (Some(score), Some(median), Some(mad)) => format!(
                    "robust_zscore={score:.2} (warn>={:.2}, crit>={:.2}), median={median:.2}, mad={mad:.2}",
                    robust_z.z_warn, robust_z.z_crit
                ),
                _ => "robust_zscore".to_string(),
            }
        }
        Detector::MissingData { missing_data } => {
            format!("missing_data max_gap={}s", missing_data.max_gap_seconds)
        }
        _ => result.limit_expr.clone(),
    }
}
