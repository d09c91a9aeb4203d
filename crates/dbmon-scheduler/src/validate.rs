//! Runtime validation against the live schema.
//!
//! Static validation has already checked shapes; this pass talks to the
//! adapter to confirm the table and columns actually exist, the types fit
//! the detector, and a probe query succeeds. Any failure message here ends
//! up in `rules.last_error` and flips the rule to `INVALID`.

use crate::samples::with_deadline;
use anyhow::{bail, Result};
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use dbmon_adapter::{
    AggregateRequest, DataSourceAdapter, FetchRecentRowsRequest, LatestValueRequest,
};
use dbmon_common::{is_safe_identifier, Allowlist, Detector, Limits, ParameterSpec, RuleSpec};
use std::collections::HashMap;

const PROBE_ROW_LIMIT: usize = 5;

pub async fn runtime_validate_rule(
    adapter: &dyn DataSourceAdapter,
    spec: &RuleSpec,
    allowlist: &Allowlist,
    limits: &Limits,
) -> Result<()> {
    if spec.poll_interval_seconds < limits.min_poll_seconds
        || spec.poll_interval_seconds > limits.max_poll_seconds
    {
        bail!("poll interval out of bounds");
    }
    if spec.canonical_aggregation() != "latest" {
        match spec.window_seconds {
            None => bail!("windowSeconds required"),
            Some(window) if window <= 0 => bail!("windowSeconds required"),
            Some(window) if window > limits.max_window_seconds => {
                bail!("windowSeconds exceeds limit")
            }
            Some(_) => {}
        }
    }
    if !is_safe_identifier(&spec.source.table) || !is_safe_identifier(&spec.source.timestamp_column)
    {
        bail!("unsafe identifier");
    }
    let params = spec.normalize();
    if params.is_empty() {
        bail!("parameters required");
    }
    for param in &params {
        if !is_safe_identifier(&param.value_column) {
            bail!("unsafe value column");
        }
    }
    if let Some(where_clause) = &spec.source.where_clause {
        for clause in &where_clause.clauses {
            if !is_safe_identifier(&clause.column) {
                bail!("unsafe where identifier");
            }
        }
    }
    if !allowlist.allows_table(&spec.source.table) {
        bail!("table not allowlisted");
    }

    let capabilities = adapter.capabilities();
    if !capabilities.supports_introspection {
        bail!("adapter does not support introspection");
    }
    if spec.is_aggregate() && !capabilities.supports_aggregate {
        bail!("adapter does not support aggregates");
    }

    let tables = with_deadline(
        limits.max_query_duration,
        adapter.list_tables(&spec.connection_ref),
    )
    .await?;
    if !tables.iter().any(|t| t == &spec.source.table) {
        bail!("table not found");
    }

    let columns = with_deadline(
        limits.max_query_duration,
        adapter.list_columns(&spec.connection_ref, &spec.source.table),
    )
    .await?;
    let column_types: HashMap<&str, &str> = columns
        .iter()
        .map(|c| (c.name.as_str(), c.column_type.as_str()))
        .collect();
    let Some(timestamp_type) = column_types.get(spec.source.timestamp_column.as_str()) else {
        bail!("timestamp column not found");
    };

    for param in &params {
        let Some(value_type) = column_types.get(param.value_column.as_str()) else {
            bail!("value column not found");
        };
        if param.detector.is_statistical() && !is_numeric_type(value_type) {
            bail!("non-numeric column for {}", param.detector.kind());
        }
        if matches!(
            param.detector,
            Detector::Trend { .. } | Detector::Tpa { .. }
        ) && !is_time_type(timestamp_type)
        {
            bail!("timestamp column must be a time type");
        }
        if let Detector::RangeChart { range_chart } = &param.detector {
            if range_chart.subgrouping.mode == "column" {
                let column = range_chart.subgrouping.column.as_str();
                if column.is_empty() {
                    bail!("subgrouping column required");
                }
                if !column_types.contains_key(column) {
                    bail!("subgrouping column not found");
                }
            }
        }
        probe_parameter(adapter, spec, param, limits).await?;
    }
    Ok(())
}

/// A live query per parameter so connection problems surface at
/// validation time rather than on the first tick.
async fn probe_parameter(
    adapter: &dyn DataSourceAdapter,
    spec: &RuleSpec,
    param: &ParameterSpec,
    limits: &Limits,
) -> Result<()> {
    if param.detector.is_statistical() {
        let since = Utc::now() - ChronoDuration::seconds(limits.max_window_seconds);
        with_deadline(
            limits.max_query_duration,
            adapter.fetch_recent_rows(FetchRecentRowsRequest {
                connection_ref: spec.connection_ref.clone(),
                table: spec.source.table.clone(),
                columns: vec![
                    param.value_column.clone(),
                    spec.source.timestamp_column.clone(),
                ],
                timestamp_column: spec.source.timestamp_column.clone(),
                where_clause: spec.source.where_clause.clone(),
                since: since.to_rfc3339_opts(SecondsFormat::Secs, true),
                limit: PROBE_ROW_LIMIT.min(limits.max_sample_rows),
            }),
        )
        .await?;
        return Ok(());
    }
    if matches!(param.detector, Detector::Threshold { .. }) && spec.is_aggregate() {
        with_deadline(
            limits.max_query_duration,
            adapter.query_aggregate(AggregateRequest {
                connection_ref: spec.connection_ref.clone(),
                table: spec.source.table.clone(),
                value_column: param.value_column.clone(),
                timestamp_column: spec.source.timestamp_column.clone(),
                where_clause: spec.source.where_clause.clone(),
                agg: spec.canonical_aggregation().to_string(),
                window_seconds: spec.window_seconds.unwrap_or(0),
            }),
        )
        .await?;
        return Ok(());
    }
    with_deadline(
        limits.max_query_duration,
        adapter.query_latest_value(LatestValueRequest {
            connection_ref: spec.connection_ref.clone(),
            table: spec.source.table.clone(),
            value_column: param.value_column.clone(),
            timestamp_column: spec.source.timestamp_column.clone(),
            where_clause: spec.source.where_clause.clone(),
        }),
    )
    .await?;
    Ok(())
}

pub(crate) fn is_numeric_type(column_type: &str) -> bool {
    let value = column_type.to_lowercase();
    ["int", "decimal", "numeric", "float", "double", "real"]
        .iter()
        .any(|t| value.contains(t))
}

pub(crate) fn is_time_type(column_type: &str) -> bool {
    let value = column_type.to_lowercase();
    value.contains("time") || value.contains("date")
}
