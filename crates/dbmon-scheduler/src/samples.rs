//! Sample acquisition: adapter fetch, baseline windowing, row parsing.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use dbmon_adapter::{DataSourceAdapter, FetchRecentRowsRequest};
use dbmon_common::{BaselineSpec, ParameterSpec, RuleSpec, TimeRangeSpec};
use dbmon_detect::{parse_time_value, to_float, Sample};
use std::future::Future;
use std::time::Duration;

const DEFAULT_BASELINE_LAST_N: usize = 50;
const BASELINE_LOOKBACK_DAYS: i64 = 365;

/// Bound an adapter call with the per-query deadline.
pub(crate) async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, dbmon_adapter::AdapterError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(anyhow!("query deadline exceeded")),
    }
}

/// Fetch recent rows and parse them into ascending samples.
///
/// Rows whose value fails numeric parsing (or is NaN/±∞) or whose
/// timestamp is not RFC3339 are dropped silently. The adapter returns rows
/// descending by timestamp; the result here is reversed to ascending.
pub async fn fetch_samples(
    adapter: &dyn DataSourceAdapter,
    spec: &RuleSpec,
    param: &ParameterSpec,
    since: DateTime<Utc>,
    limit: usize,
    subgroup_column: Option<&str>,
    deadline: Duration,
) -> Result<Vec<Sample>> {
    let mut columns = vec![
        param.value_column.clone(),
        spec.source.timestamp_column.clone(),
    ];
    if let Some(subgroup) = subgroup_column {
        columns.push(subgroup.to_string());
    }
    let result = with_deadline(
        deadline,
        adapter.fetch_recent_rows(FetchRecentRowsRequest {
            connection_ref: spec.connection_ref.clone(),
            table: spec.source.table.clone(),
            columns,
            timestamp_column: spec.source.timestamp_column.clone(),
            where_clause: spec.source.where_clause.clone(),
            since: since.to_rfc3339_opts(SecondsFormat::Secs, true),
            limit,
        }),
    )
    .await?;

    let mut samples = Vec::with_capacity(result.rows.len());
    for row in &result.rows {
        let Some(value) = row.get(&param.value_column).and_then(to_float) else {
            continue;
        };
        if !value.is_finite() {
            continue;
        }
        let Some(ts) = row
            .get(&spec.source.timestamp_column)
            .and_then(parse_time_value)
        else {
            continue;
        };
        let subgroup = subgroup_column.and_then(|col| {
            row.get(col).map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        });
        samples.push(Sample {
            ts,
            value,
            subgroup,
        });
    }
    samples.reverse();
    Ok(samples)
}

/// Resolve a baseline selection into `(since, start, end, limit)` for the
/// sampler. `lastN` fetches the newest N rows over a one-year lookback;
/// a time range bounds both ends and is trimmed after fetch.
pub fn build_baseline_window(
    now: DateTime<Utc>,
    baseline: &BaselineSpec,
    max_rows: usize,
) -> Result<(
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    usize,
)> {
    let lookback = now - ChronoDuration::days(BASELINE_LOOKBACK_DAYS);
    match (&baseline.last_n, &baseline.time_range) {
        (None, None) => Ok((
            lookback,
            None,
            None,
            clamp_limit(DEFAULT_BASELINE_LAST_N, max_rows),
        )),
        (_, Some(time_range)) => {
            let (start, end) = parse_time_range(time_range)?;
            Ok((start, Some(start), Some(end), max_rows))
        }
        (Some(last_n), None) => {
            if *last_n <= 0 {
                bail!("lastN must be > 0");
            }
            Ok((
                lookback,
                None,
                None,
                clamp_limit(*last_n as usize, max_rows),
            ))
        }
    }
}

pub fn parse_time_range(spec: &TimeRangeSpec) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = DateTime::parse_from_rfc3339(&spec.start)
        .map_err(|e| anyhow!("invalid timeRange start: {e}"))?
        .with_timezone(&Utc);
    let end = DateTime::parse_from_rfc3339(&spec.end)
        .map_err(|e| anyhow!("invalid timeRange end: {e}"))?
        .with_timezone(&Utc);
    if end < start {
        bail!("end must be after start");
    }
    Ok((start, end))
}

pub fn clamp_limit(value: usize, max_rows: usize) -> usize {
    if max_rows == 0 || value <= max_rows {
        value
    } else {
        max_rows
    }
}
