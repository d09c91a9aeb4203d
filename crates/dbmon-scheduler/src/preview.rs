//! One-shot baseline/preview services for the rule wizard.
//!
//! Both re-validate table and column metadata before touching the
//! adapter, then run the same sampler and detector kernel the scheduler
//! uses, without persisting anything.

use crate::evaluator::build_explain;
use crate::samples::{clamp_limit, fetch_samples, parse_time_range, with_deadline};
use crate::validate::{is_numeric_type, is_time_type};
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use dbmon_adapter::DataSourceAdapter;
use dbmon_common::{
    Allowlist, Detector, DetectorResult, DetectorStatus, Limits, ParameterSpec, RangeChartSpec,
    RuleSpec, ShewhartSpec, SourceSpec, SpecLimitSpec, TimeRangeSpec, TpaSpec, TrendSpec,
};
use dbmon_detect::{
    apply_window_and_baseline, compute_timestamp_continuity, evaluate_range_chart,
    evaluate_shewhart, evaluate_spec_limit, evaluate_tpa, evaluate_trend, filter_samples_by_range,
    group_by_subgroup, group_consecutive, Sample,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

const DEFAULT_BASELINE_LAST_N: i64 = 50;
const DEFAULT_SUBGROUP_SIZE: usize = 5;
const MIN_BASELINE_SAMPLES: usize = 20;
const MIN_BASELINE_SUBGROUPS: usize = 10;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectorSpec {
    /// `"lastN"` or `"timeRange"`.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgroupSpec {
    /// `"consecutive"` or `"column"`.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub column: String,
    #[serde(default)]
    pub subgroup_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineCheckRequest {
    pub connection_ref: String,
    pub table: String,
    pub timestamp_column: String,
    pub value_column: String,
    pub rule_type: String,
    #[serde(default)]
    pub baseline_selector: SelectorSpec,
    #[serde(default)]
    pub subgrouping: Option<SubgroupSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub connection_ref: String,
    pub table: String,
    pub timestamp_column: String,
    pub value_column: String,
    pub rule_type: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub baseline_selector: Option<SelectorSpec>,
    #[serde(default)]
    pub eval_selector: Option<SelectorSpec>,
    #[serde(default)]
    pub subgrouping: Option<SubgroupSpec>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuitySummary {
    pub gaps_detected: bool,
    pub largest_gap_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BaselineCheckResponse {
    pub status: String,
    pub available: HashMap<String, usize>,
    pub required: HashMap<String, usize>,
    pub continuity: ContinuitySummary,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewResponse {
    pub status: String,
    pub window: HashMap<String, String>,
    pub baseline: Map<String, Value>,
    pub computed: Map<String, Value>,
    pub violations: Vec<Value>,
    pub explain: String,
}

/// Report how much baseline data is available for a candidate rule,
/// against the minimums its detector family needs.
pub async fn baseline_check(
    adapter: &dyn DataSourceAdapter,
    allowlist: &Allowlist,
    limits: &Limits,
    request: &BaselineCheckRequest,
) -> Result<BaselineCheckResponse> {
    let spec = build_rule_spec(
        &request.connection_ref,
        &request.table,
        &request.timestamp_column,
        &request.value_column,
        &request.rule_type,
        &Value::Null,
    )?;
    if let Err(err) = validate_metadata(
        adapter,
        allowlist,
        limits,
        &spec,
        request.subgrouping.as_ref(),
    )
    .await
    {
        return Ok(BaselineCheckResponse {
            status: DetectorStatus::InvalidConfig.to_string(),
            available: HashMap::new(),
            required: HashMap::new(),
            continuity: ContinuitySummary {
                gaps_detected: false,
                largest_gap_seconds: 0.0,
            },
            messages: vec![err.to_string()],
        });
    }

    let samples = fetch_for_selector(
        adapter,
        &spec,
        &request.baseline_selector,
        request.subgrouping.as_ref(),
        limits,
    )
    .await?;

    let mut available = HashMap::from([("samples".to_string(), samples.len())]);
    let mut required = HashMap::from([
        ("minBaselineSamples".to_string(), 0),
        ("minBaselineSubgroups".to_string(), 0),
    ]);
    if request.rule_type == "RANGE_CHART_R" {
        required.insert("minBaselineSubgroups".into(), MIN_BASELINE_SUBGROUPS);
    }
    if matches!(request.rule_type.as_str(), "SHEWHART_2SIGMA" | "SHEWHART_3SIGMA") {
        required.insert("minBaselineSamples".into(), MIN_BASELINE_SAMPLES);
    }

    let (gaps_detected, largest_gap_seconds) = compute_timestamp_continuity(&samples);

    let mut status = DetectorStatus::Ok;
    if required["minBaselineSamples"] > 0 && samples.len() < required["minBaselineSamples"] {
        status = DetectorStatus::InsufficientData;
    }
    if request.rule_type == "RANGE_CHART_R" {
        let groups = build_groups(&samples, request.subgrouping.as_ref());
        available.insert("subgroups".into(), groups.len());
        if groups.len() < required["minBaselineSubgroups"] {
            status = DetectorStatus::InsufficientData;
        }
    }

    Ok(BaselineCheckResponse {
        status: status.to_string(),
        available,
        required,
        continuity: ContinuitySummary {
            gaps_detected,
            largest_gap_seconds,
        },
        messages: Vec::new(),
    })
}

/// Run the detector kernel once over freshly fetched baseline and eval
/// windows and return the computed stats and violations.
pub async fn preview(
    adapter: &dyn DataSourceAdapter,
    allowlist: &Allowlist,
    limits: &Limits,
    request: &PreviewRequest,
) -> Result<PreviewResponse> {
    let spec = build_rule_spec(
        &request.connection_ref,
        &request.table,
        &request.timestamp_column,
        &request.value_column,
        &request.rule_type,
        &request.config,
    )?;
    if let Err(err) = validate_metadata(
        adapter,
        allowlist,
        limits,
        &spec,
        request.subgrouping.as_ref(),
    )
    .await
    {
        return Ok(PreviewResponse {
            status: DetectorStatus::InvalidConfig.to_string(),
            window: HashMap::new(),
            baseline: Map::new(),
            computed: Map::new(),
            violations: Vec::new(),
            explain: err.to_string(),
        });
    }

    let default_baseline = SelectorSpec {
        kind: "lastN".into(),
        value: DEFAULT_BASELINE_LAST_N,
        ..Default::default()
    };
    let baseline_selector = request.baseline_selector.as_ref().unwrap_or(&default_baseline);
    let baseline_samples = fetch_for_selector(
        adapter,
        &spec,
        baseline_selector,
        request.subgrouping.as_ref(),
        limits,
    )
    .await?;

    let default_eval = SelectorSpec {
        kind: "lastN".into(),
        value: DEFAULT_BASELINE_LAST_N,
        ..Default::default()
    };
    let eval_selector = request.eval_selector.as_ref().unwrap_or(&default_eval);
    let eval_samples = fetch_for_selector(
        adapter,
        &spec,
        eval_selector,
        request.subgrouping.as_ref(),
        limits,
    )
    .await?;

    let param = spec
        .parameters
        .first()
        .ok_or_else(|| anyhow!("preview spec has no parameter"))?;

    let baseline_used = matches!(
        request.rule_type.as_str(),
        "SHEWHART_3SIGMA" | "SHEWHART_2SIGMA" | "RANGE_CHART_R"
    );
    let mut result = match (&param.detector, request.rule_type.as_str()) {
        (Detector::SpecLimit { spec_limit }, _) => match eval_samples.last() {
            Some(sample) => evaluate_spec_limit(sample, spec_limit),
            None => DetectorResult::insufficient_data("not enough samples"),
        },
        (Detector::Shewhart { shewhart }, _) => {
            evaluate_shewhart(&baseline_samples, shewhart, shewhart.sigma_multiplier)
        }
        (Detector::RangeChart { range_chart }, _) => {
            let groups = build_groups(&baseline_samples, request.subgrouping.as_ref());
            evaluate_range_chart(&groups, range_chart)
        }
        (Detector::Trend { trend }, _) => evaluate_trend(&eval_samples, trend),
        (Detector::Tpa { tpa }, _) => evaluate_tpa(&eval_samples, tpa),
        (_, other) => bail!("unsupported rule type {other:?}"),
    };
    apply_window_and_baseline(&mut result, &eval_samples, None, None, baseline_used);

    let violations = result
        .violations
        .iter()
        .map(|violation| {
            let mut item = serde_json::to_value(violation)
                .unwrap_or_else(|_| Value::Object(Map::new()));
            if let Some(object) = item.as_object_mut() {
                object.insert("kind".into(), Value::String("point".into()));
            }
            item
        })
        .collect();

    let mut baseline = Map::new();
    baseline.insert("start".into(), Value::String(format_time(result.baseline_start)));
    baseline.insert("end".into(), Value::String(format_time(result.baseline_end)));
    baseline.insert("count".into(), Value::from(baseline_samples.len()));

    Ok(PreviewResponse {
        status: result.status.to_string(),
        window: HashMap::from([
            ("start".to_string(), format_time(result.window_start)),
            ("end".to_string(), format_time(result.window_end)),
        ]),
        baseline,
        computed: result.metadata.clone(),
        violations,
        explain: build_explain(&result, param),
    })
}

/// Build a one-parameter spec from the wizard's rule-type tag and config
/// blob.
fn build_rule_spec(
    connection_ref: &str,
    table: &str,
    timestamp_column: &str,
    value_column: &str,
    rule_type: &str,
    config: &Value,
) -> Result<RuleSpec> {
    let detector = build_detector(rule_type, config)?;
    Ok(RuleSpec {
        connection_ref: connection_ref.to_string(),
        source: SourceSpec {
            table: table.to_string(),
            timestamp_column: timestamp_column.to_string(),
            ..Default::default()
        },
        parameters: vec![ParameterSpec {
            parameter_name: value_column.to_string(),
            value_column: value_column.to_string(),
            detector,
        }],
        poll_interval_seconds: 10,
        enabled: true,
        ..Default::default()
    })
}

fn build_detector(rule_type: &str, config: &Value) -> Result<Detector> {
    match rule_type {
        "SPEC_LIMIT_VIOLATION" => {
            let spec: SpecLimitSpec =
                serde_json::from_value(config.clone()).unwrap_or_default();
            Ok(Detector::SpecLimit { spec_limit: spec })
        }
        "SHEWHART_3SIGMA" | "SHEWHART_2SIGMA" => {
            let mut spec: ShewhartSpec =
                serde_json::from_value(config.clone()).unwrap_or_default();
            spec.sigma_multiplier = if rule_type == "SHEWHART_2SIGMA" { 2.0 } else { 3.0 };
            Ok(Detector::Shewhart { shewhart: spec })
        }
        "RANGE_CHART_R" => {
            let spec: RangeChartSpec =
                serde_json::from_value(config.clone()).unwrap_or_default();
            Ok(Detector::RangeChart { range_chart: spec })
        }
        "TREND_6_POINTS" => {
            let mut spec: TrendSpec = serde_json::from_value(config.clone()).unwrap_or_default();
            if spec.window_size == 0 {
                spec.window_size = 6;
            }
            Ok(Detector::Trend { trend: spec })
        }
        "TPA" => {
            let spec: TpaSpec = serde_json::from_value(config.clone()).unwrap_or_default();
            Ok(Detector::Tpa { tpa: spec })
        }
        other => bail!("unsupported rule type {other:?}"),
    }
}

async fn fetch_for_selector(
    adapter: &dyn DataSourceAdapter,
    spec: &RuleSpec,
    selector: &SelectorSpec,
    subgrouping: Option<&SubgroupSpec>,
    limits: &Limits,
) -> Result<Vec<Sample>> {
    let mut since = Utc::now() - ChronoDuration::days(365);
    let mut limit = limits.max_sample_rows;
    let mut start: Option<DateTime<Utc>> = None;
    let mut end: Option<DateTime<Utc>> = None;
    match selector.kind.as_str() {
        "lastN" => {
            if selector.value > 0 {
                limit = clamp_limit(selector.value as usize, limits.max_sample_rows);
            }
        }
        "timeRange" => {
            let (parsed_start, parsed_end) = parse_time_range(&TimeRangeSpec {
                start: selector.start.clone(),
                end: selector.end.clone(),
            })?;
            since = parsed_start;
            start = Some(parsed_start);
            end = Some(parsed_end);
        }
        other => bail!("invalid selector kind {other:?}"),
    }
    let subgroup_column = subgrouping
        .filter(|s| s.kind == "column")
        .map(|s| s.column.as_str());
    let param = spec
        .parameters
        .first()
        .ok_or_else(|| anyhow!("selector fetch needs a parameter"))?;
    let samples = fetch_samples(
        adapter,
        spec,
        param,
        since,
        limit,
        subgroup_column,
        limits.max_query_duration,
    )
    .await?;
    if start.is_some() || end.is_some() {
        return Ok(filter_samples_by_range(samples, start, end));
    }
    Ok(samples)
}

fn build_groups(samples: &[Sample], subgrouping: Option<&SubgroupSpec>) -> Vec<Vec<Sample>> {
    let size = subgrouping
        .map(|s| s.subgroup_size)
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_SUBGROUP_SIZE);
    if subgrouping.is_some_and(|s| s.kind == "column") {
        group_by_subgroup(samples, size)
    } else {
        group_consecutive(samples, size)
    }
}

/// Table/column existence and type checks shared by both wizard
/// endpoints.
async fn validate_metadata(
    adapter: &dyn DataSourceAdapter,
    allowlist: &Allowlist,
    limits: &Limits,
    spec: &RuleSpec,
    subgrouping: Option<&SubgroupSpec>,
) -> Result<()> {
    if !allowlist.allows_table(&spec.source.table) {
        bail!("table not allowlisted");
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
    let param = spec
        .parameters
        .first()
        .ok_or_else(|| anyhow!("preview spec has no parameter"))?;
    let Some(value_type) = column_types.get(param.value_column.as_str()) else {
        bail!("value column not found");
    };
    if param.detector.is_statistical() && !is_numeric_type(value_type) {
        bail!("value column must be numeric");
    }
    if let Some(subgroup) = subgrouping {
        if subgroup.kind == "column" && !column_types.contains_key(subgroup.column.as_str()) {
            bail!("subgroup column not found");
        }
    }
    if matches!(
        param.detector,
        Detector::Trend { .. } | Detector::Tpa { .. }
    ) && !is_time_type(timestamp_type)
    {
        bail!("timestamp column must be time type");
    }
    Ok(())
}

fn format_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}
