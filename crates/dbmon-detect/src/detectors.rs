//! The eight detector evaluators.
//!
//! Inputs are sample windows already fetched, filtered, and ordered by the
//! scheduler; outputs are [`DetectorResult`]s. `INSUFFICIENT_DATA` and
//! `INVALID_CONFIG` never set `hit`.

use crate::constants::range_chart_constants;
use crate::samples::{subgroup_range, values_of, Sample};
use crate::stats::{linear_regression, mad, mean, median, std_dev};
use chrono::{DateTime, SecondsFormat, Utc};
use dbmon_common::{
    ConditionSpec, DetectorResult, RangeChartSpec, Severity, ShewhartSpec, SpecLimitBounds,
    SpecLimitSpec, ThresholdSpec, TpaSpec, TrendSpec, Violation,
};
use serde_json::{json, Value};

const DEFAULT_EPSILON: f64 = 1e-9;
const DEFAULT_BASELINE_MIN_N: usize = 20;
const DEFAULT_BASELINE_SUBGROUPS: usize = 10;
const DEFAULT_TREND_WINDOW: usize = 6;

/// Coerce a row cell to a float. Accepts JSON numbers and numeric strings;
/// everything else is dropped by the caller.
pub fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Compare a value against a condition. Returns `(hit, observed, limit
/// expression)`; a non-numeric value never hits and is echoed raw.
pub fn evaluate_condition(cond: &ConditionSpec, value: &Value) -> (bool, String, String) {
    let Some(float_val) = to_float(value) else {
        let target = cond
            .value
            .as_ref()
            .map(display_value)
            .unwrap_or_default();
        return (
            false,
            display_value(value),
            format!("{} {}", cond.op, target),
        );
    };
    let observed = format!("{float_val}");
    let target = cond.value.as_ref().and_then(to_float).unwrap_or(0.0);
    match cond.op.as_str() {
        ">" => (float_val > target, observed, format!("> {target}")),
        ">=" => (float_val >= target, observed, format!(">= {target}")),
        "<" => (float_val < target, observed, format!("< {target}")),
        "<=" => (float_val <= target, observed, format!("<= {target}")),
        "==" => (float_val == target, observed, format!("== {target}")),
        "!=" => (float_val != target, observed, format!("!= {target}")),
        "between" => {
            let (Some(min), Some(max)) = (cond.min, cond.max) else {
                return (false, observed, "between".to_string());
            };
            (
                float_val >= min && float_val <= max,
                observed,
                format!("between {min} and {max}"),
            )
        }
        _ => (false, display_value(value), cond.op.clone()),
    }
}

pub fn evaluate_threshold(threshold: &ThresholdSpec, value: &Value) -> DetectorResult {
    let cond = threshold.as_condition();
    let (hit, observed, expr) = evaluate_condition(&cond, value);
    DetectorResult {
        hit,
        status: dbmon_common::result::status_from_hit(hit),
        severity: Some(Severity::High),
        observed,
        limit_expr: expr,
        ..Default::default()
    }
}

/// Robust z-score over a baseline window. With zero MAD, any deviation
/// beyond epsilon scores ±∞ and fires at high severity.
pub fn evaluate_robust_z(samples: &[f64], latest: f64, z_warn: f64, z_crit: f64) -> DetectorResult {
    let median_value = median(samples);
    let mad_value = mad(samples, median_value);
    let mut result = DetectorResult {
        observed: format!("{latest}"),
        limit_expr: format!("robust_zscore warn>={z_warn:.2} crit>={z_crit:.2}"),
        baseline_median: Some(median_value),
        baseline_mad: Some(mad_value),
        ..Default::default()
    };
    if mad_value == 0.0 {
        if (latest - median_value).abs() <= DEFAULT_EPSILON {
            result.anomaly_score = Some(0.0);
            return result;
        }
        let score = if latest > median_value {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        };
        result.anomaly_score = Some(score);
        result.mark_violation();
        result.severity = Some(Severity::High);
        return result;
    }
    let score = 0.6745 * (latest - median_value) / mad_value;
    result.anomaly_score = Some(score);
    if score.abs() >= z_crit {
        result.mark_violation();
        result.severity = Some(Severity::High);
    } else if score.abs() >= z_warn {
        result.mark_violation();
        result.severity = Some(Severity::Medium);
    }
    result
}

/// Gap detector. `latest_ts = None` means the source has never reported,
/// which always counts as a gap.
pub fn evaluate_missing_data(
    latest_ts: Option<DateTime<Utc>>,
    max_gap_seconds: i64,
    now: DateTime<Utc>,
) -> DetectorResult {
    let (hit, observed, gap_seconds) = match latest_ts {
        Some(ts) => {
            let gap = (now - ts).num_milliseconds() as f64 / 1000.0;
            (gap > max_gap_seconds as f64, rfc3339(ts), gap)
        }
        None => (true, String::new(), f64::INFINITY),
    };
    let mut result = DetectorResult {
        hit,
        status: dbmon_common::result::status_from_hit(hit),
        severity: Some(Severity::High),
        observed,
        limit_expr: format!("missing_data > {max_gap_seconds}s"),
        ..Default::default()
    };
    if gap_seconds.is_finite() {
        result.insert_meta("gapSeconds", json!(gap_seconds));
    }
    result
}

/// Spec/control limit check on a single sample.
pub fn evaluate_spec_limit(sample: &Sample, spec: &SpecLimitSpec) -> DetectorResult {
    let mode = if spec.mode.is_empty() {
        "spec"
    } else {
        spec.mode.as_str()
    };
    let epsilon = spec.epsilon.unwrap_or(0.0);
    let mut result = DetectorResult {
        severity: Some(Severity::High),
        observed: format!("{}", sample.value),
        limit_expr: mode.to_string(),
        window_start: Some(sample.ts),
        window_end: Some(sample.ts),
        ..Default::default()
    };
    result.insert_meta("mode", json!(mode));
    result.insert_meta("epsilon", json!(epsilon));

    let breach = |result: &mut DetectorResult, limit: f64, kind: &str| {
        result.mark_violation();
        result.insert_meta("limitBreached", json!(kind));
        result.insert_meta("limitValue", json!(limit));
        result.insert_meta("delta", json!(sample.value - limit));
        result.add_violation(Violation {
            timestamp: Some(sample.ts),
            index: None,
            value: sample.value,
            reason: "limit_breach".into(),
            limit_name: kind.into(),
            limit_value: limit,
            delta: sample.value - limit,
        });
    };

    if mode == "spec" || mode == "both" {
        let Some(bounds) = spec.spec_limits.filter(|b| b.usl.is_some() || b.lsl.is_some()) else {
            return DetectorResult::invalid_config("spec limits required");
        };
        if let Some(usl) = bounds.usl {
            result.insert_meta("spec_usl", json!(usl));
            if sample.value > usl + epsilon {
                breach(&mut result, usl, "USL");
            }
        }
        if let Some(lsl) = bounds.lsl {
            result.insert_meta("spec_lsl", json!(lsl));
            if sample.value < lsl - epsilon {
                breach(&mut result, lsl, "LSL");
            }
        }
    }
    if mode == "control" || mode == "both" {
        let Some(bounds) = spec
            .control_limits
            .filter(|b| b.ucl.is_some() || b.lcl.is_some())
        else {
            return DetectorResult::invalid_config("control limits required");
        };
        if let Some(ucl) = bounds.ucl {
            result.insert_meta("control_ucl", json!(ucl));
            if sample.value > ucl + epsilon {
                breach(&mut result, ucl, "UCL");
            }
        }
        if let Some(lcl) = bounds.lcl {
            result.insert_meta("control_lcl", json!(lcl));
            if sample.value < lcl - epsilon {
                breach(&mut result, lcl, "LCL");
            }
        }
    }
    result
}

/// Shewhart individuals chart: mean ± k·sigma over the baseline, latest
/// value checked against the control limits.
pub fn evaluate_shewhart(
    samples: &[Sample],
    spec: &ShewhartSpec,
    sigma_multiplier: f64,
) -> DetectorResult {
    let values = values_of(samples);
    let min_baseline = if spec.min_baseline_n == 0 {
        DEFAULT_BASELINE_MIN_N
    } else {
        spec.min_baseline_n
    };
    if values.len() < min_baseline {
        return DetectorResult::insufficient_data("baseline too small");
    }
    let last_sample = &samples[samples.len() - 1];
    let mu = mean(&values);
    let sigma = std_dev(&values, spec.population_sigma);
    let ucl = mu + sigma_multiplier * sigma;
    let lcl = mu - sigma_multiplier * sigma;
    let latest = last_sample.value;

    let mut result = DetectorResult {
        severity: Some(Severity::High),
        observed: format!("{latest}"),
        limit_expr: format!("mean±{sigma_multiplier:.1}σ"),
        ..Default::default()
    };
    result.insert_meta("mu", json!(mu));
    result.insert_meta("sigma", json!(sigma));
    result.insert_meta("ucl", json!(ucl));
    result.insert_meta("lcl", json!(lcl));
    result.insert_meta("sigmaMultiplier", json!(sigma_multiplier));

    if sigma == 0.0 {
        if latest != mu {
            result.mark_violation();
            result.insert_meta("limitBreached", json!("mean"));
            result.add_violation(Violation {
                timestamp: Some(last_sample.ts),
                index: None,
                value: latest,
                reason: "mean_shift".into(),
                limit_name: "mean".into(),
                limit_value: mu,
                delta: latest - mu,
            });
        }
        return result;
    }
    if latest > ucl {
        result.mark_violation();
        result.insert_meta("limitBreached", json!("UCL"));
        result.insert_meta("delta", json!(latest - ucl));
        result.add_violation(Violation {
            timestamp: Some(last_sample.ts),
            index: None,
            value: latest,
            reason: "above_ucl".into(),
            limit_name: "UCL".into(),
            limit_value: ucl,
            delta: latest - ucl,
        });
    }
    if latest < lcl {
        result.mark_violation();
        result.insert_meta("limitBreached", json!("LCL"));
        result.insert_meta("delta", json!(latest - lcl));
        result.add_violation(Violation {
            timestamp: Some(last_sample.ts),
            index: None,
            value: latest,
            reason: "below_lcl".into(),
            limit_name: "LCL".into(),
            limit_value: lcl,
            delta: latest - lcl,
        });
    }
    result
}

/// Six-point (configurable) monotonic run detector: the last `windowSize`
/// samples must all move strictly up or strictly down by more than
/// epsilon.
pub fn evaluate_trend(samples: &[Sample], spec: &TrendSpec) -> DetectorResult {
    let window = if spec.window_size == 0 {
        DEFAULT_TREND_WINDOW
    } else {
        spec.window_size
    };
    if samples.len() < window {
        return DetectorResult::insufficient_data("not enough points");
    }
    let segment = &samples[samples.len() - window..];
    let epsilon = spec.epsilon;
    let last_sample = &segment[segment.len() - 1];
    let mut increasing = true;
    let mut decreasing = true;
    for pair in segment.windows(2) {
        if pair[1].value <= pair[0].value + epsilon {
            increasing = false;
        }
        if pair[1].value >= pair[0].value - epsilon {
            decreasing = false;
        }
    }

    let mut result = DetectorResult {
        severity: Some(Severity::High),
        observed: format!("{}", last_sample.value),
        limit_expr: format!("trend_{window}"),
        ..Default::default()
    };
    result.insert_meta("direction", json!("none"));
    result.insert_meta("windowSize", json!(window));
    result.insert_meta("epsilon", json!(epsilon));

    if increasing || decreasing {
        result.mark_violation();
        let direction = if increasing { "up" } else { "down" };
        let reason = if increasing { "increasing" } else { "decreasing" };
        result.insert_meta("direction", json!(direction));
        result.add_violation(Violation {
            timestamp: Some(last_sample.ts),
            index: Some(samples.len() - 1),
            value: last_sample.value,
            reason: reason.into(),
            limit_name: "trend".into(),
            limit_value: 0.0,
            delta: 0.0,
        });
    }
    result
}

/// R-chart over subgroup ranges: UCL_R = D4·R̄, LCL_R = D3·R̄, with the
/// latest subgroup's range checked against both.
pub fn evaluate_range_chart(groups: &[Vec<Sample>], spec: &RangeChartSpec) -> DetectorResult {
    if groups.is_empty() {
        return DetectorResult::insufficient_data("no valid subgroups");
    }
    let min_groups = if spec.min_baseline_subgroups == 0 {
        DEFAULT_BASELINE_SUBGROUPS
    } else {
        spec.min_baseline_subgroups
    };
    if groups.len() < min_groups {
        return DetectorResult::insufficient_data("baseline subgroups too small");
    }
    let Some((d3, d4)) = range_chart_constants(spec.subgroup_size) else {
        return DetectorResult::invalid_config("unsupported subgroup size");
    };
    let ranges: Vec<f64> = groups.iter().map(|g| subgroup_range(g)).collect();
    let rbar = mean(&ranges);
    let ucl = d4 * rbar;
    let lcl = d3 * rbar;
    let latest_range = ranges[ranges.len() - 1];
    let last_group = &groups[groups.len() - 1];
    let last_sample = &last_group[last_group.len() - 1];

    let mut result = DetectorResult {
        severity: Some(Severity::High),
        observed: format!("{latest_range}"),
        limit_expr: "range_chart".to_string(),
        ..Default::default()
    };
    result.insert_meta("rbar", json!(rbar));
    result.insert_meta("ucl_r", json!(ucl));
    result.insert_meta("lcl_r", json!(lcl));
    result.insert_meta("subgroupSize", json!(spec.subgroup_size));

    if latest_range > ucl || latest_range < lcl {
        result.mark_violation();
        result.insert_meta("limitBreached", json!("range"));
        result.insert_meta("delta", json!(latest_range - ucl));
        let (reason, limit) = if latest_range < lcl {
            ("below_lcl_r", lcl)
        } else {
            ("above_ucl_r", ucl)
        };
        result.add_violation(Violation {
            timestamp: Some(last_sample.ts),
            index: None,
            value: latest_range,
            reason: reason.into(),
            limit_name: "R".into(),
            limit_value: limit,
            delta: latest_range - limit,
        });
    }
    result
}

/// Trend-projection analysis: OLS over the last `windowN` samples, firing
/// on slope magnitude and/or projected time-to-spec.
pub fn evaluate_tpa(samples: &[Sample], spec: &TpaSpec) -> DetectorResult {
    if spec.window_n < 3 {
        return DetectorResult::invalid_config("windowN must be >= 3");
    }
    if samples.len() < spec.window_n {
        return DetectorResult::insufficient_data("not enough samples");
    }
    let window = &samples[samples.len() - spec.window_n..];
    let last_sample = &window[window.len() - 1];
    let basis = if spec.regression_time_basis.is_empty() {
        "timestamp"
    } else {
        spec.regression_time_basis.as_str()
    };
    let x_vals: Vec<f64> = window
        .iter()
        .enumerate()
        .map(|(i, s)| {
            if basis == "timestamp" {
                s.ts.timestamp() as f64
            } else {
                (i + 1) as f64
            }
        })
        .collect();
    let y_vals = values_of(window);
    let Some((slope, intercept, r2)) = linear_regression(&x_vals, &y_vals) else {
        return DetectorResult::invalid_config("regression failed");
    };
    let latest = last_sample.value;

    let mut result = DetectorResult {
        severity: Some(Severity::High),
        observed: format!("{latest}"),
        limit_expr: "tpa".to_string(),
        ..Default::default()
    };
    result.insert_meta("slope", json!(slope));
    result.insert_meta("intercept", json!(intercept));
    result.insert_meta("r2", json!(r2));
    result.insert_meta("windowN", json!(spec.window_n));
    result.insert_meta("regressionBasis", json!(basis));

    if slope.abs() <= spec.epsilon {
        return result;
    }
    if let Some(slope_threshold) = spec.slope_threshold {
        if slope.abs() >= slope_threshold {
            result.mark_violation();
            result.insert_meta("trigger", json!("slope"));
            result.add_violation(Violation {
                timestamp: Some(last_sample.ts),
                index: None,
                value: latest,
                reason: "slope_threshold".into(),
                limit_name: "slope".into(),
                limit_value: slope_threshold,
                delta: slope.abs() - slope_threshold,
            });
        }
    }
    if let Some(tts_threshold) = spec.time_to_spec_threshold {
        if spec.require_spec_limits && spec.spec_limits.is_none() {
            return DetectorResult::invalid_config("spec limits required for timeToSpec");
        }
        if let Some(limits) = &spec.spec_limits {
            if let Some(time_to_spec) = compute_time_to_spec(slope, latest, limits) {
                result.insert_meta("timeToSpec", json!(time_to_spec));
                if time_to_spec >= 0.0 && time_to_spec <= tts_threshold {
                    result.mark_violation();
                    result.insert_meta("trigger", json!("timeToSpec"));
                    result.add_violation(Violation {
                        timestamp: Some(last_sample.ts),
                        index: None,
                        value: latest,
                        reason: "time_to_spec".into(),
                        limit_name: "timeToSpec".into(),
                        limit_value: tts_threshold,
                        delta: time_to_spec - tts_threshold,
                    });
                }
            }
        }
    }
    result
}

fn compute_time_to_spec(slope: f64, current: f64, limits: &SpecLimitBounds) -> Option<f64> {
    if slope > 0.0 {
        limits.usl.map(|usl| (usl - current) / slope)
    } else if slope < 0.0 {
        limits.lsl.map(|lsl| (current - lsl) / slope.abs())
    } else {
        None
    }
}

/// Stamp window bounds (first/last sample) and, for baseline-driven
/// detectors, the baseline bounds onto a result.
pub fn apply_window_and_baseline(
    result: &mut DetectorResult,
    samples: &[Sample],
    baseline_start: Option<DateTime<Utc>>,
    baseline_end: Option<DateTime<Utc>>,
    baseline_used: bool,
) {
    if samples.is_empty() {
        return;
    }
    result.window_start = Some(samples[0].ts);
    result.window_end = Some(samples[samples.len() - 1].ts);
    if baseline_used {
        result.baseline_start = baseline_start.or(result.window_start);
        result.baseline_end = baseline_end.or(result.window_end);
    }
}
