//! Static rule validation.
//!
//! Walks the normalized spec and accumulates every problem into one
//! `RULE_SCHEMA_INVALID` error. Identifier shape, polling bounds, the
//! aggregation window, and detector-specific constraints are all checked
//! here; schema existence is the runtime validator's job.

use dbmon_common::{
    is_safe_identifier, BaselineSpec, Detector, ErrorDetail, ParseError, RuleSpec,
};
use dbmon_detect::constants::is_supported_subgroup_size;

pub fn validate_rule_spec(spec: &RuleSpec, min_poll: i64, max_poll: i64) -> Result<(), ParseError> {
    let mut details = Vec::new();

    if !is_safe_identifier(&spec.source.table) {
        details.push(ErrorDetail::new(
            "source.table",
            "invalid",
            "Use alphanumeric identifiers",
        ));
    }
    if !is_safe_identifier(&spec.source.timestamp_column) {
        details.push(ErrorDetail::new(
            "source.timestampColumn",
            "invalid",
            "Use alphanumeric identifiers",
        ));
    }
    if spec.poll_interval_seconds < min_poll || spec.poll_interval_seconds > max_poll {
        details.push(ErrorDetail::new(
            "pollIntervalSeconds",
            "out of range",
            format!("min {min_poll}, max {max_poll}"),
        ));
    }
    if spec.canonical_aggregation() != "latest" {
        match spec.window_seconds {
            None => details.push(ErrorDetail::new(
                "windowSeconds",
                "required",
                "Provide a window for aggregate rules",
            )),
            Some(window) if window <= 0 => details.push(ErrorDetail::new(
                "windowSeconds",
                "required",
                "Provide a window for aggregate rules",
            )),
            Some(window) if window < spec.poll_interval_seconds => details.push(ErrorDetail::new(
                "windowSeconds",
                "too small",
                "Must be >= pollIntervalSeconds",
            )),
            Some(_) => {}
        }
    }

    let params = spec.normalize();
    if params.is_empty() {
        details.push(ErrorDetail::new(
            "parameters",
            "missing",
            "Provide at least one parameter",
        ));
    }
    for (i, param) in params.iter().enumerate() {
        if !is_safe_identifier(&param.value_column) {
            details.push(ErrorDetail::new(
                format!("parameters[{i}].valueColumn"),
                "invalid",
                "Use alphanumeric identifiers",
            ));
        }
        if !param.parameter_name.is_empty() && !is_safe_identifier(&param.parameter_name) {
            details.push(ErrorDetail::new(
                format!("parameters[{i}].parameterName"),
                "invalid",
                "Use alphanumeric identifiers",
            ));
        }
        if let Some(detail) = validate_detector(&param.detector, spec.poll_interval_seconds, i) {
            details.push(detail);
        }
    }

    if let Some(where_clause) = &spec.source.where_clause {
        for (i, clause) in where_clause.clauses.iter().enumerate() {
            if !is_safe_identifier(&clause.column) {
                details.push(ErrorDetail::new(
                    format!("source.where.clauses[{i}].column"),
                    "invalid",
                    "Use alphanumeric identifiers",
                ));
            }
        }
    }

    if details.is_empty() {
        Ok(())
    } else {
        Err(ParseError::schema_invalid(
            "rule spec failed validation",
            details,
        ))
    }
}

fn validate_detector(detector: &Detector, poll_interval: i64, index: usize) -> Option<ErrorDetail> {
    match detector {
        Detector::Threshold { threshold } => {
            if threshold.op == "between" {
                let valid = matches!((threshold.min, threshold.max), (Some(min), Some(max)) if min < max);
                if !valid {
                    return Some(ErrorDetail::new(
                        format!("parameters[{index}].detector.threshold"),
                        "invalid between range",
                        "min < max",
                    ));
                }
            } else if threshold.op.is_empty() {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.threshold"),
                    "missing",
                    "Example: above 80",
                ));
            }
            None
        }
        Detector::RobustZscore { robust_z } => {
            if robust_z.baseline_window_seconds < robust_z.eval_window_seconds {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.robustZ.baselineWindowSeconds"),
                    "invalid",
                    "baselineWindowSeconds >= evalWindowSeconds",
                ));
            }
            if robust_z.min_samples < 20 {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.robustZ.minSamples"),
                    "too small",
                    "minSamples >= 20",
                ));
            }
            None
        }
        Detector::MissingData { missing_data } => {
            if missing_data.max_gap_seconds < poll_interval {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.missingData.maxGapSeconds"),
                    "too small",
                    "maxGapSeconds >= pollIntervalSeconds",
                ));
            }
            None
        }
        Detector::SpecLimit { spec_limit } => {
            let mode = if spec_limit.mode.is_empty() {
                "spec"
            } else {
                spec_limit.mode.as_str()
            };
            if !matches!(mode, "spec" | "control" | "both") {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.specLimit.mode"),
                    "invalid",
                    "Use spec, control, or both",
                ));
            }
            if (mode == "spec" || mode == "both")
                && !spec_limit
                    .spec_limits
                    .is_some_and(|b| b.usl.is_some() || b.lsl.is_some())
            {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.specLimit.specLimits"),
                    "missing",
                    "Provide USL/LSL",
                ));
            }
            if (mode == "control" || mode == "both")
                && !spec_limit
                    .control_limits
                    .is_some_and(|b| b.ucl.is_some() || b.lcl.is_some())
            {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.specLimit.controlLimits"),
                    "missing",
                    "Provide UCL/LCL",
                ));
            }
            None
        }
        Detector::Shewhart { shewhart } => {
            if let Some(detail) = validate_baseline(
                &shewhart.baseline,
                &format!("parameters[{index}].detector.shewhart.baseline"),
            ) {
                return Some(detail);
            }
            if shewhart.sigma_multiplier != 0.0
                && !(2.0..=3.0).contains(&shewhart.sigma_multiplier)
            {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.shewhart.sigmaMultiplier"),
                    "invalid",
                    "Use 2 or 3",
                ));
            }
            None
        }
        Detector::RangeChart { range_chart } => {
            if !is_supported_subgroup_size(range_chart.subgroup_size) {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.rangeChart.subgroupSize"),
                    "invalid",
                    "Supported subgroupSize: 2-10",
                ));
            }
            if let Some(detail) = validate_baseline(
                &range_chart.baseline,
                &format!("parameters[{index}].detector.rangeChart.baseline"),
            ) {
                return Some(detail);
            }
            let mode = if range_chart.subgrouping.mode.is_empty() {
                "consecutive"
            } else {
                range_chart.subgrouping.mode.as_str()
            };
            if !matches!(mode, "consecutive" | "column") {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.rangeChart.subgrouping.mode"),
                    "invalid",
                    "Use consecutive or column",
                ));
            }
            if mode == "column" && range_chart.subgrouping.column.is_empty() {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.rangeChart.subgrouping.column"),
                    "missing",
                    "Provide column name",
                ));
            }
            if mode == "column" && !range_chart.subgrouping.column.is_empty()
                && !is_safe_identifier(&range_chart.subgrouping.column)
            {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.rangeChart.subgrouping.column"),
                    "invalid",
                    "Use alphanumeric identifiers",
                ));
            }
            None
        }
        Detector::Trend { trend } => {
            if trend.window_size < 2 {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.trend.windowSize"),
                    "invalid",
                    "windowSize must be >= 2",
                ));
            }
            if trend.epsilon < 0.0 {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.trend.epsilon"),
                    "invalid",
                    "epsilon must be >= 0",
                ));
            }
            None
        }
        Detector::Tpa { tpa } => {
            if tpa.window_n < 3 {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.tpa.windowN"),
                    "invalid",
                    "windowN must be >= 3",
                ));
            }
            if !tpa.regression_time_basis.is_empty()
                && !matches!(tpa.regression_time_basis.as_str(), "index" | "timestamp")
            {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.tpa.regressionTimeBasis"),
                    "invalid",
                    "Use index or timestamp",
                ));
            }
            if tpa.require_spec_limits && tpa.spec_limits.is_none() {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.tpa.specLimits"),
                    "missing",
                    "Provide spec limits",
                ));
            }
            if tpa.slope_threshold.is_none() && tpa.time_to_spec_threshold.is_none() {
                return Some(ErrorDetail::new(
                    format!("parameters[{index}].detector.tpa"),
                    "invalid",
                    "Provide slopeThreshold or timeToSpecThreshold",
                ));
            }
            None
        }
    }
}

fn validate_baseline(baseline: &BaselineSpec, field: &str) -> Option<ErrorDetail> {
    if baseline.last_n.is_some() && baseline.time_range.is_some() {
        return Some(ErrorDetail::new(field, "invalid", "Use lastN or timeRange"));
    }
    if baseline.last_n.is_none() && baseline.time_range.is_none() {
        return Some(ErrorDetail::new(
            field,
            "missing",
            "Provide lastN or timeRange",
        ));
    }
    if let Some(last_n) = baseline.last_n {
        if last_n <= 0 {
            return Some(ErrorDetail::new(
                format!("{field}.lastN"),
                "invalid",
                "lastN must be > 0",
            ));
        }
    }
    if let Some(time_range) = &baseline.time_range {
        if time_range.start.is_empty() || time_range.end.is_empty() {
            return Some(ErrorDetail::new(
                format!("{field}.timeRange"),
                "invalid",
                "Provide start and end",
            ));
        }
    }
    None
}
