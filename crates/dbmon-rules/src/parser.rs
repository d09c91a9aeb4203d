//! Rule-prompt parser.
//!
//! Recognized patterns are case-insensitive; parsed tokens always win over
//! draft values. The output spec carries a normalized parameter list.

use dbmon_common::{
    ClauseSpec, ConditionSpec, Detector, ErrorDetail, MissingDataSpec, ParameterSpec, ParseError,
    RobustZSpec, RuleDraft, RuleSpec, ThresholdSpec, WhereSpec,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const DEFAULT_POLL_INTERVAL_SECONDS: i64 = 60;
const DEFAULT_ROBUST_BASELINE_SECONDS: i64 = 3600;
const DEFAULT_ROBUST_EVAL_SECONDS: i64 = 300;
const DEFAULT_ROBUST_Z_WARN: f64 = 3.0;
const DEFAULT_ROBUST_Z_CRIT: f64 = 5.0;
const DEFAULT_ROBUST_MIN_SAMPLES: usize = 20;

static TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btable\s+([A-Za-z_][A-Za-z0-9_]*)").expect("table regex"));
static VALUE_COL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:value|column)\s+([A-Za-z_][A-Za-z0-9_]*)").expect("value regex")
});
static TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:timestamp|time)\s+([A-Za-z_][A-Za-z0-9_]*)").expect("timestamp regex")
});
static BETWEEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bbetween\s+([0-9]+(?:\.[0-9]+)?)\s+(?:and|to)\s+([0-9]+(?:\.[0-9]+)?)")
        .expect("between regex")
});
static RANGE_FROM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:in\s+)?range\s+from\s+([0-9]+(?:\.[0-9]+)?)\s+(?:up\s+to|through|to)\s+([0-9]+(?:\.[0-9]+)?)",
    )
    .expect("range regex")
});
static COMPARE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(above|below|greater than|less than|>=|<=|>|<|==|!=)\s*([0-9]+(?:\.[0-9]+)?)")
        .expect("compare regex")
});
static ANOMALY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:abnormal|anomaly|outlier|spike)\b").expect("anomaly regex"));
static MISSING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:no\s+data|missing|stopped\s+reporting)\b").expect("missing regex")
});
static WINDOW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:last|over)\s+([0-9]+)\s*(s|secs?|seconds?|m|mins?|minutes?|h|hrs?|hours?)\b",
    )
    .expect("window regex")
});
static INTERVAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:every|each)\s+([0-9]+)?\s*(s|secs?|seconds?|m|mins?|minutes?|h|hrs?|hours?)\b",
    )
    .expect("interval regex")
});
static WHERE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bwhere\s+([A-Za-z_][A-Za-z0-9_]*)\s*(==|=|!=|>=|<=|>|<|in)\s*([^,]+)")
        .expect("where regex")
});
static AND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\band\s+([A-Za-z_][A-Za-z0-9_]*)\s*(==|=|!=|>=|<=|>|<|in)\s*([^,]+)")
        .expect("and regex")
});
static AVG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:avg|average)\b").expect("avg regex"));
static MIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmin\b").expect("min regex"));
static MAX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmax\b").expect("max regex"));
static SUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bsum\b").expect("sum regex"));

/// Parse a rule prompt without a draft.
pub fn parse_prompt(prompt: &str, connection_ref: &str) -> Result<RuleSpec, ParseError> {
    parse_prompt_with_draft(prompt, connection_ref, None)
}

/// Parse a rule prompt, filling unbound slots from an optional draft.
pub fn parse_prompt_with_draft(
    prompt: &str,
    connection_ref: &str,
    draft: Option<&RuleDraft>,
) -> Result<RuleSpec, ParseError> {
    let clean = prompt.trim();
    if clean.is_empty() && draft.is_none() {
        return Err(ParseError::ambiguous(
            "empty rule prompt",
            vec![ErrorDetail::new(
                "rulePrompt",
                "empty",
                "Provide a rule prompt",
            )],
        ));
    }

    let mut details = Vec::new();
    let mut spec = RuleSpec {
        connection_ref: connection_ref.to_string(),
        aggregation: "latest".to_string(),
        poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
        enabled: true,
        ..Default::default()
    };

    let table = TABLE_RE
        .captures(clean)
        .map(|c| c[1].to_string())
        .or_else(|| {
            draft
                .map(|d| d.table.clone())
                .filter(|t| !t.is_empty())
        });
    match table {
        Some(table) => spec.source.table = table,
        None => details.push(ErrorDetail::new(
            "source.table",
            "missing",
            "Example: table telemetry",
        )),
    }

    let timestamp = TIMESTAMP_RE
        .captures(clean)
        .map(|c| c[1].to_string())
        .or_else(|| {
            draft
                .map(|d| d.timestamp_column.clone())
                .filter(|t| !t.is_empty())
        });
    match timestamp {
        Some(ts) => spec.source.timestamp_column = ts,
        None => details.push(ErrorDetail::new(
            "source.timestampColumn",
            "missing",
            "Example: timestamp ts",
        )),
    }

    if AVG_RE.is_match(clean) {
        spec.aggregation = "avg".into();
    } else if MIN_RE.is_match(clean) {
        spec.aggregation = "min".into();
    } else if MAX_RE.is_match(clean) {
        spec.aggregation = "max".into();
    } else if SUM_RE.is_match(clean) {
        spec.aggregation = "sum".into();
    }

    let window_seconds = WINDOW_RE.captures(clean).and_then(|c| {
        parse_duration_seconds(&c[1], &c[2])
    });
    if let Some(seconds) = window_seconds {
        spec.window_seconds = Some(seconds);
    }

    if let Some(c) = INTERVAL_RE.captures(clean) {
        let amount = c.get(1).map(|m| m.as_str()).unwrap_or("1");
        if let Some(seconds) = parse_duration_seconds(amount, &c[2]) {
            spec.poll_interval_seconds = seconds;
        }
    }

    // Detector inference: explicit thresholds first, then anomaly and
    // missing-data keywords.
    let parsed_detector = infer_detector(clean, &mut spec, window_seconds);

    let value_column = VALUE_COL_RE.captures(clean).map(|c| c[1].to_string());
    let draft_params: &[dbmon_common::DraftParameter] =
        draft.map(|d| d.parameters.as_slice()).unwrap_or(&[]);

    if let Some(column) = value_column {
        spec.source.value_column = column.clone();
        spec.parameter_name = column.clone();
        let detector = parsed_detector.clone().or_else(|| {
            draft_params
                .iter()
                .find(|p| p.value_column == column)
                .and_then(|p| p.detector.clone())
        });
        match detector {
            Some(detector) => spec.parameters.push(ParameterSpec {
                parameter_name: column.clone(),
                value_column: column,
                detector,
            }),
            None => details.push(ErrorDetail::new(
                "condition",
                "missing",
                "Example: above 80",
            )),
        }
    } else if !draft_params.is_empty() {
        for (i, draft_param) in draft_params.iter().enumerate() {
            let detector = draft_param
                .detector
                .clone()
                .or_else(|| parsed_detector.clone());
            match detector {
                Some(detector) => {
                    let name = if draft_param.parameter_name.is_empty() {
                        draft_param.value_column.clone()
                    } else {
                        draft_param.parameter_name.clone()
                    };
                    spec.parameters.push(ParameterSpec {
                        parameter_name: name,
                        value_column: draft_param.value_column.clone(),
                        detector,
                    });
                }
                None => details.push(ErrorDetail::new(
                    format!("parameters[{i}].detector"),
                    "missing",
                    "Example: above 80",
                )),
            }
        }
        if let Some(first) = spec.parameters.first() {
            spec.source.value_column = first.value_column.clone();
            spec.parameter_name = first.parameter_name.clone();
        }
    } else {
        details.push(ErrorDetail::new(
            "source.valueColumn",
            "missing",
            "Example: column temperature",
        ));
        if parsed_detector.is_none() {
            details.push(ErrorDetail::new("condition", "missing", "Example: above 80"));
        }
    }

    let mut clauses = Vec::new();
    if let Some(c) = WHERE_RE.captures(clean) {
        clauses.push(ClauseSpec {
            column: c[1].to_string(),
            op: normalize_op(&c[2]),
            value: parse_clause_value(&c[3]),
        });
    }
    for c in AND_RE.captures_iter(clean) {
        clauses.push(ClauseSpec {
            column: c[1].to_string(),
            op: normalize_op(&c[2]),
            value: parse_clause_value(&c[3]),
        });
    }
    if !clauses.is_empty() {
        spec.source.where_clause = Some(WhereSpec {
            joiner: "and".into(),
            clauses,
        });
    } else if let Some(draft_where) = draft.and_then(|d| d.where_clause.clone()) {
        spec.source.where_clause = Some(draft_where);
    }

    if !details.is_empty() {
        return Err(ParseError::ambiguous(
            "rule prompt is missing required fields",
            details,
        ));
    }
    Ok(spec)
}

/// Infer a detector from the prompt text. Threshold forms also populate
/// the legacy condition fields so the serialized spec stays complete.
fn infer_detector(
    clean: &str,
    spec: &mut RuleSpec,
    window_seconds: Option<i64>,
) -> Option<Detector> {
    let range = BETWEEN_RE
        .captures(clean)
        .or_else(|| RANGE_FROM_RE.captures(clean));
    if let Some(c) = range {
        let min = c[1].parse::<f64>().ok()?;
        let max = c[2].parse::<f64>().ok()?;
        spec.condition = ConditionSpec {
            op: "between".into(),
            value: None,
            min: Some(min),
            max: Some(max),
        };
        return Some(Detector::Threshold {
            threshold: ThresholdSpec {
                op: "between".into(),
                value: None,
                min: Some(min),
                max: Some(max),
            },
        });
    }
    if let Some(c) = COMPARE_RE.captures(clean) {
        let op = normalize_op(&c[1]);
        let value = c[2].parse::<f64>().ok()?;
        spec.condition = ConditionSpec {
            op: op.clone(),
            value: Some(Value::from(value)),
            min: None,
            max: None,
        };
        return Some(Detector::Threshold {
            threshold: ThresholdSpec {
                op,
                value: Some(Value::from(value)),
                min: None,
                max: None,
            },
        });
    }
    if ANOMALY_RE.is_match(clean) {
        return Some(Detector::RobustZscore {
            robust_z: RobustZSpec {
                baseline_window_seconds: DEFAULT_ROBUST_BASELINE_SECONDS,
                eval_window_seconds: window_seconds.unwrap_or(DEFAULT_ROBUST_EVAL_SECONDS),
                z_warn: DEFAULT_ROBUST_Z_WARN,
                z_crit: DEFAULT_ROBUST_Z_CRIT,
                min_samples: DEFAULT_ROBUST_MIN_SAMPLES,
            },
        });
    }
    if MISSING_RE.is_match(clean) {
        return Some(Detector::MissingData {
            missing_data: MissingDataSpec {
                max_gap_seconds: 2 * spec.poll_interval_seconds,
            },
        });
    }
    None
}

fn parse_duration_seconds(value: &str, unit: &str) -> Option<i64> {
    let amount: i64 = value.parse().ok()?;
    if amount <= 0 {
        return None;
    }
    let unit = unit.to_lowercase();
    if unit.starts_with('s') {
        Some(amount)
    } else if unit.starts_with('m') {
        Some(amount * 60)
    } else if unit.starts_with('h') {
        Some(amount * 3600)
    } else {
        None
    }
}

fn normalize_op(op: &str) -> String {
    let trimmed = op.trim().to_lowercase();
    match trimmed.as_str() {
        "above" | ">" | "greater than" => ">".into(),
        ">=" => ">=".into(),
        "below" | "<" | "less than" => "<".into(),
        "<=" => "<=".into(),
        "=" | "==" => "==".into(),
        "!=" => "!=".into(),
        "in" => "in".into(),
        _ => trimmed,
    }
}

fn parse_clause_value(raw: &str) -> Value {
    let trimmed = raw.trim().trim_matches(|c| c == '\'' || c == '"');
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        let items: Vec<Value> = trimmed[1..trimmed.len() - 1]
            .split(',')
            .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"'))
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.to_string()))
            .collect();
        return Value::Array(items);
    }
    if let Ok(num) = trimmed.parse::<f64>() {
        return Value::from(num);
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::String(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbmon_common::DraftParameter;

    #[test]
    fn ambiguous_prompt_lists_missing_fields() {
        let err = parse_prompt("check temperature above 80", "conn-1").unwrap_err();
        assert_eq!(err.code.to_string(), "RULE_AMBIGUOUS");
        assert!(err.details.iter().any(|d| d.field == "source.table"));
    }

    #[test]
    fn threshold_prompt_parses() {
        let spec = parse_prompt(
            "table telemetry column temperature timestamp ts above 80 every 10s",
            "conn-1",
        )
        .unwrap();
        assert_eq!(spec.source.table, "telemetry");
        assert_eq!(spec.source.timestamp_column, "ts");
        assert_eq!(spec.poll_interval_seconds, 10);
        assert_eq!(spec.parameters.len(), 1);
        let param = &spec.parameters[0];
        assert_eq!(param.parameter_name, "temperature");
        match &param.detector {
            Detector::Threshold { threshold } => {
                assert_eq!(threshold.op, ">");
                assert_eq!(threshold.value, Some(Value::from(80.0)));
            }
            other => panic!("unexpected detector: {other:?}"),
        }
    }

    #[test]
    fn range_from_up_to_parses_as_between() {
        let spec = parse_prompt(
            "table telemetry column temp timestamp ts in range from 20 up to 40",
            "conn-1",
        )
        .unwrap();
        match &spec.parameters[0].detector {
            Detector::Threshold { threshold } => {
                assert_eq!(threshold.op, "between");
                assert_eq!(threshold.min, Some(20.0));
                assert_eq!(threshold.max, Some(40.0));
            }
            other => panic!("unexpected detector: {other:?}"),
        }
    }

    #[test]
    fn between_to_parses_as_between() {
        let spec = parse_prompt(
            "table telemetry column temp timestamp ts between 20 to 40",
            "conn-1",
        )
        .unwrap();
        match &spec.parameters[0].detector {
            Detector::Threshold { threshold } => {
                assert_eq!(threshold.min, Some(20.0));
                assert_eq!(threshold.max, Some(40.0));
            }
            other => panic!("unexpected detector: {other:?}"),
        }
    }

    #[test]
    fn anomaly_keyword_selects_robust_zscore() {
        let spec = parse_prompt(
            "table telemetry column temp timestamp ts abnormal over 10m",
            "conn-1",
        )
        .unwrap();
        match &spec.parameters[0].detector {
            Detector::RobustZscore { robust_z } => {
                assert_eq!(robust_z.baseline_window_seconds, 3600);
                assert_eq!(robust_z.eval_window_seconds, 600);
                assert_eq!(robust_z.z_warn, 3.0);
                assert_eq!(robust_z.z_crit, 5.0);
                assert_eq!(robust_z.min_samples, 20);
            }
            other => panic!("unexpected detector: {other:?}"),
        }
    }

    #[test]
    fn missing_keyword_selects_missing_data() {
        let spec = parse_prompt(
            "table telemetry column temp timestamp ts missing every 30s",
            "conn-1",
        )
        .unwrap();
        match &spec.parameters[0].detector {
            Detector::MissingData { missing_data } => {
                assert_eq!(missing_data.max_gap_seconds, 60);
            }
            other => panic!("unexpected detector: {other:?}"),
        }
    }

    #[test]
    fn draft_fills_unbound_slots() {
        let draft = RuleDraft {
            table: "telemetry".into(),
            timestamp_column: "ts".into(),
            parameters: vec![DraftParameter {
                parameter_name: "temp".into(),
                value_column: "temp".into(),
                detector: None,
            }],
            where_clause: None,
        };
        let spec = parse_prompt_with_draft("above 80", "conn-1", Some(&draft)).unwrap();
        assert_eq!(spec.source.table, "telemetry");
        assert_eq!(spec.source.timestamp_column, "ts");
        assert_eq!(spec.parameters.len(), 1);
        assert_eq!(spec.parameters[0].value_column, "temp");
        assert_eq!(spec.parameters[0].detector.kind(), "threshold");
    }

    #[test]
    fn parsed_tokens_win_over_draft() {
        let draft = RuleDraft {
            table: "fallback".into(),
            timestamp_column: "created_at".into(),
            ..Default::default()
        };
        let spec = parse_prompt_with_draft(
            "table telemetry column temp timestamp ts below 5",
            "conn-1",
            Some(&draft),
        )
        .unwrap();
        assert_eq!(spec.source.table, "telemetry");
        assert_eq!(spec.source.timestamp_column, "ts");
    }

    #[test]
    fn draft_without_detector_or_condition_is_ambiguous() {
        let draft = RuleDraft {
            table: "telemetry".into(),
            timestamp_column: "ts".into(),
            parameters: vec![DraftParameter {
                parameter_name: "temp".into(),
                value_column: "temp".into(),
                detector: None,
            }],
            where_clause: None,
        };
        let err = parse_prompt_with_draft("watch closely", "conn-1", Some(&draft)).unwrap_err();
        assert!(err.details.iter().any(|d| d.field.contains("detector")));
    }

    #[test]
    fn where_and_clauses_accumulate() {
        let spec = parse_prompt(
            "table telemetry column temp timestamp ts above 80 where line = 3 and status = 'ok'",
            "conn-1",
        )
        .unwrap();
        let where_clause = spec.source.where_clause.unwrap();
        assert_eq!(where_clause.joiner, "and");
        assert_eq!(where_clause.clauses.len(), 2);
        assert_eq!(where_clause.clauses[0].column, "line");
        assert_eq!(where_clause.clauses[0].op, "==");
        assert_eq!(where_clause.clauses[0].value, Value::from(3.0));
        assert_eq!(where_clause.clauses[1].value, Value::String("ok".into()));
    }

    #[test]
    fn minutes_does_not_imply_min_aggregation() {
        let spec = parse_prompt(
            "table telemetry column temp timestamp ts above 80 every 10 minutes",
            "conn-1",
        )
        .unwrap();
        assert_eq!(spec.aggregation, "latest");
        assert_eq!(spec.poll_interval_seconds, 600);
    }

    #[test]
    fn average_keyword_sets_aggregation() {
        let spec = parse_prompt(
            "table telemetry column temp timestamp ts average above 80 last 5m",
            "conn-1",
        )
        .unwrap();
        assert_eq!(spec.aggregation, "avg");
        assert_eq!(spec.window_seconds, Some(300));
    }

    #[test]
    fn interval_without_amount_defaults_to_one_unit() {
        let spec = parse_prompt(
            "table telemetry column temp timestamp ts above 80 every minute",
            "conn-1",
        )
        .unwrap();
        assert_eq!(spec.poll_interval_seconds, 60);
    }
}
