use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A persisted rule specification.
///
/// Two shapes are accepted at the JSON boundary: the current
/// multi-parameter form (`parameters` non-empty) and the legacy
/// single-column form (`source.valueColumn` plus a top-level `condition`).
/// [`RuleSpec::normalize`] collapses both into a canonical parameter list;
/// everything downstream of deserialization consumes only that list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub connection_ref: String,
    #[serde(default)]
    pub source: SourceSpec,
    #[serde(default)]
    pub parameter_name: String,
    #[serde(default)]
    pub aggregation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_seconds: Option<i64>,
    #[serde(default)]
    pub condition: ConditionSpec,
    #[serde(default)]
    pub poll_interval_seconds: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<i64>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub value_column: String,
    #[serde(default)]
    pub timestamp_column: String,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<WhereSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhereSpec {
    /// Clause joiner, `"and"` or `"or"`.
    #[serde(rename = "type")]
    pub joiner: String,
    #[serde(default)]
    pub clauses: Vec<ClauseSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClauseSpec {
    pub column: String,
    pub op: String,
    pub value: Value,
}

/// The legacy top-level condition. `op` is one of the comparison
/// operators or `"between"`, in which case `min`/`max` are populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    #[serde(default)]
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    #[serde(default)]
    pub parameter_name: String,
    #[serde(default)]
    pub value_column: String,
    pub detector: Detector,
}

/// Detector selection, tagged by `type` on the wire. Each variant carries
/// its config under the payload key the JSON contract uses
/// (`{"type":"robust_zscore","robustZ":{...}}`); a missing payload
/// deserializes to the variant's defaults so the static validator can
/// report field-level problems instead of a bare parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Detector {
    #[serde(rename = "threshold")]
    Threshold {
        #[serde(default)]
        threshold: ThresholdSpec,
    },
    #[serde(rename = "robust_zscore")]
    RobustZscore {
        #[serde(default, rename = "robustZ")]
        robust_z: RobustZSpec,
    },
    #[serde(rename = "missing_data")]
    MissingData {
        #[serde(default, rename = "missingData")]
        missing_data: MissingDataSpec,
    },
    #[serde(rename = "spec_limit")]
    SpecLimit {
        #[serde(default, rename = "specLimit")]
        spec_limit: SpecLimitSpec,
    },
    #[serde(rename = "shewhart")]
    Shewhart {
        #[serde(default)]
        shewhart: ShewhartSpec,
    },
    #[serde(rename = "range_chart")]
    RangeChart {
        #[serde(default, rename = "rangeChart")]
        range_chart: RangeChartSpec,
    },
    #[serde(rename = "trend")]
    Trend {
        #[serde(default)]
        trend: TrendSpec,
    },
    #[serde(rename = "tpa")]
    Tpa {
        #[serde(default)]
        tpa: TpaSpec,
    },
}

impl Detector {
    /// The wire tag, also used as `detector_type` on alert rows and as the
    /// third component of the cooldown key.
    pub fn kind(&self) -> &'static str {
        match self {
            Detector::Threshold { .. } => "threshold",
            Detector::RobustZscore { .. } => "robust_zscore",
            Detector::MissingData { .. } => "missing_data",
            Detector::SpecLimit { .. } => "spec_limit",
            Detector::Shewhart { .. } => "shewhart",
            Detector::RangeChart { .. } => "range_chart",
            Detector::Trend { .. } => "trend",
            Detector::Tpa { .. } => "tpa",
        }
    }

    /// Detectors that sample a window of values and therefore require a
    /// numeric value column.
    pub fn is_statistical(&self) -> bool {
        matches!(
            self,
            Detector::RobustZscore { .. }
                | Detector::SpecLimit { .. }
                | Detector::Shewhart { .. }
                | Detector::RangeChart { .. }
                | Detector::Trend { .. }
                | Detector::Tpa { .. }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    #[serde(default)]
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ThresholdSpec {
    pub fn as_condition(&self) -> ConditionSpec {
        ConditionSpec {
            op: self.op.clone(),
            value: self.value.clone(),
            min: self.min,
            max: self.max,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobustZSpec {
    #[serde(default)]
    pub baseline_window_seconds: i64,
    #[serde(default)]
    pub eval_window_seconds: i64,
    #[serde(default)]
    pub z_warn: f64,
    #[serde(default)]
    pub z_crit: f64,
    #[serde(default)]
    pub min_samples: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingDataSpec {
    #[serde(default)]
    pub max_gap_seconds: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecLimitSpec {
    /// `"spec"`, `"control"` or `"both"`; empty means `"spec"`.
    #[serde(default)]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epsilon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_limits: Option<SpecLimitBounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_limits: Option<ControlLimitBounds>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecLimitBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsl: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlLimitBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ucl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lcl: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShewhartSpec {
    #[serde(default)]
    pub baseline: BaselineSpec,
    /// 0 means the default of 3.
    #[serde(default)]
    pub sigma_multiplier: f64,
    #[serde(default)]
    pub min_baseline_n: usize,
    #[serde(default)]
    pub population_sigma: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeChartSpec {
    #[serde(default)]
    pub subgroup_size: usize,
    #[serde(default)]
    pub baseline: BaselineSpec,
    #[serde(default)]
    pub subgrouping: SubgroupingSpec,
    #[serde(default)]
    pub min_baseline_subgroups: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubgroupingSpec {
    /// `"consecutive"` (default) or `"column"`.
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub column: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSpec {
    #[serde(default)]
    pub window_size: usize,
    #[serde(default)]
    pub epsilon: f64,
    #[serde(default)]
    pub require_consecutive_timestamps: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TpaSpec {
    #[serde(default)]
    pub window_n: usize,
    #[serde(default)]
    pub epsilon: f64,
    /// `"timestamp"` (default) or `"index"`.
    #[serde(default)]
    pub regression_time_basis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slope_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_spec_threshold: Option<f64>,
    #[serde(default)]
    pub require_spec_limits: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_limits: Option<SpecLimitBounds>,
}

/// Baseline selection for the SPC detectors: either the last N samples or
/// an explicit RFC3339 time range, never both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_n: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRangeSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRangeSpec {
    pub start: String,
    pub end: String,
}

/// A partially-specified rule coming from the UI wizard. The prompt parser
/// falls back to these fields for anything the prompt text did not bind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub timestamp_column: String,
    #[serde(default)]
    pub parameters: Vec<DraftParameter>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<WhereSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftParameter {
    #[serde(default)]
    pub parameter_name: String,
    #[serde(default)]
    pub value_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector: Option<Detector>,
}

/// Rule lifecycle states as stored in `rules.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    Draft,
    Active,
    Invalid,
    Disabled,
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleStatus::Draft => write!(f, "DRAFT"),
            RuleStatus::Active => write!(f, "ACTIVE"),
            RuleStatus::Invalid => write!(f, "INVALID"),
            RuleStatus::Disabled => write!(f, "DISABLED"),
        }
    }
}

impl std::str::FromStr for RuleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(RuleStatus::Draft),
            "ACTIVE" => Ok(RuleStatus::Active),
            "INVALID" => Ok(RuleStatus::Invalid),
            "DISABLED" => Ok(RuleStatus::Disabled),
            _ => Err(format!("unknown rule status: {s}")),
        }
    }
}

impl RuleSpec {
    /// Canonical parameter list. The legacy single-column shape is expanded
    /// into one threshold parameter; parameter names default to the value
    /// column. An empty result means the spec carries no evaluatable
    /// parameter and fails validation.
    pub fn normalize(&self) -> Vec<ParameterSpec> {
        if !self.parameters.is_empty() {
            return self
                .parameters
                .iter()
                .map(|p| {
                    let mut param = p.clone();
                    if param.parameter_name.is_empty() {
                        param.parameter_name = param.value_column.clone();
                    }
                    param
                })
                .collect();
        }
        if self.source.value_column.is_empty() {
            return Vec::new();
        }
        let name = if self.parameter_name.is_empty() {
            self.source.value_column.clone()
        } else {
            self.parameter_name.clone()
        };
        vec![ParameterSpec {
            parameter_name: name,
            value_column: self.source.value_column.clone(),
            detector: Detector::Threshold {
                threshold: ThresholdSpec {
                    op: self.condition.op.clone(),
                    value: self.condition.value.clone(),
                    min: self.condition.min,
                    max: self.condition.max,
                },
            },
        }]
    }

    /// The legacy empty aggregation is equivalent to `"latest"`.
    pub fn canonical_aggregation(&self) -> &str {
        if self.aggregation.is_empty() {
            "latest"
        } else {
            self.aggregation.as_str()
        }
    }

    /// True when the rule evaluates a windowed aggregate rather than the
    /// latest value.
    pub fn is_aggregate(&self) -> bool {
        self.canonical_aggregation() != "latest" && self.window_seconds.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_shape_normalizes_to_threshold_parameter() {
        let spec = RuleSpec {
            source: SourceSpec {
                table: "telemetry".into(),
                value_column: "temperature".into(),
                timestamp_column: "ts".into(),
                where_clause: None,
            },
            condition: ConditionSpec {
                op: ">".into(),
                value: Some(serde_json::json!(80)),
                ..Default::default()
            },
            poll_interval_seconds: 10,
            ..Default::default()
        };

        let params = spec.normalize();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].parameter_name, "temperature");
        assert_eq!(params[0].value_column, "temperature");
        assert_eq!(params[0].detector.kind(), "threshold");
    }

    #[test]
    fn parameter_names_default_to_value_column() {
        let spec = RuleSpec {
            parameters: vec![ParameterSpec {
                parameter_name: String::new(),
                value_column: "pressure".into(),
                detector: Detector::MissingData {
                    missing_data: MissingDataSpec {
                        max_gap_seconds: 120,
                    },
                },
            }],
            ..Default::default()
        };

        let params = spec.normalize();
        assert_eq!(params[0].parameter_name, "pressure");
    }

    #[test]
    fn empty_spec_normalizes_to_nothing() {
        assert!(RuleSpec::default().normalize().is_empty());
    }

    #[test]
    fn detector_round_trips_with_payload_key() {
        let detector = Detector::RobustZscore {
            robust_z: RobustZSpec {
                baseline_window_seconds: 3600,
                eval_window_seconds: 300,
                z_warn: 3.0,
                z_crit: 5.0,
                min_samples: 20,
            },
        };
        let json = serde_json::to_value(&detector).unwrap();
        assert_eq!(json["type"], "robust_zscore");
        assert_eq!(json["robustZ"]["minSamples"], 20);

        let back: Detector = serde_json::from_value(json).unwrap();
        assert_eq!(back, detector);
    }

    #[test]
    fn detector_payload_defaults_when_missing() {
        let detector: Detector = serde_json::from_str(r#"{"type":"threshold"}"#).unwrap();
        match detector {
            Detector::Threshold { threshold } => assert!(threshold.op.is_empty()),
            other => panic!("unexpected detector: {other:?}"),
        }
    }

    #[test]
    fn empty_aggregation_is_latest() {
        let spec = RuleSpec::default();
        assert_eq!(spec.canonical_aggregation(), "latest");
        assert!(!spec.is_aggregate());

        let agg = RuleSpec {
            aggregation: "avg".into(),
            window_seconds: Some(600),
            ..Default::default()
        };
        assert!(agg.is_aggregate());
    }
}
