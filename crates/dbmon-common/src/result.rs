use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Alert severity. `medium` is only produced by the robust z-score warn
/// band; every other detector fires at `high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Detector evaluation outcome.
///
/// `InsufficientData` and `InvalidConfig` never set `hit` and never carry
/// violations; they are detector-local conditions, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectorStatus {
    Ok,
    Violation,
    InsufficientData,
    InvalidConfig,
}

impl std::fmt::Display for DetectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorStatus::Ok => write!(f, "OK"),
            DetectorStatus::Violation => write!(f, "VIOLATION"),
            DetectorStatus::InsufficientData => write!(f, "INSUFFICIENT_DATA"),
            DetectorStatus::InvalidConfig => write!(f, "INVALID_CONFIG"),
        }
    }
}

/// One limit breach inside a detector evaluation. Serialized into alert
/// metadata and the preview response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub value: f64,
    pub reason: String,
    pub limit_name: String,
    pub limit_value: f64,
    pub delta: f64,
}

/// Common output of every detector kernel function.
#[derive(Debug, Clone)]
pub struct DetectorResult {
    pub hit: bool,
    pub status: DetectorStatus,
    pub severity: Option<Severity>,
    pub observed: String,
    pub limit_expr: String,
    pub metadata: Map<String, Value>,
    pub anomaly_score: Option<f64>,
    pub baseline_median: Option<f64>,
    pub baseline_mad: Option<f64>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub baseline_start: Option<DateTime<Utc>>,
    pub baseline_end: Option<DateTime<Utc>>,
    pub violations: Vec<Violation>,
}

impl Default for DetectorResult {
    fn default() -> Self {
        Self {
            hit: false,
            status: DetectorStatus::Ok,
            severity: None,
            observed: String::new(),
            limit_expr: String::new(),
            metadata: Map::new(),
            anomaly_score: None,
            baseline_median: None,
            baseline_mad: None,
            window_start: None,
            window_end: None,
            baseline_start: None,
            baseline_end: None,
            violations: Vec::new(),
        }
    }
}

impl DetectorResult {
    pub fn insufficient_data(message: &str) -> Self {
        let mut result = Self {
            status: DetectorStatus::InsufficientData,
            ..Default::default()
        };
        result
            .metadata
            .insert("error".into(), Value::String(message.to_string()));
        result
    }

    pub fn invalid_config(message: &str) -> Self {
        let mut result = Self {
            status: DetectorStatus::InvalidConfig,
            ..Default::default()
        };
        result
            .metadata
            .insert("error".into(), Value::String(message.to_string()));
        result
    }

    pub fn mark_violation(&mut self) {
        self.hit = true;
        self.status = DetectorStatus::Violation;
    }

    pub fn add_violation(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn insert_meta(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }
}

pub fn status_from_hit(hit: bool) -> DetectorStatus {
    if hit {
        DetectorStatus::Violation
    } else {
        DetectorStatus::Ok
    }
}
