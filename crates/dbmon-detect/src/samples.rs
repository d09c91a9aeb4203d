//! In-memory sample windows: range filtering, subgrouping, and timestamp
//! continuity.

use crate::stats::median;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// One parsed observation: ascending-timestamp order is established by the
/// sampler before any of the functions below run.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub ts: DateTime<Utc>,
    pub value: f64,
    pub subgroup: Option<String>,
}

impl Sample {
    pub fn new(ts: DateTime<Utc>, value: f64) -> Self {
        Self {
            ts,
            value,
            subgroup: None,
        }
    }
}

/// Parse a row cell as an RFC3339/RFC3339Nano timestamp.
pub fn parse_time_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Trim samples to an inclusive `[start, end]` range; `None` bounds are
/// open.
pub fn filter_samples_by_range(
    samples: Vec<Sample>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<Sample> {
    if start.is_none() && end.is_none() {
        return samples;
    }
    samples
        .into_iter()
        .filter(|s| {
            if let Some(start) = start {
                if s.ts < start {
                    return false;
                }
            }
            if let Some(end) = end {
                if s.ts > end {
                    return false;
                }
            }
            true
        })
        .collect()
}

/// Tile left-to-right into non-overlapping groups of exactly `size`,
/// dropping the trailing remainder.
pub fn group_consecutive(samples: &[Sample], size: usize) -> Vec<Vec<Sample>> {
    if size == 0 {
        return Vec::new();
    }
    samples
        .chunks_exact(size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Bucket by subgroup key, iterate keys lexicographically, and take the
/// first `size` samples of each bucket. Buckets with fewer than `size`
/// entries and samples without a subgroup are dropped.
pub fn group_by_subgroup(samples: &[Sample], size: usize) -> Vec<Vec<Sample>> {
    if size == 0 {
        return Vec::new();
    }
    let mut buckets: BTreeMap<&str, Vec<Sample>> = BTreeMap::new();
    for sample in samples {
        let Some(key) = sample.subgroup.as_deref() else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        buckets.entry(key).or_default().push(sample.clone());
    }
    buckets
        .into_values()
        .filter(|bucket| bucket.len() >= size)
        .map(|mut bucket| {
            bucket.truncate(size);
            bucket
        })
        .collect()
}

/// Max minus min of a subgroup's values. Empty groups range to 0.
pub fn subgroup_range(group: &[Sample]) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for sample in group {
        if sample.value < min {
            min = sample.value;
        }
        if sample.value > max {
            max = sample.value;
        }
    }
    if min.is_infinite() || max.is_infinite() {
        return 0.0;
    }
    max - min
}

/// Timestamp continuity: all deltas strictly positive (equal timestamps
/// fail) and no delta larger than twice the median delta.
pub fn has_consecutive_timestamps(samples: &[Sample]) -> bool {
    if samples.len() < 2 {
        return true;
    }
    let mut deltas = Vec::with_capacity(samples.len() - 1);
    for pair in samples.windows(2) {
        let delta = (pair[1].ts - pair[0].ts).num_milliseconds() as f64 / 1000.0;
        if delta <= 0.0 {
            return false;
        }
        deltas.push(delta);
    }
    let med = median(&deltas);
    if med == 0.0 {
        return false;
    }
    deltas.iter().all(|d| *d <= med * 2.0)
}

/// Continuity summary for the wizard baseline check: whether the
/// 2×-median rule fails anywhere, plus the largest observed gap.
pub fn compute_timestamp_continuity(samples: &[Sample]) -> (bool, f64) {
    if samples.len() < 2 {
        return (false, 0.0);
    }
    let largest = samples
        .windows(2)
        .map(|pair| (pair[1].ts - pair[0].ts).num_milliseconds() as f64 / 1000.0)
        .fold(0.0_f64, f64::max);
    (!has_consecutive_timestamps(samples), largest)
}

/// The values of a sample window, in order.
pub fn values_of(samples: &[Sample]) -> Vec<f64> {
    samples.iter().map(|s| s.value).collect()
}
