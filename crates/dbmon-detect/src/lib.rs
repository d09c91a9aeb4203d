//! Pure detector kernel.
//!
//! Every function here evaluates an in-memory sample window and returns a
//! [`dbmon_common::DetectorResult`]; no I/O happens in this crate. The
//! scheduler owns fetching, windowing, and persistence, which keeps the
//! whole detector family deterministic under test.

pub mod constants;
pub mod detectors;
pub mod samples;
pub mod stats;


pub use detectors::{
    apply_window_and_baseline, evaluate_condition, evaluate_missing_data, evaluate_range_chart,
    evaluate_robust_z, evaluate_shewhart, evaluate_spec_limit, evaluate_threshold, evaluate_tpa,
    evaluate_trend, to_float,
};
pub use samples::{
    compute_timestamp_continuity, filter_samples_by_range, group_by_subgroup, group_consecutive,
    has_consecutive_timestamps, parse_time_value, subgroup_range, values_of, Sample,
};
