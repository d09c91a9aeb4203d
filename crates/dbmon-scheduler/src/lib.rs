//! The scheduler engine: job registry, sampler, per-parameter evaluation,
//! runtime validation, and the wizard's one-shot preview services.
//!
//! Detectors themselves are pure (`dbmon-detect`); this crate owns all the
//! I/O around them — fetching samples through an adapter, enforcing
//! cooldowns, and persisting alerts.

pub mod cooldown;
pub mod evaluator;
pub mod preview;
pub mod registry;
pub mod samples;
pub mod validate;

#[cfg(test)]
mod tests;

pub use registry::{JobInfo, JobRun, Registry};
pub use validate::runtime_validate_rule;
