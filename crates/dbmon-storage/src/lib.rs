//! Persistence layer for rules, alerts, and data-source connections.
//!
//! Backed by SeaORM over Postgres; migrations run automatically on
//! connect. The [`RuleStore`] trait is the seam the scheduler and
//! reconciler consume, so tests can substitute an in-memory store.

pub mod entities;
pub mod store;

pub use store::{AlertRecord, Repository, RuleRow, RuleStore};
