//! The dbmon worker binary: reconciles persisted rules into scheduled
//! jobs, listens for rule events on the bus, and serves the small admin
//! API the operators and the wizard talk to.

pub mod api;
pub mod bus;
pub mod config;
pub mod reconcile;
pub mod state;
