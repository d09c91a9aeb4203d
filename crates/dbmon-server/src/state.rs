use dbmon_adapter::AdapterRegistry;
use dbmon_common::{Allowlist, Limits};
use dbmon_scheduler::Registry;
use dbmon_storage::RuleStore;
use std::sync::Arc;

/// Shared handles for the admin API, the reconciler, and the event
/// subscriber.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RuleStore>,
    pub registry: Arc<Registry>,
    pub adapters: Arc<AdapterRegistry>,
    pub allowlist: Arc<Allowlist>,
    pub limits: Limits,
}
