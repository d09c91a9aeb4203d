//! Rule reconciliation: the single path that turns a persisted rule into
//! a scheduled job (or tears it down).

use crate::state::AppState;
use anyhow::{bail, Result};
use dbmon_common::{RuleSpec, RuleStatus};
use dbmon_scheduler::runtime_validate_rule;
use serde_json::json;
use uuid::Uuid;

/// Load all enabled rules and process each one. Individual failures are
/// logged and recorded on the rule row; they never stop the sweep.
pub async fn reconcile(state: &AppState) -> Result<()> {
    let rules = state.store.list_enabled_rules().await?;
    let total = rules.len();
    for rule in rules {
        if let Err(err) = process_rule(state, rule.id).await {
            tracing::warn!(rule_id = %rule.id, error = %err, "Rule reconciliation failed");
        }
    }
    tracing::info!(total, "Reconciliation finished");
    Ok(())
}

/// Bring one rule's scheduled state in line with its persisted row:
/// disabled rules are unscheduled, malformed or unvalidatable rules go
/// `INVALID`, and everything else goes `ACTIVE` and gets a job.
pub async fn process_rule(state: &AppState, rule_id: Uuid) -> Result<()> {
    let Some(rule) = state.store.get_rule(rule_id).await? else {
        bail!("rule not found");
    };
    if !rule.enabled {
        state.registry.unschedule(rule_id);
        return Ok(());
    }

    let spec: RuleSpec = match serde_json::from_value(rule.rule_json.clone()) {
        Ok(spec) => spec,
        Err(err) => {
            let _ = state
                .store
                .update_rule_status(
                    rule_id,
                    RuleStatus::Invalid,
                    Some(json!({"error": "invalid rule json"})),
                )
                .await;
            state.registry.unschedule(rule_id);
            bail!("invalid rule json: {err}");
        }
    };

    let connection_type = match state.store.get_connection_type(rule.connection_ref).await? {
        Some(connection_type) => connection_type,
        None => {
            return invalidate(state, rule_id, "connection not found").await;
        }
    };
    let adapter = match state.adapters.adapter_for(&connection_type) {
        Ok(adapter) => adapter,
        Err(err) => {
            return invalidate(state, rule_id, &err.to_string()).await;
        }
    };

    if let Err(err) =
        runtime_validate_rule(adapter.as_ref(), &spec, &state.allowlist, &state.limits).await
    {
        return invalidate(state, rule_id, &err.to_string()).await;
    }

    state
        .store
        .update_rule_status(rule_id, RuleStatus::Active, None)
        .await?;
    state.registry.schedule(rule_id, spec, adapter);
    tracing::info!(rule_id = %rule_id, "Rule scheduled");
    Ok(())
}

async fn invalidate(state: &AppState, rule_id: Uuid, message: &str) -> Result<()> {
    let _ = state
        .store
        .update_rule_status(rule_id, RuleStatus::Invalid, Some(json!({"error": message})))
        .await;
    state.registry.unschedule(rule_id);
    bail!("{message}");
}
