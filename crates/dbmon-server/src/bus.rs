//! Rule-event subscriber.
//!
//! The control plane publishes `{"rule_id": "..."}` on the `rule.*`
//! subjects whenever a rule changes; every event funnels into the same
//! `process_rule` path the startup reconciliation uses. Each handler runs
//! under its own deadline so a stuck adapter cannot back up the
//! subscription.

use crate::reconcile::process_rule;
use crate::state::AppState;
use anyhow::Result;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const RULE_SUBJECTS: [&str; 5] = [
    "rule.created",
    "rule.updated",
    "rule.enabled",
    "rule.disabled",
    "rule.deleted",
];

const EVENT_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RuleEvent {
    rule_id: String,
}

/// Subscribe to all rule subjects; returns one task handle per subject.
pub async fn subscribe_rule_events(
    client: &async_nats::Client,
    state: AppState,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(RULE_SUBJECTS.len());
    for subject in RULE_SUBJECTS {
        let mut subscription = client.subscribe(subject).await?;
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            while let Some(message) = subscription.next().await {
                let event: RuleEvent = match serde_json::from_slice(&message.payload) {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(subject, error = %err, "Malformed rule event payload");
                        continue;
                    }
                };
                let rule_id = match Uuid::parse_str(&event.rule_id) {
                    Ok(rule_id) => rule_id,
                    Err(err) => {
                        tracing::warn!(subject, rule_id = %event.rule_id, error = %err, "Bad rule id in event");
                        continue;
                    }
                };
                match tokio::time::timeout(EVENT_DEADLINE, process_rule(&state, rule_id)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::error!(subject, rule_id = %rule_id, error = %err, "Rule event processing failed");
                    }
                    Err(_) => {
                        tracing::error!(subject, rule_id = %rule_id, "Rule event processing timed out");
                    }
                }
            }
        }));
    }
    tracing::info!(subjects = RULE_SUBJECTS.len(), "Subscribed to rule events");
    Ok(handles)
}
