use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::EntityTrait;
use serde_json::Value;
use uuid::Uuid;

use crate::entities::db_connection::Entity;
use crate::store::{AlertRecord, Repository, RuleRow, RuleStore};
use dbmon_common::RuleStatus;

impl Repository {
    /// The database type of a stored connection; the core treats the rest
    /// of the row as opaque.
    pub async fn get_connection_type(&self, id: Uuid) -> Result<Option<String>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(|m| m.db_type))
    }
}

#[async_trait]
impl RuleStore for Repository {
    async fn list_enabled_rules(&self) -> Result<Vec<RuleRow>> {
        Repository::list_enabled_rules(self).await
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<RuleRow>> {
        Repository::get_rule(self, id).await
    }

    async fn get_connection_type(&self, id: Uuid) -> Result<Option<String>> {
        Repository::get_connection_type(self, id).await
    }

    async fn update_rule_status(
        &self,
        id: Uuid,
        status: RuleStatus,
        last_error: Option<Value>,
    ) -> Result<()> {
        Repository::update_rule_status(self, id, status, last_error).await
    }

    async fn create_alert(&self, alert: AlertRecord) -> Result<()> {
        Repository::create_alert(self, alert).await
    }

    async fn get_last_alert_for_key(
        &self,
        rule_id: Uuid,
        parameter_name: &str,
        detector_type: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Repository::get_last_alert_for_key(self, rule_id, parameter_name, detector_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{alert, db_connection, rule};
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn rule_model(enabled: bool) -> rule::Model {
        let now = Utc::now().fixed_offset();
        rule::Model {
            id: Uuid::new_v4(),
            connection_ref: Uuid::new_v4(),
            rule_json: serde_json::json!({"pollIntervalSeconds": 30}),
            enabled,
            status: "ACTIVE".into(),
            last_error: None,
            last_validated_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn list_enabled_rules_maps_rows() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![rule_model(true)]])
            .into_connection();
        let repo = Repository::new(db);
        let rows = repo.list_enabled_rules().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].enabled);
        assert_eq!(rows[0].status, "ACTIVE");
    }

    #[tokio::test]
    async fn get_connection_type_returns_dialect() {
        let now = Utc::now().fixed_offset();
        let id = Uuid::new_v4();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![db_connection::Model {
                id,
                db_type: "postgres".into(),
                host: "localhost".into(),
                port: 5432,
                user_name: "ro".into(),
                password_enc: "enc".into(),
                database: "plant".into(),
                created_at: now,
                updated_at: now,
            }]])
            .into_connection();
        let repo = Repository::new(db);
        let db_type = repo.get_connection_type(id).await.unwrap();
        assert_eq!(db_type.as_deref(), Some("postgres"));
    }

    #[tokio::test]
    async fn last_alert_for_key_returns_latest_timestamp() {
        let ts = Utc::now();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![alert::Model {
                id: 7,
                rule_id: Uuid::new_v4(),
                ts_utc: ts.fixed_offset(),
                parameter_name: "temp".into(),
                observed_value: "90".into(),
                limit_expression: "> 80".into(),
                detector_type: "threshold".into(),
                severity: "high".into(),
                anomaly_score: None,
                baseline_median: None,
                baseline_mad: None,
                hit: true,
                treated: false,
                metadata: None,
            }]])
            .into_connection();
        let repo = Repository::new(db);
        let last = repo
            .get_last_alert_for_key(Uuid::new_v4(), "temp", "threshold")
            .await
            .unwrap();
        assert_eq!(last.map(|t| t.timestamp()), Some(ts.timestamp()));
    }
}
