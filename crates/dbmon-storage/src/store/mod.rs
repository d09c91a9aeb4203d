mod alert;
mod connection;
mod rule;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbmon_common::RuleStatus;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::Value;
use uuid::Uuid;

pub use alert::AlertRecord;
pub use rule::RuleRow;

/// Unified access to the control database.
///
/// Migrations run on connect so the schema is always current before the
/// reconciler touches it.
pub struct Repository {
    db: DatabaseConnection,
}

impl Repository {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = Database::connect(database_url).await?;
        Migrator::up(&db, None).await?;
        tracing::info!("Connected to control database");
        Ok(Self { db })
    }

    /// Wrap an existing connection; used by tests with a mock database.
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// The persistence operations the scheduler, reconciler, and admin API
/// depend on. `Repository` is the Postgres implementation; tests provide
/// in-memory stand-ins.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_enabled_rules(&self) -> Result<Vec<RuleRow>>;

    async fn get_rule(&self, id: Uuid) -> Result<Option<RuleRow>>;

    async fn get_connection_type(&self, id: Uuid) -> Result<Option<String>>;

    async fn update_rule_status(
        &self,
        id: Uuid,
        status: RuleStatus,
        last_error: Option<Value>,
    ) -> Result<()>;

    async fn create_alert(&self, alert: AlertRecord) -> Result<()>;

    /// Timestamp of the most recent alert for a cooldown key.
    async fn get_last_alert_for_key(
        &self,
        rule_id: Uuid,
        parameter_name: &str,
        detector_type: &str,
    ) -> Result<Option<DateTime<Utc>>>;
}
