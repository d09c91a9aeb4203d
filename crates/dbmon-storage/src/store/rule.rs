use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::entities::rule::{self, Column, Entity};
use crate::store::Repository;
use dbmon_common::RuleStatus;

/// A row from the `rules` table. `rule_json` holds the serialized
/// `RuleSpec`; the scheduler's copy of it is derived and
/// non-authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRow {
    pub id: Uuid,
    pub connection_ref: Uuid,
    pub rule_json: Value,
    pub enabled: bool,
    pub status: String,
    pub last_error: Option<Value>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

fn to_row(m: rule::Model) -> RuleRow {
    RuleRow {
        id: m.id,
        connection_ref: m.connection_ref,
        rule_json: m.rule_json,
        enabled: m.enabled,
        status: m.status,
        last_error: m.last_error,
        last_validated_at: m.last_validated_at.map(|ts| ts.with_timezone(&Utc)),
    }
}

impl Repository {
    pub async fn list_enabled_rules(&self) -> Result<Vec<RuleRow>> {
        let rows = Entity::find()
            .filter(Column::Enabled.eq(true))
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn get_rule(&self, id: Uuid) -> Result<Option<RuleRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_row))
    }

    pub async fn update_rule_status(
        &self,
        id: Uuid,
        status: RuleStatus,
        last_error: Option<Value>,
    ) -> Result<()> {
        let now = Utc::now().fixed_offset();
        let am = rule::ActiveModel {
            id: Set(id),
            status: Set(status.to_string()),
            last_error: Set(last_error),
            last_validated_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        };
        am.update(self.db()).await?;
        Ok(())
    }
}
