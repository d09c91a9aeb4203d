use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ActiveValue::Set, ColumnTrait, EntityTrait, Order,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::entities::alert::{self, Column, Entity};
use crate::store::Repository;

/// One alert to persist. `observed_value` is stringified because
/// threshold rules can observe non-numeric cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub rule_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub parameter_name: String,
    pub observed_value: String,
    pub limit_expression: String,
    pub detector_type: String,
    pub severity: String,
    pub anomaly_score: Option<f64>,
    pub baseline_median: Option<f64>,
    pub baseline_mad: Option<f64>,
    pub hit: bool,
    pub treated: bool,
    pub metadata: Option<Value>,
}

impl Repository {
    pub async fn create_alert(&self, record: AlertRecord) -> Result<()> {
        let am = alert::ActiveModel {
            id: NotSet,
            rule_id: Set(record.rule_id),
            ts_utc: Set(record.ts_utc.fixed_offset()),
            parameter_name: Set(record.parameter_name),
            observed_value: Set(record.observed_value),
            limit_expression: Set(record.limit_expression),
            detector_type: Set(record.detector_type),
            severity: Set(record.severity),
            anomaly_score: Set(record.anomaly_score),
            baseline_median: Set(record.baseline_median),
            baseline_mad: Set(record.baseline_mad),
            hit: Set(record.hit),
            treated: Set(record.treated),
            metadata: Set(record.metadata),
        };
        am.insert(self.db()).await?;
        Ok(())
    }

    pub async fn get_last_alert_for_key(
        &self,
        rule_id: Uuid,
        parameter_name: &str,
        detector_type: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = Entity::find()
            .filter(Column::RuleId.eq(rule_id))
            .filter(Column::ParameterName.eq(parameter_name))
            .filter(Column::DetectorType.eq(detector_type))
            .order_by(Column::TsUtc, Order::Desc)
            .limit(1)
            .one(self.db())
            .await?;
        Ok(row.map(|r| r.ts_utc.with_timezone(&Utc)))
    }
}
