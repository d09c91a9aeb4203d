use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub rule_id: Uuid,
    pub ts_utc: DateTimeWithTimeZone,
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
    pub metadata: Option<Json>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
