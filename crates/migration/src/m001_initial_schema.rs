use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS db_connections (
    id UUID PRIMARY KEY,
    type TEXT NOT NULL,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    user_name TEXT NOT NULL,
    password_enc TEXT NOT NULL,
    database TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS rules (
    id UUID PRIMARY KEY,
    connection_ref UUID NOT NULL,
    rule_json JSONB NOT NULL,
    enabled BOOLEAN NOT NULL DEFAULT FALSE,
    status TEXT NOT NULL DEFAULT 'DRAFT',
    last_error JSONB,
    last_validated_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_rules_enabled ON rules(enabled);
CREATE INDEX IF NOT EXISTS idx_rules_status ON rules(status);

CREATE TABLE IF NOT EXISTS alerts (
    id BIGSERIAL PRIMARY KEY,
    rule_id UUID NOT NULL,
    ts_utc TIMESTAMPTZ NOT NULL,
    parameter_name TEXT NOT NULL,
    observed_value TEXT NOT NULL,
    limit_expression TEXT NOT NULL,
    detector_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    anomaly_score DOUBLE PRECISION,
    baseline_median DOUBLE PRECISION,
    baseline_mad DOUBLE PRECISION,
    hit BOOLEAN NOT NULL DEFAULT TRUE,
    treated BOOLEAN NOT NULL DEFAULT FALSE,
    metadata JSONB
);
CREATE INDEX IF NOT EXISTS idx_alerts_rule_ts ON alerts(rule_id, ts_utc DESC);
CREATE INDEX IF NOT EXISTS idx_alerts_cooldown_key
    ON alerts(rule_id, parameter_name, detector_type, ts_utc DESC);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS alerts;
DROP TABLE IF EXISTS rules;
DROP TABLE IF EXISTS db_connections;
";
