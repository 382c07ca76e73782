//! Postgres implementation of [`ExecutionDataStore`].
//!
//! All SQL is runtime-checked (sqlx::query, not sqlx::query!) so builds do
//! not need a live database. Each namespace maps to its own table; the
//! unique index on (plan_execution_id, name, level_runtime_id_idx) is what
//! enforces single writes per scope.

use crate::store::{ExecutionDataStore, StoreError, StoreResult};
use crate::types::{Instance, Level, Namespace, Payload};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::QueryAs;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

const COLUMNS: &str = "uuid, plan_execution_id, stage_execution_id, produced_by, name, \
     type_tag, document, value_json, group_name, level_runtime_id_idx, \
     fully_qualified_name, created_at, valid_until";

#[derive(sqlx::FromRow)]
struct InstanceRow {
    uuid: Uuid,
    plan_execution_id: String,
    stage_execution_id: Option<String>,
    produced_by: Json<Level>,
    name: String,
    type_tag: Option<String>,
    document: serde_json::Value,
    value_json: String,
    group_name: Option<String>,
    level_runtime_id_idx: String,
    fully_qualified_name: String,
    created_at: DateTime<Utc>,
    valid_until: DateTime<Utc>,
}

impl From<InstanceRow> for Instance {
    fn from(row: InstanceRow) -> Self {
        Instance {
            uuid: row.uuid,
            plan_execution_id: row.plan_execution_id,
            stage_execution_id: row.stage_execution_id,
            produced_by: row.produced_by.0,
            name: row.name,
            payload: Payload {
                type_tag: row.type_tag,
                document: row.document,
            },
            value_json: row.value_json,
            group_name: row.group_name,
            level_runtime_id_idx: row.level_runtime_id_idx,
            fully_qualified_name: row.fully_qualified_name,
            created_at: row.created_at,
            valid_until: row.valid_until,
        }
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(anyhow!(e))
}

/// Postgres-backed execution data store.
pub struct PgExecutionDataStore {
    pool: PgPool,
}

impl PgExecutionDataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "Connected execution data store");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create both tables and their indexes if missing.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(include_str!("../migrations/0001_execution_data.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_all<'q>(
        &self,
        query: QueryAs<'q, Postgres, InstanceRow, PgArguments>,
    ) -> StoreResult<Vec<Instance>> {
        let rows = query.fetch_all(&self.pool).await.map_err(unavailable)?;
        Ok(rows.into_iter().map(Instance::from).collect())
    }
}

#[async_trait]
impl ExecutionDataStore for PgExecutionDataStore {
    async fn insert(&self, namespace: Namespace, instance: &Instance) -> StoreResult<()> {
        let sql = format!(
            r#"
            INSERT INTO {table} (
                uuid, plan_execution_id, stage_execution_id, produced_by,
                producer_setup_id, producer_runtime_id, name, type_tag, document,
                value_json, group_name, level_runtime_id_idx, fully_qualified_name,
                created_at, valid_until
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
            table = namespace.table_name()
        );
        let result = sqlx::query(&sql)
            .bind(instance.uuid)
            .bind(&instance.plan_execution_id)
            .bind(&instance.stage_execution_id)
            .bind(Json(&instance.produced_by))
            .bind(&instance.produced_by.setup_id)
            .bind(&instance.produced_by.runtime_id)
            .bind(&instance.name)
            .bind(&instance.payload.type_tag)
            .bind(&instance.payload.document)
            .bind(&instance.value_json)
            .bind(&instance.group_name)
            .bind(&instance.level_runtime_id_idx)
            .bind(&instance.fully_qualified_name)
            .bind(instance.created_at)
            .bind(instance.valid_until)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate {
                    namespace,
                    name: instance.name.clone(),
                    level_runtime_id_idx: instance.level_runtime_id_idx.clone(),
                })
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn find_latest_by_producer_setup_id(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        name: &str,
        setup_id: &str,
    ) -> StoreResult<Option<Instance>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM {table}
            WHERE plan_execution_id = $1 AND name = $2 AND producer_setup_id = $3
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
            table = namespace.table_name()
        );
        let rows = self
            .fetch_all(
                sqlx::query_as(&sql)
                    .bind(plan_execution_id)
                    .bind(name)
                    .bind(setup_id),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_by_level_indices(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        name: &str,
        indices: &[String],
    ) -> StoreResult<Vec<Instance>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM {table}
            WHERE plan_execution_id = $1 AND name = $2 AND level_runtime_id_idx = ANY($3)
            ORDER BY created_at DESC, seq DESC
            "#,
            table = namespace.table_name()
        );
        self.fetch_all(
            sqlx::query_as(&sql)
                .bind(plan_execution_id)
                .bind(name)
                .bind(indices.to_vec()),
        )
        .await
    }

    async fn find_latest_by_fqn(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        fully_qualified_name: &str,
    ) -> StoreResult<Option<Instance>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM {table}
            WHERE plan_execution_id = $1 AND fully_qualified_name = $2
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
            table = namespace.table_name()
        );
        let rows = self
            .fetch_all(
                sqlx::query_as(&sql)
                    .bind(plan_execution_id)
                    .bind(fully_qualified_name),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_by_producer_runtime_ids(
        &self,
        namespace: Namespace,
        runtime_ids: &[String],
    ) -> StoreResult<Vec<Instance>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM {table}
            WHERE producer_runtime_id = ANY($1)
            ORDER BY created_at ASC, seq ASC
            "#,
            table = namespace.table_name()
        );
        self.fetch_all(sqlx::query_as(&sql).bind(runtime_ids.to_vec())).await
    }

    async fn find_by_ids(&self, namespace: Namespace, ids: &[Uuid]) -> StoreResult<Vec<Instance>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM {table}
            WHERE uuid = ANY($1)
            ORDER BY created_at DESC, seq DESC
            "#,
            table = namespace.table_name()
        );
        self.fetch_all(sqlx::query_as(&sql).bind(ids.to_vec())).await
    }

    async fn find_by_name_and_producer_setup_ids(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        name: &str,
        setup_ids: &[String],
    ) -> StoreResult<Vec<Instance>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM {table}
            WHERE plan_execution_id = $1 AND name = $2 AND producer_setup_id = ANY($3)
            ORDER BY created_at DESC, seq DESC
            "#,
            table = namespace.table_name()
        );
        self.fetch_all(
            sqlx::query_as(&sql)
                .bind(plan_execution_id)
                .bind(name)
                .bind(setup_ids.to_vec()),
        )
        .await
    }

    async fn delete_by_plan_execution_ids(
        &self,
        namespace: Namespace,
        plan_execution_ids: &[String],
    ) -> StoreResult<u64> {
        let sql = format!(
            "DELETE FROM {table} WHERE plan_execution_id = ANY($1)",
            table = namespace.table_name()
        );
        let result = sqlx::query(&sql)
            .bind(plan_execution_ids.to_vec())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected())
    }

    async fn update_valid_until(
        &self,
        namespace: Namespace,
        plan_execution_id: &str,
        valid_until: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let sql = format!(
            "UPDATE {table} SET valid_until = $2 WHERE plan_execution_id = $1",
            table = namespace.table_name()
        );
        let result = sqlx::query(&sql)
            .bind(plan_execution_id)
            .bind(valid_until)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected())
    }
}
