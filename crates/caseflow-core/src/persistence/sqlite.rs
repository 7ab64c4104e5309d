// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use caseflow_model::{CaseDefinition, PlanItemKind};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::agenda::AgendaOperation;
use crate::config::Config;
use crate::error::CoreError;
use crate::migrations;
use crate::state::PlanItemInstanceState;

use super::{
    AgendaOperationRecord, CaseChangeSet, CaseInstanceRecord, Persistence,
    PlanItemInstanceRecord, TaskRecord,
};

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    ///
    /// The pool must already be migrated, see [`crate::migrations::run_sqlite`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates missing parent directories and the database file, then runs
    /// all migrations.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let persistence = SqlitePersistence::from_path(".data/caseflow.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url, 5, true).await
    }

    /// Connect using a loaded [`Config`].
    pub async fn from_config(config: &Config) -> Result<Self, CoreError> {
        Self::connect(
            &config.database_url,
            config.max_connections,
            config.run_migrations,
        )
        .await
    }

    async fn connect(
        url: &str,
        max_connections: u32,
        run_migrations: bool,
    ) -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        if run_migrations {
            migrations::run_sqlite(&pool)
                .await
                .map_err(|e| CoreError::DatabaseError {
                    operation: "migrate".to_string(),
                    details: format!("Failed to run migrations: {}", e),
                })?;
        }

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_error(details: impl Into<String>) -> CoreError {
    CoreError::DatabaseError {
        operation: "decode".to_string(),
        details: details.into(),
    }
}

fn parse_variables(raw: &str) -> Result<Map<String, Value>, CoreError> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(decode_error(format!(
            "case variables must be a JSON object, got {}",
            other
        ))),
    }
}

#[derive(sqlx::FromRow)]
struct CaseInstanceRow {
    id: String,
    case_definition_id: String,
    tenant_id: String,
    name: Option<String>,
    state: String,
    variables: String,
    callback_id: Option<String>,
    callback_type: Option<String>,
    plan_model_instance_id: String,
    start_time: DateTime<Utc>,
    revision: i64,
}

impl TryFrom<CaseInstanceRow> for CaseInstanceRecord {
    type Error = CoreError;

    fn try_from(row: CaseInstanceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            variables: parse_variables(&row.variables)?,
            id: row.id,
            case_definition_id: row.case_definition_id,
            tenant_id: row.tenant_id,
            name: row.name,
            state: row.state,
            callback_id: row.callback_id,
            callback_type: row.callback_type,
            plan_model_instance_id: row.plan_model_instance_id,
            start_time: row.start_time,
            revision: row.revision,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PlanItemInstanceRow {
    id: String,
    case_definition_id: String,
    case_instance_id: String,
    tenant_id: String,
    element_id: String,
    plan_item_definition_id: String,
    plan_item_definition_type: String,
    name: Option<String>,
    state: String,
    stage_instance_id: Option<String>,
    is_stage: bool,
    create_time: DateTime<Utc>,
    last_available_time: Option<DateTime<Utc>>,
    start_time: Option<DateTime<Utc>>,
    ended_time: Option<DateTime<Utc>>,
    terminated_time: Option<DateTime<Utc>>,
    revision: i64,
}

impl TryFrom<PlanItemInstanceRow> for PlanItemInstanceRecord {
    type Error = CoreError;

    fn try_from(row: PlanItemInstanceRow) -> Result<Self, Self::Error> {
        let kind: PlanItemKind = row.plan_item_definition_type.parse().map_err(|_| {
            decode_error(format!(
                "unknown plan item definition type '{}'",
                row.plan_item_definition_type
            ))
        })?;

        Ok(Self {
            id: row.id,
            case_definition_id: row.case_definition_id,
            case_instance_id: row.case_instance_id,
            tenant_id: row.tenant_id,
            element_id: row.element_id,
            plan_item_definition_id: row.plan_item_definition_id,
            plan_item_definition_type: kind,
            name: row.name,
            state: PlanItemInstanceState::parse(&row.state)?,
            stage_instance_id: row.stage_instance_id,
            is_stage: row.is_stage,
            create_time: row.create_time,
            last_available_time: row.last_available_time,
            start_time: row.start_time,
            ended_time: row.ended_time,
            terminated_time: row.terminated_time,
            revision: row.revision,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    case_instance_id: String,
    plan_item_instance_id: String,
    name: Option<String>,
    assignee: Option<String>,
    create_time: DateTime<Utc>,
    delete_reason: Option<String>,
    delete_time: Option<DateTime<Utc>>,
}

impl From<TaskRow> for TaskRecord {
    fn from(row: TaskRow) -> Self {
        Self {
            id: row.id,
            case_instance_id: row.case_instance_id,
            plan_item_instance_id: row.plan_item_instance_id,
            name: row.name,
            assignee: row.assignee,
            create_time: row.create_time,
            delete_reason: row.delete_reason,
            delete_time: row.delete_time,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AgendaOperationRow {
    sequence: i64,
    case_instance_id: String,
    payload: String,
    created_at: DateTime<Utc>,
}

const PLAN_ITEM_INSTANCE_COLUMNS: &str = r#"
    id, case_definition_id, case_instance_id, tenant_id, element_id,
    plan_item_definition_id, plan_item_definition_type, name, state,
    stage_instance_id, is_stage, create_time, last_available_time,
    start_time, ended_time, terminated_time, revision
"#;

const TASK_COLUMNS: &str = r#"
    id, case_instance_id, plan_item_instance_id, name, assignee,
    create_time, delete_reason, delete_time
"#;

async fn insert_case_instance_in(
    tx: &mut Transaction<'_, Sqlite>,
    case_instance: &CaseInstanceRecord,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO case_instances (
            id, case_definition_id, tenant_id, name, state, variables,
            callback_id, callback_type, plan_model_instance_id, start_time, revision
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&case_instance.id)
    .bind(&case_instance.case_definition_id)
    .bind(&case_instance.tenant_id)
    .bind(&case_instance.name)
    .bind(&case_instance.state)
    .bind(serde_json::to_string(&case_instance.variables)?)
    .bind(&case_instance.callback_id)
    .bind(&case_instance.callback_type)
    .bind(&case_instance.plan_model_instance_id)
    .bind(case_instance.start_time)
    .bind(case_instance.revision)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_plan_item_instance_in(
    tx: &mut Transaction<'_, Sqlite>,
    pii: &PlanItemInstanceRecord,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO plan_item_instances (
            id, case_definition_id, case_instance_id, tenant_id, element_id,
            plan_item_definition_id, plan_item_definition_type, name, state,
            stage_instance_id, is_stage, create_time, last_available_time,
            start_time, ended_time, terminated_time, revision
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&pii.id)
    .bind(&pii.case_definition_id)
    .bind(&pii.case_instance_id)
    .bind(&pii.tenant_id)
    .bind(&pii.element_id)
    .bind(&pii.plan_item_definition_id)
    .bind(pii.plan_item_definition_type.as_ref())
    .bind(&pii.name)
    .bind(pii.state.as_str())
    .bind(&pii.stage_instance_id)
    .bind(pii.is_stage)
    .bind(pii.create_time)
    .bind(pii.last_available_time)
    .bind(pii.start_time)
    .bind(pii.ended_time)
    .bind(pii.terminated_time)
    .bind(pii.revision)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_task_in(tx: &mut Transaction<'_, Sqlite>, task: &TaskRecord) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO tasks (
            id, case_instance_id, plan_item_instance_id, name, assignee,
            create_time, delete_reason, delete_time
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&task.id)
    .bind(&task.case_instance_id)
    .bind(&task.plan_item_instance_id)
    .bind(&task.name)
    .bind(&task.assignee)
    .bind(task.create_time)
    .bind(&task.delete_reason)
    .bind(task.delete_time)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn save_case_definition(&self, definition: &CaseDefinition) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO case_definitions (id, definition_key, version, tenant_id, definition, deployed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                definition_key = excluded.definition_key,
                version = excluded.version,
                tenant_id = excluded.tenant_id,
                definition = excluded.definition,
                deployed_at = excluded.deployed_at
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.key)
        .bind(definition.version)
        .bind(definition.tenant_id.as_deref().unwrap_or_default())
        .bind(serde_json::to_string(definition)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_case_definition(
        &self,
        case_definition_id: &str,
    ) -> Result<Option<CaseDefinition>, CoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT definition FROM case_definitions WHERE id = ?")
                .bind(case_definition_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(json,)| serde_json::from_str(&json).map_err(CoreError::from))
            .transpose()
    }

    async fn insert_case_instance(
        &self,
        case_instance: &CaseInstanceRecord,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;
        insert_case_instance_in(&mut tx, case_instance).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_case_instance(
        &self,
        case_instance_id: &str,
    ) -> Result<Option<CaseInstanceRecord>, CoreError> {
        let row = sqlx::query_as::<_, CaseInstanceRow>(
            r#"
            SELECT id, case_definition_id, tenant_id, name, state, variables,
                   callback_id, callback_type, plan_model_instance_id, start_time, revision
            FROM case_instances
            WHERE id = ?
            "#,
        )
        .bind(case_instance_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CaseInstanceRecord::try_from).transpose()
    }

    async fn insert_plan_item_instance(
        &self,
        plan_item_instance: &PlanItemInstanceRecord,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;
        insert_plan_item_instance_in(&mut tx, plan_item_instance).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_plan_item_instance(
        &self,
        plan_item_instance_id: &str,
    ) -> Result<Option<PlanItemInstanceRecord>, CoreError> {
        let sql = format!(
            "SELECT {} FROM plan_item_instances WHERE id = ?",
            PLAN_ITEM_INSTANCE_COLUMNS
        );
        let row = sqlx::query_as::<_, PlanItemInstanceRow>(&sql)
            .bind(plan_item_instance_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(PlanItemInstanceRecord::try_from).transpose()
    }

    async fn list_plan_item_instances(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<PlanItemInstanceRecord>, CoreError> {
        let sql = format!(
            "SELECT {} FROM plan_item_instances WHERE case_instance_id = ? ORDER BY rowid",
            PLAN_ITEM_INSTANCE_COLUMNS
        );
        let rows = sqlx::query_as::<_, PlanItemInstanceRow>(&sql)
            .bind(case_instance_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(PlanItemInstanceRecord::try_from)
            .collect()
    }

    async fn insert_task(&self, task: &TaskRecord) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;
        insert_task_in(&mut tx, task).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_tasks(&self, case_instance_id: &str) -> Result<Vec<TaskRecord>, CoreError> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE case_instance_id = ? ORDER BY rowid",
            TASK_COLUMNS
        );
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(case_instance_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(TaskRecord::from).collect())
    }

    async fn list_tasks_for_plan_item_instance(
        &self,
        plan_item_instance_id: &str,
    ) -> Result<Vec<TaskRecord>, CoreError> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE plan_item_instance_id = ? ORDER BY rowid",
            TASK_COLUMNS
        );
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(plan_item_instance_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(TaskRecord::from).collect())
    }

    async fn list_agenda_operations(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<AgendaOperationRecord>, CoreError> {
        let rows = sqlx::query_as::<_, AgendaOperationRow>(
            r#"
            SELECT sequence, case_instance_id, payload, created_at
            FROM agenda_operations
            WHERE case_instance_id = ?
            ORDER BY sequence
            "#,
        )
        .bind(case_instance_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let operation: AgendaOperation = serde_json::from_str(&row.payload)?;
                Ok(AgendaOperationRecord {
                    sequence: row.sequence,
                    case_instance_id: row.case_instance_id,
                    operation,
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    async fn commit_case_changes(&self, changes: &CaseChangeSet) -> Result<(), CoreError> {
        let case_instance = &changes.case_instance;
        let conflict = || CoreError::ConcurrentModification {
            case_instance_id: case_instance.id.clone(),
        };

        // Dropping the transaction on any early return rolls it back.
        let mut tx = self.pool.begin().await?;

        if changes.is_new_case {
            insert_case_instance_in(&mut tx, case_instance).await?;
        } else {
            let result = sqlx::query(
                r#"
                UPDATE case_instances
                SET name = ?, state = ?, variables = ?, revision = revision + 1
                WHERE id = ? AND revision = ?
                "#,
            )
            .bind(&case_instance.name)
            .bind(&case_instance.state)
            .bind(serde_json::to_string(&case_instance.variables)?)
            .bind(&case_instance.id)
            .bind(case_instance.revision)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(conflict());
            }
        }

        for pii in &changes.created_plan_item_instances {
            insert_plan_item_instance_in(&mut tx, pii).await?;
        }

        for pii in &changes.updated_plan_item_instances {
            let result = sqlx::query(
                r#"
                UPDATE plan_item_instances
                SET state = ?, stage_instance_id = ?, last_available_time = ?,
                    start_time = ?, ended_time = ?, terminated_time = ?,
                    revision = revision + 1
                WHERE id = ? AND revision = ?
                "#,
            )
            .bind(pii.state.as_str())
            .bind(&pii.stage_instance_id)
            .bind(pii.last_available_time)
            .bind(pii.start_time)
            .bind(pii.ended_time)
            .bind(pii.terminated_time)
            .bind(&pii.id)
            .bind(pii.revision)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(conflict());
            }
        }

        for task in &changes.updated_tasks {
            sqlx::query(
                r#"
                UPDATE tasks
                SET assignee = ?, delete_reason = ?, delete_time = ?
                WHERE id = ?
                "#,
            )
            .bind(&task.assignee)
            .bind(&task.delete_reason)
            .bind(task.delete_time)
            .bind(&task.id)
            .execute(&mut *tx)
            .await?;
        }

        for operation in &changes.agenda {
            sqlx::query(
                r#"
                INSERT INTO agenda_operations (case_instance_id, operation, plan_item_instance_id, payload, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&case_instance.id)
            .bind(operation.kind())
            .bind(operation.plan_item_instance_id())
            .bind(serde_json::to_string(operation)?)
            .bind(changes.committed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            case_instance_id = %case_instance.id,
            created = changes.created_plan_item_instances.len(),
            updated = changes.updated_plan_item_instances.len(),
            tasks = changes.updated_tasks.len(),
            agenda = changes.agenda.len(),
            "Committed case changes"
        );

        Ok(())
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let result: Result<(i64,), _> = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await;
        Ok(result.is_ok())
    }
}
