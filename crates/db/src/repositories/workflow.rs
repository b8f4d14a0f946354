use std::collections::BTreeSet;
use std::str::FromStr;

use adminos_core::chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use adminos_core::domain::approval::{
    ActorId, ApprovalLevel, ApprovalStatus, ApprovalWorkflow, WorkflowId,
};
use adminos_core::domain::role::Role;

use super::{RepositoryError, WorkflowFilter, WorkflowRepository};
use crate::DbPool;

const WORKFLOW_COLUMNS: &str = "id, request_type, description, amount, requested_by,
     current_approval_level, overall_status, version, created_at, updated_at";

pub struct SqlWorkflowRepository {
    pool: DbPool,
}

impl SqlWorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WorkflowRepository for SqlWorkflowRepository {
    async fn get(&self, id: &WorkflowId) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM approval_workflow WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let workflow = match row {
            Some(row) => Some(hydrate(&mut tx, row).await?),
            None => None,
        };
        tx.commit().await?;
        Ok(workflow)
    }

    /// The version-checked write runs first so the transaction takes SQLite's
    /// write lock up front; the stored version is only read to classify a miss.
    async fn put(&self, workflow: ApprovalWorkflow) -> Result<ApprovalWorkflow, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut stored = workflow;
        let expected = stored.version;
        let written = if expected == 0 {
            stored.version = 1;
            insert_workflow(&mut tx, &stored).await?
        } else {
            stored.version = expected + 1;
            update_workflow(&mut tx, &stored, expected).await?
        };

        if !written {
            let actual = stored_version(&mut tx, &stored.id).await?;
            tx.rollback().await?;
            return Err(match actual {
                Some(_) if expected == 0 => RepositoryError::AlreadyExists(stored.id),
                Some(actual) => {
                    RepositoryError::StaleWrite { workflow_id: stored.id, expected, actual }
                }
                None => RepositoryError::NotFound(stored.id),
            });
        }

        tx.commit().await?;

        tracing::debug!(
            event_name = "db.workflow.put",
            workflow_id = %stored.id,
            version = stored.version,
            overall_status = stored.overall_status.as_str(),
            "workflow stored"
        );

        Ok(stored)
    }

    async fn list(&self, filter: &WorkflowFilter) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        let status = filter.status.map(|status| status.as_str());
        let involving = filter.involving_actor_id.as_ref().map(|actor| actor.0.as_str());
        let awaiting = filter.awaiting_actor_id.as_ref().map(|actor| actor.0.as_str());
        let limit = filter.limit.map(i64::from).unwrap_or(-1);

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS}
             FROM approval_workflow w
             WHERE (? IS NULL OR w.overall_status = ?)
               AND (? IS NULL OR w.request_type = ?)
               AND (? IS NULL
                    OR w.requested_by = ?
                    OR EXISTS (SELECT 1 FROM approval_level_approver a
                               WHERE a.workflow_id = w.id AND a.approver_id = ?)
                    OR EXISTS (SELECT 1 FROM approval_level l
                               WHERE l.workflow_id = w.id AND l.acted_by = ?))
               AND (? IS NULL
                    OR (w.overall_status = 'pending'
                        AND EXISTS (SELECT 1 FROM approval_level_approver a
                                    WHERE a.workflow_id = w.id
                                      AND a.level_index = w.current_approval_level
                                      AND a.approver_id = ?)))
             ORDER BY w.created_at DESC, w.id ASC
             LIMIT ?"
        ))
        .bind(status)
        .bind(status)
        .bind(filter.request_type.as_deref())
        .bind(filter.request_type.as_deref())
        .bind(involving)
        .bind(involving)
        .bind(involving)
        .bind(involving)
        .bind(awaiting)
        .bind(awaiting)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in rows {
            workflows.push(hydrate(&mut tx, row).await?);
        }
        tx.commit().await?;
        Ok(workflows)
    }
}

/// Workflow, level and approver rows are read on the caller's transaction so a
/// concurrent `put` cannot interleave between them.
async fn hydrate(
    tx: &mut Transaction<'_, Sqlite>,
    row: SqliteRow,
) -> Result<ApprovalWorkflow, RepositoryError> {
    let mut workflow = workflow_from_row(&row)?;
    workflow.approval_chain = load_chain(tx, &workflow.id.0).await?;
    workflow.check_invariants().map_err(|error| RepositoryError::Decode(error.to_string()))?;
    Ok(workflow)
}

async fn load_chain(
    tx: &mut Transaction<'_, Sqlite>,
    workflow_id: &str,
) -> Result<Vec<ApprovalLevel>, RepositoryError> {
    let level_rows = sqlx::query(
        "SELECT level_index, role, status, acted_by, acted_at, comments
         FROM approval_level
         WHERE workflow_id = ?
         ORDER BY level_index ASC",
    )
    .bind(workflow_id)
    .fetch_all(&mut **tx)
    .await?;

    let approver_rows = sqlx::query(
        "SELECT level_index, approver_id
         FROM approval_level_approver
         WHERE workflow_id = ?
         ORDER BY level_index ASC, approver_id ASC",
    )
    .bind(workflow_id)
    .fetch_all(&mut **tx)
    .await?;

    let mut chain = level_rows.into_iter().map(level_from_row).collect::<Result<Vec<_>, _>>()?;
    for row in approver_rows {
        let index = parse_index("level_index", row.try_get("level_index")?)?;
        let approver: String = row.try_get("approver_id")?;
        let level = chain.get_mut(index).ok_or_else(|| {
            RepositoryError::Decode(format!(
                "approver `{approver}` references missing level {index} of workflow `{workflow_id}`"
            ))
        })?;
        level.approver_ids.insert(ActorId(approver));
    }

    Ok(chain)
}

async fn stored_version(
    tx: &mut Transaction<'_, Sqlite>,
    id: &WorkflowId,
) -> Result<Option<u32>, RepositoryError> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM approval_workflow WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&mut **tx)
            .await?;
    version.map(|version| parse_u32("version", version)).transpose()
}

/// Returns `false` when a workflow with the same id already exists.
async fn insert_workflow(
    tx: &mut Transaction<'_, Sqlite>,
    workflow: &ApprovalWorkflow,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO approval_workflow (id, request_type, description, amount, requested_by,
                                        current_approval_level, overall_status, version,
                                        created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(&workflow.id.0)
    .bind(&workflow.request_type)
    .bind(&workflow.description)
    .bind(workflow.amount.map(|amount| amount.to_string()))
    .bind(&workflow.requested_by.0)
    .bind(cursor_to_i64(workflow.current_approval_level)?)
    .bind(workflow.overall_status.as_str())
    .bind(i64::from(workflow.version))
    .bind(workflow.created_at.to_rfc3339())
    .bind(workflow.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    for (index, level) in workflow.approval_chain.iter().enumerate() {
        let level_index = cursor_to_i64(index)?;
        sqlx::query(
            "INSERT INTO approval_level (workflow_id, level_index, role, status, acted_by,
                                         acted_at, comments)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&workflow.id.0)
        .bind(level_index)
        .bind(level.role.as_str())
        .bind(level.status.as_str())
        .bind(level.acted_by.as_ref().map(|actor| actor.0.as_str()))
        .bind(level.acted_at.map(|at| at.to_rfc3339()))
        .bind(level.comments.as_deref())
        .execute(&mut **tx)
        .await?;

        for approver in &level.approver_ids {
            sqlx::query(
                "INSERT INTO approval_level_approver (workflow_id, level_index, approver_id)
                 VALUES (?, ?, ?)",
            )
            .bind(&workflow.id.0)
            .bind(level_index)
            .bind(&approver.0)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(true)
}

/// The chain shape is fixed at creation, so only decision columns are rewritten.
/// Returns `false` when no row carries `expected_version`.
async fn update_workflow(
    tx: &mut Transaction<'_, Sqlite>,
    workflow: &ApprovalWorkflow,
    expected_version: u32,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_workflow
         SET description = ?,
             amount = ?,
             current_approval_level = ?,
             overall_status = ?,
             version = version + 1,
             updated_at = ?
         WHERE id = ? AND version = ?",
    )
    .bind(&workflow.description)
    .bind(workflow.amount.map(|amount| amount.to_string()))
    .bind(cursor_to_i64(workflow.current_approval_level)?)
    .bind(workflow.overall_status.as_str())
    .bind(workflow.updated_at.to_rfc3339())
    .bind(&workflow.id.0)
    .bind(i64::from(expected_version))
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    for (index, level) in workflow.approval_chain.iter().enumerate() {
        sqlx::query(
            "UPDATE approval_level
             SET status = ?, acted_by = ?, acted_at = ?, comments = ?
             WHERE workflow_id = ? AND level_index = ?",
        )
        .bind(level.status.as_str())
        .bind(level.acted_by.as_ref().map(|actor| actor.0.as_str()))
        .bind(level.acted_at.map(|at| at.to_rfc3339()))
        .bind(level.comments.as_deref())
        .bind(&workflow.id.0)
        .bind(cursor_to_i64(index)?)
        .execute(&mut **tx)
        .await?;
    }

    Ok(true)
}

fn workflow_from_row(row: &SqliteRow) -> Result<ApprovalWorkflow, RepositoryError> {
    let status_raw = row.try_get::<String, _>("overall_status")?;
    let overall_status = ApprovalStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown workflow status `{status_raw}`")))?;

    let amount = row
        .try_get::<Option<String>, _>("amount")?
        .map(|raw| {
            Decimal::from_str(&raw)
                .map_err(|error| RepositoryError::Decode(format!("invalid amount `{raw}` ({error})")))
        })
        .transpose()?;

    Ok(ApprovalWorkflow {
        id: WorkflowId(row.try_get("id")?),
        request_type: row.try_get("request_type")?,
        description: row.try_get("description")?,
        amount,
        requested_by: ActorId(row.try_get("requested_by")?),
        approval_chain: Vec::new(),
        current_approval_level: parse_index(
            "current_approval_level",
            row.try_get("current_approval_level")?,
        )?,
        overall_status,
        version: parse_u32("version", row.try_get("version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn level_from_row(row: SqliteRow) -> Result<ApprovalLevel, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown role `{role_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = ApprovalStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown level status `{status_raw}`")))?;

    Ok(ApprovalLevel {
        role,
        approver_ids: BTreeSet::new(),
        status,
        acted_by: row.try_get::<Option<String>, _>("acted_by")?.map(ActorId),
        acted_at: parse_optional_timestamp("acted_at", row.try_get("acted_at")?)?,
        comments: row.try_get("comments")?,
    })
}

fn cursor_to_i64(value: usize) -> Result<i64, RepositoryError> {
    i64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("level index {value} does not fit in i64")))
}

fn parse_index(column: &str, value: i64) -> Result<usize, RepositoryError> {
    usize::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative index): {value}"
        ))
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
