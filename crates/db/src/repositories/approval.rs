use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use spendgate_core::domain::approval::{
    Approval, ApprovalId, ApprovalPriority, ApprovalStatus, ApprovalType,
};
use spendgate_core::domain::company::{CartId, CompanyId};
use spendgate_core::domain::history::{ApprovalHistory, ApprovalHistoryId};
use spendgate_core::errors::{ApplicationError, DomainError, StoreError};
use spendgate_core::store::{
    ApprovalStore, InsertOutcome, Page, TransitionPlan, TransitionPlanner,
};

use super::{encode_timestamp, parse_optional_timestamp, parse_timestamp, parse_u32};
use super::RepositoryError;
use crate::DbPool;

const APPROVAL_COLUMNS: &str = "id, cart_id, company_id, type, status, created_by, handled_by,
    rejection_reason, approval_comment, handled_at, client_ip_hash, user_agent_hash,
    cart_total_snapshot, priority, approvers_required, escalated, escalated_at, escalated_from,
    escalated_to, idempotency_key, created_at, updated_at";

const HISTORY_COLUMNS: &str = "id, approval_id, previous_status, new_status, actor_id, actor_role,
    actor_ip_hash, actor_user_agent_hash, reason, comment, cart_total_at_action,
    action_timestamp, is_escalation, is_system_action, metadata";

pub struct SqlApprovalStore {
    pool: DbPool,
}

impl SqlApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ApprovalStore for SqlApprovalStore {
    async fn find_approval(&self, id: &ApprovalId) -> Result<Option<Approval>, StoreError> {
        let row = sqlx::query(&format!("SELECT {APPROVAL_COLUMNS} FROM approval WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(approval_from_row).transpose()?)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Approval>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval WHERE idempotency_key = ?"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(approval_from_row).transpose()?)
    }

    async fn insert_pending(
        &self,
        approval: Approval,
        history: ApprovalHistory,
    ) -> Result<InsertOutcome, StoreError> {
        Ok(insert_pending(&self.pool, approval, history).await?)
    }

    async fn apply_transition(
        &self,
        id: &ApprovalId,
        planner: &TransitionPlanner<'_>,
    ) -> Result<TransitionPlan, ApplicationError> {
        let mut tx = self.pool.begin().await.map_err(into_store)?;

        // Taking the write lock first keeps the read-plan-write window exclusive.
        let claimed = sqlx::query(
            "UPDATE approval SET status = status WHERE id = ? AND status = 'pending'",
        )
        .bind(&id.0)
        .execute(&mut *tx)
        .await
        .map_err(into_store)?;

        if claimed.rows_affected() == 0 {
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM approval WHERE id = ?")
                    .bind(&id.0)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(into_store)?;
            return Err(match status {
                None => ApplicationError::not_found("approval", id.0.clone()),
                Some(status) => {
                    ApplicationError::Conflict(format!("approval `{}` is already {status}", id.0))
                }
            });
        }

        let current = fetch_approval(&mut tx, id).await?;
        let history = fetch_history(&mut tx, id).await?;
        let plan = planner(&current, &history)?;
        if &plan.approval.id != id || &plan.history.approval_id != id {
            return Err(DomainError::InvariantViolation(format!(
                "transition plan for `{}` targets another approval",
                id.0
            ))
            .into());
        }

        let updated = update_approval(&mut tx, &plan.approval).await.map_err(StoreError::from)?;
        if updated == 0 {
            return Err(ApplicationError::Conflict(format!(
                "approval `{}` changed while the transition was planned",
                id.0
            )));
        }
        insert_history(&mut tx, &plan.history).await.map_err(StoreError::from)?;
        tx.commit().await.map_err(into_store)?;

        Ok(plan)
    }

    async fn list_pending_for_cart(&self, cart_id: &CartId) -> Result<Vec<Approval>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval
             WHERE cart_id = ? AND status = 'pending'
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&cart_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(approval_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_pending_for_company(
        &self,
        company_id: &CompanyId,
        page: Page,
    ) -> Result<Vec<Approval>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval
             WHERE company_id = ? AND status = 'pending'
             ORDER BY priority DESC, created_at ASC, id ASC
             LIMIT ? OFFSET ?"
        ))
        .bind(&company_id.0)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(approval_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_escalation_candidates(
        &self,
        company_id: &CompanyId,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Approval>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval
             WHERE company_id = ? AND status = 'pending' AND escalated = 0 AND created_at < ?
             ORDER BY created_at ASC, id ASC
             LIMIT ?"
        ))
        .bind(&company_id.0)
        .bind(encode_timestamp(&created_before))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(approval_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_history(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<Vec<ApprovalHistory>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM approval_history WHERE approval_id = ? ORDER BY seq ASC"
        ))
        .bind(&approval_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(history_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

fn into_store(error: sqlx::Error) -> StoreError {
    RepositoryError::from(error).into()
}

async fn insert_pending(
    pool: &DbPool,
    approval: Approval,
    history: ApprovalHistory,
) -> Result<InsertOutcome, RepositoryError> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(&format!(
        "INSERT INTO approval ({APPROVAL_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(idempotency_key) DO NOTHING"
    ))
    .bind(&approval.id.0)
    .bind(&approval.cart_id.0)
    .bind(&approval.company_id.0)
    .bind(approval.approval_type.as_str())
    .bind(approval.status.as_str())
    .bind(&approval.created_by)
    .bind(&approval.handled_by)
    .bind(&approval.rejection_reason)
    .bind(&approval.approval_comment)
    .bind(approval.handled_at.as_ref().map(encode_timestamp))
    .bind(&approval.client_ip_hash)
    .bind(&approval.user_agent_hash)
    .bind(approval.cart_total_snapshot)
    .bind(approval.priority.as_i64())
    .bind(i64::from(approval.approvers_required))
    .bind(approval.escalated)
    .bind(approval.escalated_at.as_ref().map(encode_timestamp))
    .bind(&approval.escalated_from)
    .bind(&approval.escalated_to)
    .bind(&approval.idempotency_key)
    .bind(encode_timestamp(&approval.created_at))
    .bind(encode_timestamp(&approval.updated_at))
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        let Some(key) = approval.idempotency_key.as_deref() else {
            return Err(RepositoryError::Decode(format!(
                "approval `{}` was not inserted",
                approval.id.0
            )));
        };
        let row = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval WHERE idempotency_key = ?"
        ))
        .bind(key)
        .fetch_one(&mut *tx)
        .await?;
        return Ok(InsertOutcome::Existing(approval_from_row(&row)?));
    }

    insert_history(&mut tx, &history).await?;
    tx.commit().await?;

    Ok(InsertOutcome::Inserted(approval))
}

async fn fetch_approval(
    tx: &mut Transaction<'_, Sqlite>,
    id: &ApprovalId,
) -> Result<Approval, StoreError> {
    let row = sqlx::query(&format!("SELECT {APPROVAL_COLUMNS} FROM approval WHERE id = ?"))
        .bind(&id.0)
        .fetch_one(&mut **tx)
        .await
        .map_err(RepositoryError::from)?;
    Ok(approval_from_row(&row)?)
}

async fn fetch_history(
    tx: &mut Transaction<'_, Sqlite>,
    id: &ApprovalId,
) -> Result<Vec<ApprovalHistory>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {HISTORY_COLUMNS} FROM approval_history WHERE approval_id = ? ORDER BY seq ASC"
    ))
    .bind(&id.0)
    .fetch_all(&mut **tx)
    .await
    .map_err(RepositoryError::from)?;
    Ok(rows.iter().map(history_from_row).collect::<Result<Vec<_>, _>>()?)
}

async fn update_approval(
    tx: &mut Transaction<'_, Sqlite>,
    approval: &Approval,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval SET
             status = ?,
             handled_by = ?,
             rejection_reason = ?,
             approval_comment = ?,
             handled_at = ?,
             client_ip_hash = ?,
             user_agent_hash = ?,
             escalated = ?,
             escalated_at = ?,
             escalated_from = ?,
             escalated_to = ?,
             idempotency_key = ?,
             updated_at = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(approval.status.as_str())
    .bind(&approval.handled_by)
    .bind(&approval.rejection_reason)
    .bind(&approval.approval_comment)
    .bind(approval.handled_at.as_ref().map(encode_timestamp))
    .bind(&approval.client_ip_hash)
    .bind(&approval.user_agent_hash)
    .bind(approval.escalated)
    .bind(approval.escalated_at.as_ref().map(encode_timestamp))
    .bind(&approval.escalated_from)
    .bind(&approval.escalated_to)
    .bind(&approval.idempotency_key)
    .bind(encode_timestamp(&approval.updated_at))
    .bind(&approval.id.0)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

async fn insert_history(
    tx: &mut Transaction<'_, Sqlite>,
    history: &ApprovalHistory,
) -> Result<(), RepositoryError> {
    let metadata_json = serde_json::to_string(&history.metadata)
        .map_err(|error| RepositoryError::Decode(format!("history metadata: {error}")))?;

    sqlx::query(&format!(
        "INSERT INTO approval_history ({HISTORY_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&history.id.0)
    .bind(&history.approval_id.0)
    .bind(history.previous_status.map(|status| status.as_str()))
    .bind(history.new_status.as_str())
    .bind(&history.actor_id)
    .bind(&history.actor_role)
    .bind(&history.actor_ip_hash)
    .bind(&history.actor_user_agent_hash)
    .bind(&history.reason)
    .bind(&history.comment)
    .bind(history.cart_total_at_action)
    .bind(encode_timestamp(&history.action_timestamp))
    .bind(history.is_escalation)
    .bind(history.is_system_action)
    .bind(metadata_json)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn parse_status(column: &str, value: &str) -> Result<ApprovalStatus, RepositoryError> {
    ApprovalStatus::parse(value).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown approval status in `{column}`: `{value}`"))
    })
}

fn approval_from_row(row: &SqliteRow) -> Result<Approval, RepositoryError> {
    let approval_type: String = row.try_get("type")?;
    let status: String = row.try_get("status")?;
    let priority: i64 = row.try_get("priority")?;

    Ok(Approval {
        id: ApprovalId(row.try_get("id")?),
        cart_id: CartId(row.try_get("cart_id")?),
        company_id: CompanyId(row.try_get("company_id")?),
        approval_type: ApprovalType::parse(&approval_type).ok_or_else(|| {
            RepositoryError::Decode(format!("invalid approval type `{approval_type}`"))
        })?,
        status: parse_status("status", &status)?,
        created_by: row.try_get("created_by")?,
        handled_by: row.try_get("handled_by")?,
        rejection_reason: row.try_get("rejection_reason")?,
        approval_comment: row.try_get("approval_comment")?,
        handled_at: parse_optional_timestamp("handled_at", row.try_get("handled_at")?)?,
        client_ip_hash: row.try_get("client_ip_hash")?,
        user_agent_hash: row.try_get("user_agent_hash")?,
        cart_total_snapshot: row.try_get("cart_total_snapshot")?,
        priority: ApprovalPriority::from_i64(priority).ok_or_else(|| {
            RepositoryError::Decode(format!("invalid approval priority `{priority}`"))
        })?,
        approvers_required: parse_u32("approvers_required", row.try_get("approvers_required")?)?,
        escalated: row.try_get("escalated")?,
        escalated_at: parse_optional_timestamp("escalated_at", row.try_get("escalated_at")?)?,
        escalated_from: row.try_get("escalated_from")?,
        escalated_to: row.try_get("escalated_to")?,
        idempotency_key: row.try_get("idempotency_key")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<ApprovalHistory, RepositoryError> {
    let previous_status: Option<String> = row.try_get("previous_status")?;
    let new_status: String = row.try_get("new_status")?;
    let metadata_json: String = row.try_get("metadata")?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
        .map_err(|error| RepositoryError::Decode(format!("history metadata: {error}")))?;

    Ok(ApprovalHistory {
        id: ApprovalHistoryId(row.try_get("id")?),
        approval_id: ApprovalId(row.try_get("approval_id")?),
        previous_status: previous_status
            .as_deref()
            .map(|value| parse_status("previous_status", value))
            .transpose()?,
        new_status: parse_status("new_status", &new_status)?,
        actor_id: row.try_get("actor_id")?,
        actor_role: row.try_get("actor_role")?,
        actor_ip_hash: row.try_get("actor_ip_hash")?,
        actor_user_agent_hash: row.try_get("actor_user_agent_hash")?,
        reason: row.try_get("reason")?,
        comment: row.try_get("comment")?,
        cart_total_at_action: row.try_get("cart_total_at_action")?,
        action_timestamp: parse_timestamp("action_timestamp", row.try_get("action_timestamp")?)?,
        is_escalation: row.try_get("is_escalation")?,
        is_system_action: row.try_get("is_system_action")?,
        metadata,
    })
}
