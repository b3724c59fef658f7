use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use spendgate_core::domain::approval::{ApprovalPriority, ApprovalType};
use spendgate_core::domain::company::CompanyId;
use spendgate_core::domain::rule::{ApprovalRule, ApprovalRuleId, RuleCondition};
use spendgate_core::domain::settings::ApprovalSettings;
use spendgate_core::errors::StoreError;
use spendgate_core::store::PolicyStore;

use super::{encode_timestamp, parse_optional_timestamp, parse_timestamp, parse_u32};
use super::RepositoryError;
use crate::DbPool;

const SETTINGS_COLUMNS: &str = "company_id, requires_admin_approval,
    requires_sales_manager_approval, admin_approval_threshold, sales_manager_approval_threshold,
    requires_multiple_approvers, min_approvers_count, escalation_enabled,
    escalation_timeout_hours, escalation_role, auto_approve_below_threshold,
    auto_approve_threshold, priority_threshold, created_at, updated_at";

const RULE_COLUMNS: &str = "sequence, id, company_id, priority, conditions,
    required_approval_type, required_approvers_count, approval_priority, is_active,
    effective_from, effective_until, created_at";

pub struct SqlPolicyStore {
    pool: DbPool,
}

impl SqlPolicyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn upsert_settings(
        &self,
        settings: &ApprovalSettings,
        overwrite: bool,
    ) -> Result<(), RepositoryError> {
        let conflict = if overwrite {
            "ON CONFLICT(company_id) DO UPDATE SET
                 requires_admin_approval = excluded.requires_admin_approval,
                 requires_sales_manager_approval = excluded.requires_sales_manager_approval,
                 admin_approval_threshold = excluded.admin_approval_threshold,
                 sales_manager_approval_threshold = excluded.sales_manager_approval_threshold,
                 requires_multiple_approvers = excluded.requires_multiple_approvers,
                 min_approvers_count = excluded.min_approvers_count,
                 escalation_enabled = excluded.escalation_enabled,
                 escalation_timeout_hours = excluded.escalation_timeout_hours,
                 escalation_role = excluded.escalation_role,
                 auto_approve_below_threshold = excluded.auto_approve_below_threshold,
                 auto_approve_threshold = excluded.auto_approve_threshold,
                 priority_threshold = excluded.priority_threshold,
                 updated_at = excluded.updated_at"
        } else {
            "ON CONFLICT(company_id) DO NOTHING"
        };

        sqlx::query(&format!(
            "INSERT INTO approval_settings ({SETTINGS_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             {conflict}"
        ))
        .bind(&settings.company_id.0)
        .bind(settings.requires_admin_approval)
        .bind(settings.requires_sales_manager_approval)
        .bind(settings.admin_approval_threshold)
        .bind(settings.sales_manager_approval_threshold)
        .bind(settings.requires_multiple_approvers)
        .bind(i64::from(settings.min_approvers_count))
        .bind(settings.escalation_enabled)
        .bind(i64::from(settings.escalation_timeout_hours))
        .bind(&settings.escalation_role)
        .bind(settings.auto_approve_below_threshold)
        .bind(settings.auto_approve_threshold)
        .bind(settings.priority_threshold)
        .bind(encode_timestamp(&settings.created_at))
        .bind(encode_timestamp(&settings.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_settings(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<ApprovalSettings>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SETTINGS_COLUMNS} FROM approval_settings WHERE company_id = ?"
        ))
        .bind(&company_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(settings_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl PolicyStore for SqlPolicyStore {
    async fn settings_for_company(
        &self,
        company_id: &CompanyId,
        now: DateTime<Utc>,
    ) -> Result<ApprovalSettings, StoreError> {
        if let Some(settings) = self.fetch_settings(company_id).await? {
            return Ok(settings);
        }

        let defaults = ApprovalSettings::defaults_for(company_id.clone(), now);
        self.upsert_settings(&defaults, false).await?;
        tracing::debug!(
            event_name = "approval.settings.defaulted",
            company_id = %company_id.0,
            "created default approval settings"
        );

        self.fetch_settings(company_id).await?.ok_or_else(|| {
            StoreError::Database(format!("settings for company `{}` vanished", company_id.0))
        })
    }

    async fn save_settings(&self, settings: ApprovalSettings) -> Result<(), StoreError> {
        Ok(self.upsert_settings(&settings, true).await?)
    }

    async fn list_rules(&self, company_id: &CompanyId) -> Result<Vec<ApprovalRule>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM approval_rule WHERE company_id = ? ORDER BY sequence ASC"
        ))
        .bind(&company_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(rule_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn save_rule(&self, rule: ApprovalRule) -> Result<ApprovalRule, StoreError> {
        let conditions_json = serde_json::to_string(&rule.conditions)
            .map_err(|error| RepositoryError::Decode(format!("rule conditions: {error}")))?;

        sqlx::query(
            "INSERT INTO approval_rule (id, company_id, priority, conditions,
                                        required_approval_type, required_approvers_count,
                                        approval_priority, is_active, effective_from,
                                        effective_until, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 company_id = excluded.company_id,
                 priority = excluded.priority,
                 conditions = excluded.conditions,
                 required_approval_type = excluded.required_approval_type,
                 required_approvers_count = excluded.required_approvers_count,
                 approval_priority = excluded.approval_priority,
                 is_active = excluded.is_active,
                 effective_from = excluded.effective_from,
                 effective_until = excluded.effective_until",
        )
        .bind(&rule.id.0)
        .bind(&rule.company_id.0)
        .bind(rule.priority)
        .bind(conditions_json)
        .bind(rule.required_approval_type.as_str())
        .bind(i64::from(rule.required_approvers_count))
        .bind(rule.approval_priority.map(|priority| priority.as_i64()))
        .bind(rule.is_active)
        .bind(rule.effective_from.as_ref().map(encode_timestamp))
        .bind(rule.effective_until.as_ref().map(encode_timestamp))
        .bind(encode_timestamp(&rule.created_at))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM approval_rule WHERE id = ?"))
            .bind(&rule.id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(rule_from_row(&row)?)
    }

    async fn list_escalation_enabled(&self) -> Result<Vec<ApprovalSettings>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SETTINGS_COLUMNS} FROM approval_settings
             WHERE escalation_enabled = 1
             ORDER BY company_id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(settings_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

fn settings_from_row(row: &SqliteRow) -> Result<ApprovalSettings, RepositoryError> {
    Ok(ApprovalSettings {
        company_id: CompanyId(row.try_get("company_id")?),
        requires_admin_approval: row.try_get("requires_admin_approval")?,
        requires_sales_manager_approval: row.try_get("requires_sales_manager_approval")?,
        admin_approval_threshold: row.try_get("admin_approval_threshold")?,
        sales_manager_approval_threshold: row.try_get("sales_manager_approval_threshold")?,
        requires_multiple_approvers: row.try_get("requires_multiple_approvers")?,
        min_approvers_count: parse_u32("min_approvers_count", row.try_get("min_approvers_count")?)?,
        escalation_enabled: row.try_get("escalation_enabled")?,
        escalation_timeout_hours: parse_u32(
            "escalation_timeout_hours",
            row.try_get("escalation_timeout_hours")?,
        )?,
        escalation_role: row.try_get("escalation_role")?,
        auto_approve_below_threshold: row.try_get("auto_approve_below_threshold")?,
        auto_approve_threshold: row.try_get("auto_approve_threshold")?,
        priority_threshold: row.try_get("priority_threshold")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn rule_from_row(row: &SqliteRow) -> Result<ApprovalRule, RepositoryError> {
    let conditions_json: String = row.try_get("conditions")?;
    let conditions: Vec<RuleCondition> = serde_json::from_str(&conditions_json)
        .map_err(|error| RepositoryError::Decode(format!("rule conditions: {error}")))?;
    let approval_type: String = row.try_get("required_approval_type")?;
    let approval_priority: Option<i64> = row.try_get("approval_priority")?;

    Ok(ApprovalRule {
        id: ApprovalRuleId(row.try_get("id")?),
        company_id: CompanyId(row.try_get("company_id")?),
        priority: row.try_get("priority")?,
        conditions,
        required_approval_type: ApprovalType::parse(&approval_type).ok_or_else(|| {
            RepositoryError::Decode(format!("invalid approval type `{approval_type}`"))
        })?,
        required_approvers_count: parse_u32(
            "required_approvers_count",
            row.try_get("required_approvers_count")?,
        )?,
        approval_priority: approval_priority
            .map(|value| {
                ApprovalPriority::from_i64(value).ok_or_else(|| {
                    RepositoryError::Decode(format!("invalid approval priority `{value}`"))
                })
            })
            .transpose()?,
        is_active: row.try_get("is_active")?,
        effective_from: parse_optional_timestamp("effective_from", row.try_get("effective_from")?)?,
        effective_until: parse_optional_timestamp(
            "effective_until",
            row.try_get("effective_until")?,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        sequence: row.try_get("sequence")?,
    })
}
