use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalType;
use crate::domain::company::CompanyId;
use crate::errors::ApplicationError;

/// Company-wide approval policy. Thresholds are minor currency units; an unset
/// threshold on an enabled approval kind applies to every cart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSettings {
    pub company_id: CompanyId,
    pub requires_admin_approval: bool,
    pub requires_sales_manager_approval: bool,
    pub admin_approval_threshold: Option<i64>,
    pub sales_manager_approval_threshold: Option<i64>,
    pub requires_multiple_approvers: bool,
    pub min_approvers_count: u32,
    pub escalation_enabled: bool,
    pub escalation_timeout_hours: u32,
    pub escalation_role: Option<String>,
    pub auto_approve_below_threshold: bool,
    pub auto_approve_threshold: Option<i64>,
    pub priority_threshold: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalSettings {
    pub fn defaults_for(company_id: CompanyId, now: DateTime<Utc>) -> Self {
        Self {
            company_id,
            requires_admin_approval: false,
            requires_sales_manager_approval: false,
            admin_approval_threshold: None,
            sales_manager_approval_threshold: None,
            requires_multiple_approvers: false,
            min_approvers_count: 1,
            escalation_enabled: false,
            escalation_timeout_hours: 24,
            escalation_role: None,
            auto_approve_below_threshold: false,
            auto_approve_threshold: None,
            priority_threshold: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), ApplicationError> {
        if self.requires_multiple_approvers && self.min_approvers_count < 2 {
            return Err(ApplicationError::Validation(
                "min_approvers_count must be at least 2 when requires_multiple_approvers is set"
                    .to_string(),
            ));
        }

        for (field, value) in [
            ("admin_approval_threshold", self.admin_approval_threshold),
            ("sales_manager_approval_threshold", self.sales_manager_approval_threshold),
            ("auto_approve_threshold", self.auto_approve_threshold),
            ("priority_threshold", self.priority_threshold),
        ] {
            if value.is_some_and(|amount| amount < 0) {
                return Err(ApplicationError::Validation(format!("{field} must not be negative")));
            }
        }

        if self.escalation_enabled && self.escalation_timeout_hours == 0 {
            return Err(ApplicationError::Validation(
                "escalation_timeout_hours must be greater than zero when escalation is enabled"
                    .to_string(),
            ));
        }

        if self.auto_approve_below_threshold && self.auto_approve_threshold.is_none() {
            return Err(ApplicationError::Validation(
                "auto_approve_threshold is required when auto_approve_below_threshold is set"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Type used when a cart must be gated but neither a rule nor a threshold
    /// named one.
    pub fn primary_approval_type(&self) -> ApprovalType {
        if !self.requires_admin_approval && self.requires_sales_manager_approval {
            ApprovalType::SalesManager
        } else {
            ApprovalType::Admin
        }
    }

    pub fn approvers_required(&self) -> u32 {
        if self.requires_multiple_approvers {
            self.min_approvers_count.max(2)
        } else {
            1
        }
    }

    pub fn threshold_types(&self, cart_total: i64) -> Vec<ApprovalType> {
        let mut types = Vec::new();
        if self.requires_admin_approval && cart_total >= self.admin_approval_threshold.unwrap_or(0)
        {
            types.push(ApprovalType::Admin);
        }
        if self.requires_sales_manager_approval
            && cart_total >= self.sales_manager_approval_threshold.unwrap_or(0)
        {
            types.push(ApprovalType::SalesManager);
        }
        types
    }

    pub fn auto_approves(&self, cart_total: i64) -> bool {
        self.auto_approve_below_threshold
            && self.auto_approve_threshold.is_some_and(|threshold| cart_total < threshold)
    }

    /// The role escalations are routed to, if one is configured.
    pub fn escalation_target(&self) -> Option<String> {
        self.escalation_role
            .as_deref()
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .map(|role| role.to_ascii_lowercase())
    }
}
