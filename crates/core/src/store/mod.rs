//! Storage ports consumed by the approval engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{Approval, ApprovalId};
use crate::domain::company::{
    CartId, CartSnapshot, Company, CompanyId, Employee, EmployeeId, OrderRecord,
};
use crate::domain::history::ApprovalHistory;
use crate::domain::rule::ApprovalRule;
use crate::domain::settings::ApprovalSettings;
use crate::errors::{ApplicationError, StoreError};

pub mod memory;

pub use memory::{InMemoryApprovalStore, InMemoryCommerceReader, InMemoryPolicyStore};

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: DEFAULT_PAGE_LIMIT, offset: 0 }
    }
}

impl Page {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Approval),
    /// Another request already holds the idempotency key.
    Existing(Approval),
}

impl InsertOutcome {
    pub fn approval(&self) -> &Approval {
        match self {
            Self::Inserted(approval) | Self::Existing(approval) => approval,
        }
    }

    pub fn into_approval(self) -> Approval {
        match self {
            Self::Inserted(approval) | Self::Existing(approval) => approval,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    VoteRecorded { approvals: u32, required: u32 },
    Approved,
    Rejected,
    Escalated,
    Withdrawn,
}

/// Replacement approval row plus the audit row documenting the change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionPlan {
    pub approval: Approval,
    pub history: ApprovalHistory,
    pub outcome: TransitionOutcome,
}

/// Computes a transition from the locked current row and its history.
/// The closure may borrow from the caller for `'a`.
pub type TransitionPlanner<'a> = dyn Fn(
    &Approval,
    &[ApprovalHistory],
) -> Result<TransitionPlan, ApplicationError>
    + Send
    + Sync
    + 'a;

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn find_approval(&self, id: &ApprovalId) -> Result<Option<Approval>, StoreError>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Approval>, StoreError>;

    /// Inserts the approval with its creation audit row unless the idempotency
    /// key is already taken, in which case the holder is returned untouched.
    async fn insert_pending(
        &self,
        approval: Approval,
        history: ApprovalHistory,
    ) -> Result<InsertOutcome, StoreError>;

    /// Runs `planner` against the current row while holding it, then writes
    /// the planned row and audit row atomically. Only pending approvals can be
    /// transitioned; a terminal row yields `ApplicationError::Conflict`.
    async fn apply_transition(
        &self,
        id: &ApprovalId,
        planner: &TransitionPlanner<'_>,
    ) -> Result<TransitionPlan, ApplicationError>;

    async fn list_pending_for_cart(&self, cart_id: &CartId) -> Result<Vec<Approval>, StoreError>;

    async fn list_pending_for_company(
        &self,
        company_id: &CompanyId,
        page: Page,
    ) -> Result<Vec<Approval>, StoreError>;

    /// Pending, not yet escalated, created strictly before `created_before`;
    /// oldest first.
    async fn list_escalation_candidates(
        &self,
        company_id: &CompanyId,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Approval>, StoreError>;

    async fn list_history(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<Vec<ApprovalHistory>, StoreError>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Creates default settings on first access.
    async fn settings_for_company(
        &self,
        company_id: &CompanyId,
        now: DateTime<Utc>,
    ) -> Result<ApprovalSettings, StoreError>;

    async fn save_settings(&self, settings: ApprovalSettings) -> Result<(), StoreError>;

    /// Rules of a company in creation order.
    async fn list_rules(&self, company_id: &CompanyId) -> Result<Vec<ApprovalRule>, StoreError>;

    /// Inserts or replaces a rule; the stored rule keeps its first sequence.
    async fn save_rule(&self, rule: ApprovalRule) -> Result<ApprovalRule, StoreError>;

    async fn list_escalation_enabled(&self) -> Result<Vec<ApprovalSettings>, StoreError>;
}

/// Read access to data owned by checkout and company administration.
#[async_trait]
pub trait CommerceReader: Send + Sync {
    async fn find_cart(&self, id: &CartId) -> Result<Option<CartSnapshot>, StoreError>;

    async fn find_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, StoreError>;

    async fn find_company(&self, id: &CompanyId) -> Result<Option<Company>, StoreError>;

    /// Orders created at or after `since`.
    async fn list_orders(
        &self,
        employee_id: &EmployeeId,
        since: DateTime<Utc>,
    ) -> Result<Vec<OrderRecord>, StoreError>;
}
