use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::approval::{Approval, ApprovalId, ApprovalStatus};
use crate::domain::company::{
    CartId, CartSnapshot, Company, CompanyId, Employee, EmployeeId, OrderRecord,
};
use crate::domain::history::ApprovalHistory;
use crate::domain::rule::ApprovalRule;
use crate::domain::settings::ApprovalSettings;
use crate::errors::{ApplicationError, DomainError, StoreError};

use super::{
    ApprovalStore, CommerceReader, InsertOutcome, Page, PolicyStore, TransitionPlan,
    TransitionPlanner,
};

#[derive(Default)]
struct ApprovalTables {
    approvals: Vec<Approval>,
    history: Vec<ApprovalHistory>,
}

/// Single-lock store; every write holds the lock for its whole read-plan-write.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    tables: RwLock<ApprovalTables>,
}

fn pending_order(left: &Approval, right: &Approval) -> std::cmp::Ordering {
    right
        .priority
        .cmp(&left.priority)
        .then(left.created_at.cmp(&right.created_at))
        .then(left.id.0.cmp(&right.id.0))
}

#[async_trait::async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn find_approval(&self, id: &ApprovalId) -> Result<Option<Approval>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.approvals.iter().find(|approval| &approval.id == id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Approval>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .approvals
            .iter()
            .find(|approval| approval.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn insert_pending(
        &self,
        approval: Approval,
        history: ApprovalHistory,
    ) -> Result<InsertOutcome, StoreError> {
        let mut tables = self.tables.write().await;

        if let Some(key) = approval.idempotency_key.as_deref() {
            if let Some(existing) =
                tables.approvals.iter().find(|row| row.idempotency_key.as_deref() == Some(key))
            {
                return Ok(InsertOutcome::Existing(existing.clone()));
            }
        }
        if tables.approvals.iter().any(|row| row.id == approval.id) {
            return Err(StoreError::Database(format!(
                "approval `{}` already exists",
                approval.id.0
            )));
        }

        tables.approvals.push(approval.clone());
        tables.history.push(history);
        Ok(InsertOutcome::Inserted(approval))
    }

    async fn apply_transition(
        &self,
        id: &ApprovalId,
        planner: &TransitionPlanner<'_>,
    ) -> Result<TransitionPlan, ApplicationError> {
        let mut tables = self.tables.write().await;

        let index = tables
            .approvals
            .iter()
            .position(|approval| &approval.id == id)
            .ok_or_else(|| ApplicationError::not_found("approval", id.0.clone()))?;
        let current = &tables.approvals[index];
        if current.status != ApprovalStatus::Pending {
            return Err(ApplicationError::Conflict(format!(
                "approval `{}` is already {}",
                id.0,
                current.status.as_str()
            )));
        }

        let history: Vec<ApprovalHistory> =
            tables.history.iter().filter(|row| &row.approval_id == id).cloned().collect();
        let plan = planner(current, &history)?;
        if &plan.approval.id != id || &plan.history.approval_id != id {
            return Err(DomainError::InvariantViolation(format!(
                "transition plan for `{}` targets another approval",
                id.0
            ))
            .into());
        }

        tables.approvals[index] = plan.approval.clone();
        tables.history.push(plan.history.clone());
        Ok(plan)
    }

    async fn list_pending_for_cart(&self, cart_id: &CartId) -> Result<Vec<Approval>, StoreError> {
        let tables = self.tables.read().await;
        let mut pending: Vec<Approval> = tables
            .approvals
            .iter()
            .filter(|approval| {
                &approval.cart_id == cart_id && approval.status == ApprovalStatus::Pending
            })
            .cloned()
            .collect();
        pending.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(pending)
    }

    async fn list_pending_for_company(
        &self,
        company_id: &CompanyId,
        page: Page,
    ) -> Result<Vec<Approval>, StoreError> {
        let tables = self.tables.read().await;
        let mut pending: Vec<Approval> = tables
            .approvals
            .iter()
            .filter(|approval| {
                &approval.company_id == company_id && approval.status == ApprovalStatus::Pending
            })
            .cloned()
            .collect();
        pending.sort_by(pending_order);
        Ok(pending.into_iter().skip(page.offset as usize).take(page.limit as usize).collect())
    }

    async fn list_escalation_candidates(
        &self,
        company_id: &CompanyId,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Approval>, StoreError> {
        let tables = self.tables.read().await;
        let mut candidates: Vec<Approval> = tables
            .approvals
            .iter()
            .filter(|approval| {
                &approval.company_id == company_id
                    && approval.status == ApprovalStatus::Pending
                    && !approval.escalated
                    && approval.created_at < created_before
            })
            .cloned()
            .collect();
        candidates.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        candidates.truncate(limit as usize);
        Ok(candidates)
    }

    async fn list_history(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<Vec<ApprovalHistory>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.history.iter().filter(|row| &row.approval_id == approval_id).cloned().collect())
    }
}

#[derive(Default)]
struct PolicyTables {
    settings: HashMap<CompanyId, ApprovalSettings>,
    rules: Vec<ApprovalRule>,
    next_sequence: i64,
}

#[derive(Default)]
pub struct InMemoryPolicyStore {
    tables: RwLock<PolicyTables>,
}

#[async_trait::async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn settings_for_company(
        &self,
        company_id: &CompanyId,
        now: DateTime<Utc>,
    ) -> Result<ApprovalSettings, StoreError> {
        let mut tables = self.tables.write().await;
        let settings = tables
            .settings
            .entry(company_id.clone())
            .or_insert_with(|| ApprovalSettings::defaults_for(company_id.clone(), now));
        Ok(settings.clone())
    }

    async fn save_settings(&self, settings: ApprovalSettings) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.settings.insert(settings.company_id.clone(), settings);
        Ok(())
    }

    async fn list_rules(&self, company_id: &CompanyId) -> Result<Vec<ApprovalRule>, StoreError> {
        let tables = self.tables.read().await;
        let mut rules: Vec<ApprovalRule> =
            tables.rules.iter().filter(|rule| &rule.company_id == company_id).cloned().collect();
        rules.sort_by_key(|rule| rule.sequence);
        Ok(rules)
    }

    async fn save_rule(&self, mut rule: ApprovalRule) -> Result<ApprovalRule, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.rules.iter_mut().find(|stored| stored.id == rule.id) {
            rule.sequence = existing.sequence;
            rule.created_at = existing.created_at;
            *existing = rule.clone();
            return Ok(rule);
        }

        tables.next_sequence += 1;
        rule.sequence = tables.next_sequence;
        tables.rules.push(rule.clone());
        Ok(rule)
    }

    async fn list_escalation_enabled(&self) -> Result<Vec<ApprovalSettings>, StoreError> {
        let tables = self.tables.read().await;
        let mut enabled: Vec<ApprovalSettings> = tables
            .settings
            .values()
            .filter(|settings| settings.escalation_enabled)
            .cloned()
            .collect();
        enabled.sort_by(|left, right| left.company_id.cmp(&right.company_id));
        Ok(enabled)
    }
}

#[derive(Default)]
pub struct InMemoryCommerceReader {
    carts: RwLock<HashMap<CartId, CartSnapshot>>,
    employees: RwLock<HashMap<EmployeeId, Employee>>,
    companies: RwLock<HashMap<CompanyId, Company>>,
    orders: RwLock<Vec<OrderRecord>>,
}

impl InMemoryCommerceReader {
    pub async fn put_cart(&self, cart: CartSnapshot) {
        self.carts.write().await.insert(cart.id.clone(), cart);
    }

    pub async fn put_employee(&self, employee: Employee) {
        self.employees.write().await.insert(employee.id.clone(), employee);
    }

    pub async fn put_company(&self, company: Company) {
        self.companies.write().await.insert(company.id.clone(), company);
    }

    pub async fn put_order(&self, order: OrderRecord) {
        self.orders.write().await.push(order);
    }
}

#[async_trait::async_trait]
impl CommerceReader for InMemoryCommerceReader {
    async fn find_cart(&self, id: &CartId) -> Result<Option<CartSnapshot>, StoreError> {
        Ok(self.carts.read().await.get(id).cloned())
    }

    async fn find_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, StoreError> {
        Ok(self.employees.read().await.get(id).cloned())
    }

    async fn find_company(&self, id: &CompanyId) -> Result<Option<Company>, StoreError> {
        Ok(self.companies.read().await.get(id).cloned())
    }

    async fn list_orders(
        &self,
        employee_id: &EmployeeId,
        since: DateTime<Utc>,
    ) -> Result<Vec<OrderRecord>, StoreError> {
        let orders = self.orders.read().await;
        let mut matching: Vec<OrderRecord> = orders
            .iter()
            .filter(|order| &order.employee_id == employee_id && order.created_at >= since)
            .cloned()
            .collect();
        matching.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(matching)
    }
}
