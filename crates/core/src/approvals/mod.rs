pub mod machine;
pub mod saga;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::audit::{ActorContext, AuditTrailRecorder, TransitionContext};
use crate::clock::{Clock, SystemClock};
use crate::domain::approval::{Approval, ApprovalId, ApprovalStatus, ApprovalType};
use crate::domain::company::{CartId, CompanyId};
use crate::domain::history::ApprovalHistory;
use crate::errors::ApplicationError;
use crate::policy::{ApprovalPolicyEvaluator, PolicyDecision, PolicyEvaluator, PolicyInput};
use crate::signals::{self, SignalKind, SignalSink, TracingSignalSink};
use crate::spend::SpendWindowCalculator;
use crate::store::{
    ApprovalStore, CommerceReader, InsertOutcome, Page, PolicyStore, TransitionOutcome,
};

pub use machine::{Decision, DecisionCommand, COMPENSATION_REASON};
pub use saga::CreationSaga;

/// Deterministic creation key: SHA-256 hex of `len(cart_id):cart_id:type`.
/// The length prefix keeps ids and role names containing `:` apart.
pub fn idempotency_key(cart_id: &CartId, approval_type: &ApprovalType) -> String {
    let payload = format!("{}:{}:{}", cart_id.0.len(), cart_id.0, approval_type.as_str());
    format!("{:x}", Sha256::digest(payload.as_bytes()))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequirement {
    pub required: bool,
    pub decision: PolicyDecision,
    pub approvals: Vec<Approval>,
}

pub struct ApprovalRequestManager {
    approvals: Arc<dyn ApprovalStore>,
    policies: Arc<dyn PolicyStore>,
    commerce: Arc<dyn CommerceReader>,
    signals: Arc<dyn SignalSink>,
    clock: Arc<dyn Clock>,
    evaluator: ApprovalPolicyEvaluator,
    spend: SpendWindowCalculator,
}

impl ApprovalRequestManager {
    pub fn new(
        approvals: Arc<dyn ApprovalStore>,
        policies: Arc<dyn PolicyStore>,
        commerce: Arc<dyn CommerceReader>,
    ) -> Self {
        Self {
            approvals,
            policies,
            commerce,
            signals: Arc::new(TracingSignalSink),
            clock: Arc::new(SystemClock),
            evaluator: ApprovalPolicyEvaluator::default(),
            spend: SpendWindowCalculator,
        }
    }

    pub fn with_signal_sink(mut self, signals: Arc<dyn SignalSink>) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Checkout entry point: evaluates policy for the cart and opens the
    /// approvals it calls for.
    pub async fn require_approval(
        &self,
        cart_id: &CartId,
        created_by: Option<&str>,
    ) -> Result<ApprovalRequirement, ApplicationError> {
        let cart = self
            .commerce
            .find_cart(cart_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("cart", cart_id.0.clone()))?;
        let employee = self
            .commerce
            .find_employee(&cart.employee_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("employee", cart.employee_id.0.clone()))?;
        let company = self
            .commerce
            .find_company(&employee.company_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("company", employee.company_id.0.clone()))?;

        let now = self.clock.now();
        let now_utc = now.with_timezone(&Utc);
        let settings = self.policies.settings_for_company(&company.id, now_utc).await?;
        let rules = self.policies.list_rules(&company.id).await?;
        let window = self.spend.compute_window(company.spending_limit_reset_frequency, &now);
        let orders = self.commerce.list_orders(&employee.id, window.start).await?;

        let decision = self.evaluator.evaluate(&PolicyInput {
            cart: &cart,
            employee: &employee,
            company: &company,
            settings: &settings,
            rules: &rules,
            orders: &orders,
            now,
        });

        tracing::info!(
            event_name = "approval.policy.evaluated",
            cart_id = %cart.id.0,
            company_id = %company.id.0,
            required = decision.required,
            over_limit = decision.over_limit,
            auto_approved = decision.auto_approved,
            windowed_spend = decision.windowed_spend,
            matched_rule_id =
                decision.matched_rule_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
            "approval policy evaluated"
        );

        if !decision.required {
            return Ok(ApprovalRequirement { required: false, decision, approvals: Vec::new() });
        }

        let created_by = created_by.unwrap_or(employee.id.0.as_str());
        let approvals = self.create_approvals(&cart.id, &company.id, &decision, created_by).await?;
        Ok(ApprovalRequirement { required: true, decision, approvals })
    }

    /// Opens one pending approval per required type. Retries resolve to the
    /// rows created first, whatever their status now is.
    pub async fn create_approvals(
        &self,
        cart_id: &CartId,
        company_id: &CompanyId,
        decision: &PolicyDecision,
        created_by: &str,
    ) -> Result<Vec<Approval>, ApplicationError> {
        let now = self.clock.now().with_timezone(&Utc);
        let mut saga = CreationSaga::new(self.approvals.as_ref());
        let mut approvals = Vec::with_capacity(decision.approval_types.len());

        let mut types = decision.approval_types.clone();
        types.dedup();
        for approval_type in types {
            let approval =
                new_approval(cart_id, company_id, approval_type, decision, created_by, now);
            let history = AuditTrailRecorder.record(
                &approval.id,
                None,
                ApprovalStatus::Pending,
                &ActorContext::system(),
                TransitionContext::new(approval.cart_total_snapshot)
                    .with_metadata("created_by", created_by),
                now,
            );

            match saga.insert(approval, history).await {
                Ok(InsertOutcome::Inserted(approval)) => approvals.push(approval),
                Ok(InsertOutcome::Existing(existing)) => {
                    tracing::info!(
                        event_name = "approval.creation.deduplicated",
                        approval_id = %existing.id.0,
                        cart_id = %cart_id.0,
                        status = existing.status.as_str(),
                        "approval already exists for idempotency key"
                    );
                    approvals.push(existing);
                }
                Err(error) => {
                    saga.compensate(now).await;
                    return Err(error.into());
                }
            }
        }

        for approval in saga.inserted() {
            tracing::info!(
                event_name = "approval.created",
                approval_id = %approval.id.0,
                cart_id = %approval.cart_id.0,
                company_id = %approval.company_id.0,
                approval_type = %approval.approval_type,
                priority = approval.priority.as_i64(),
                "approval created"
            );
            signals::deliver(self.signals.as_ref(), SignalKind::Created, approval);
        }

        Ok(approvals)
    }

    pub async fn decide(&self, command: DecisionCommand) -> Result<Approval, ApplicationError> {
        command.validate()?;
        let now = self.clock.now().with_timezone(&Utc);

        let planner = |current: &Approval, history: &[ApprovalHistory]| {
            machine::plan_decision(current, history, &command, now)
        };
        let plan = match self.approvals.apply_transition(&command.approval_id, &planner).await {
            Ok(plan) => plan,
            Err(error) => {
                tracing::warn!(
                    event_name = "approval.decision.refused",
                    approval_id = %command.approval_id.0,
                    actor_id = %command.actor_id,
                    actor_role = %command.actor_role,
                    decision = command.decision.as_str(),
                    error = %error,
                    "approval decision refused"
                );
                return Err(error);
            }
        };

        let approval = plan.approval;
        match plan.outcome {
            TransitionOutcome::VoteRecorded { approvals, required } => {
                tracing::info!(
                    event_name = "approval.vote_recorded",
                    approval_id = %approval.id.0,
                    cart_id = %approval.cart_id.0,
                    actor_id = %command.actor_id,
                    approvals,
                    required,
                    "approval vote recorded"
                );
            }
            TransitionOutcome::Approved => {
                tracing::info!(
                    event_name = "approval.approved",
                    approval_id = %approval.id.0,
                    cart_id = %approval.cart_id.0,
                    actor_id = %command.actor_id,
                    "approval approved"
                );
                signals::deliver(self.signals.as_ref(), SignalKind::Approved, &approval);
            }
            TransitionOutcome::Rejected => {
                tracing::info!(
                    event_name = "approval.rejected",
                    approval_id = %approval.id.0,
                    cart_id = %approval.cart_id.0,
                    actor_id = %command.actor_id,
                    "approval rejected"
                );
                signals::deliver(self.signals.as_ref(), SignalKind::Rejected, &approval);
            }
            TransitionOutcome::Escalated | TransitionOutcome::Withdrawn => {}
        }

        Ok(approval)
    }

    pub async fn find_approval(&self, id: &ApprovalId) -> Result<Approval, ApplicationError> {
        self.approvals
            .find_approval(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("approval", id.0.clone()))
    }

    pub async fn list_pending_for_cart(
        &self,
        cart_id: &CartId,
    ) -> Result<Vec<Approval>, ApplicationError> {
        Ok(self.approvals.list_pending_for_cart(cart_id).await?)
    }

    pub async fn list_pending_for_company(
        &self,
        company_id: &CompanyId,
        page: Page,
    ) -> Result<Vec<Approval>, ApplicationError> {
        Ok(self.approvals.list_pending_for_company(company_id, page).await?)
    }

    /// Audit timeline in insertion order.
    pub async fn list_history(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<Vec<ApprovalHistory>, ApplicationError> {
        self.find_approval(approval_id).await?;
        Ok(self.approvals.list_history(approval_id).await?)
    }
}

fn new_approval(
    cart_id: &CartId,
    company_id: &CompanyId,
    approval_type: ApprovalType,
    decision: &PolicyDecision,
    created_by: &str,
    now: DateTime<Utc>,
) -> Approval {
    Approval {
        id: ApprovalId(Uuid::new_v4().to_string()),
        cart_id: cart_id.clone(),
        company_id: company_id.clone(),
        idempotency_key: Some(idempotency_key(cart_id, &approval_type)),
        approval_type,
        status: ApprovalStatus::Pending,
        created_by: created_by.to_string(),
        handled_by: None,
        rejection_reason: None,
        approval_comment: None,
        handled_at: None,
        client_ip_hash: None,
        user_agent_hash: None,
        cart_total_snapshot: decision.cart_total,
        priority: decision.priority,
        approvers_required: decision.approvers_required.max(1),
        escalated: false,
        escalated_at: None,
        escalated_from: None,
        escalated_to: None,
        created_at: now,
        updated_at: now,
    }
}
