//! Pure transition planners. Each takes the locked current row and its
//! history and returns the replacement row plus the audit row to append.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{ActorContext, AuditTrailRecorder, TransitionContext};
use crate::domain::approval::{Approval, ApprovalEvent, ApprovalId};
use crate::domain::history::{
    ApprovalHistory, DECISION_APPROVE, DECISION_REJECT, METADATA_DECISION,
};
use crate::errors::ApplicationError;
use crate::store::{TransitionOutcome, TransitionPlan};

pub const COMPENSATION_REASON: &str = "creation_compensated";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => DECISION_APPROVE,
            Self::Reject => DECISION_REJECT,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCommand {
    pub approval_id: ApprovalId,
    pub actor_id: String,
    pub actor_role: String,
    pub decision: Decision,
    pub reason: Option<String>,
    pub comment: Option<String>,
    /// Raw values; hashed before anything is stored.
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl DecisionCommand {
    pub fn actor(&self) -> ActorContext {
        ActorContext::user(self.actor_id.trim(), self.actor_role.trim())
            .with_client(self.client_ip.clone(), self.user_agent.clone())
    }

    pub fn validate(&self) -> Result<(), ApplicationError> {
        if self.actor_id.trim().is_empty() {
            return Err(ApplicationError::Validation("actor_id must not be empty".to_string()));
        }
        if self.actor_role.trim().is_empty() {
            return Err(ApplicationError::Validation("actor_role must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Approve votes cast under the current authority. An escalation resets the
/// count, so only votes recorded after the last escalation row are counted.
fn distinct_approvers(history: &[ApprovalHistory]) -> HashSet<&str> {
    let since = history.iter().rposition(|row| row.is_escalation).map_or(0, |index| index + 1);
    history[since..]
        .iter()
        .filter(|row| row.is_approve_vote())
        .filter_map(|row| row.actor_id.as_deref())
        .collect()
}

/// Plans an approve or reject vote. Multi-approver rows complete once
/// `approvers_required` distinct actors have approved since the last escalation.
pub fn plan_decision(
    current: &Approval,
    history: &[ApprovalHistory],
    command: &DecisionCommand,
    now: DateTime<Utc>,
) -> Result<TransitionPlan, ApplicationError> {
    if !current.is_decidable_by(&command.actor_role) {
        return Err(ApplicationError::Authorization {
            actor_role: command.actor_role.clone(),
            required_role: current.deciding_role().to_string(),
        });
    }

    let actor = command.actor();
    let actor_id = command.actor_id.trim();
    let mut next = current.clone();
    next.handled_by = Some(actor_id.to_string());
    next.client_ip_hash = actor.ip_hash();
    next.user_agent_hash = actor.user_agent_hash();
    next.updated_at = now;

    let mut context = TransitionContext::new(current.cart_total_snapshot)
        .with_metadata(METADATA_DECISION, command.decision.as_str());
    context.reason = command.reason.clone();
    context.comment = command.comment.clone();

    let outcome = match command.decision {
        Decision::Reject => {
            next.status = current.status.apply(ApprovalEvent::Reject)?;
            next.rejection_reason = command.reason.clone();
            next.handled_at = Some(now);
            TransitionOutcome::Rejected
        }
        Decision::Approve => {
            let approvers = distinct_approvers(history);
            if approvers.contains(actor_id) {
                return Err(ApplicationError::Conflict(format!(
                    "actor `{actor_id}` already approved approval `{}`",
                    current.id.0
                )));
            }

            let approvals = u32::try_from(approvers.len()).unwrap_or(u32::MAX).saturating_add(1);
            let required = current.approvers_required.max(1);
            context = context
                .with_metadata("approvals", approvals.to_string())
                .with_metadata("approvers_required", required.to_string());

            if approvals >= required {
                next.status = current.status.apply(ApprovalEvent::Approve)?;
                next.approval_comment = command.comment.clone();
                next.handled_at = Some(now);
                TransitionOutcome::Approved
            } else {
                next.status = current.status.apply(ApprovalEvent::RecordVote)?;
                TransitionOutcome::VoteRecorded { approvals, required }
            }
        }
    };

    let history = AuditTrailRecorder.record(
        &current.id,
        Some(current.status),
        next.status,
        &actor,
        context,
        now,
    );

    Ok(TransitionPlan { approval: next, history, outcome })
}

/// Hands decision authority to `escalation_role` without leaving `Pending`.
pub fn plan_escalation(
    current: &Approval,
    escalation_role: &str,
    now: DateTime<Utc>,
) -> Result<TransitionPlan, ApplicationError> {
    if current.escalated {
        return Err(ApplicationError::Conflict(format!(
            "approval `{}` was already escalated",
            current.id.0
        )));
    }

    let escalated_from =
        current.handled_by.clone().unwrap_or_else(|| current.approval_type.as_str().to_string());

    let mut next = current.clone();
    next.status = current.status.apply(ApprovalEvent::Escalate)?;
    next.escalated = true;
    next.escalated_at = Some(now);
    next.escalated_from = Some(escalated_from.clone());
    next.escalated_to = Some(escalation_role.to_string());
    next.updated_at = now;

    let mut context = TransitionContext::new(current.cart_total_snapshot)
        .with_metadata("escalated_from", escalated_from)
        .with_metadata("escalated_to", escalation_role);
    context.is_escalation = true;
    context.reason = Some("escalation_timeout".to_string());

    let history = AuditTrailRecorder.record(
        &current.id,
        Some(current.status),
        next.status,
        &ActorContext::system(),
        context,
        now,
    );

    Ok(TransitionPlan { approval: next, history, outcome: TransitionOutcome::Escalated })
}

/// Compensates a creation: closes the approval and frees its idempotency key
/// so a retry can create a fresh row.
pub fn plan_withdrawal(
    current: &Approval,
    now: DateTime<Utc>,
) -> Result<TransitionPlan, ApplicationError> {
    let mut next = current.clone();
    next.status = current.status.apply(ApprovalEvent::Withdraw)?;
    next.rejection_reason = Some(COMPENSATION_REASON.to_string());
    next.handled_at = Some(now);
    next.idempotency_key = None;
    next.updated_at = now;

    let mut context = TransitionContext::new(current.cart_total_snapshot);
    context.reason = Some(COMPENSATION_REASON.to_string());

    let history = AuditTrailRecorder.record(
        &current.id,
        Some(current.status),
        next.status,
        &ActorContext::system(),
        context,
        now,
    );

    Ok(TransitionPlan { approval: next, history, outcome: TransitionOutcome::Withdrawn })
}
