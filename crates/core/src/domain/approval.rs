use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::company::{CartId, CompanyId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// The approval state machine. Only a pending approval accepts events;
    /// escalation re-routes ownership without leaving `Pending`.
    pub fn apply(&self, event: ApprovalEvent) -> Result<Self, DomainError> {
        match (self, event) {
            (Self::Pending, ApprovalEvent::Approve) => Ok(Self::Approved),
            (Self::Pending, ApprovalEvent::Reject | ApprovalEvent::Withdraw) => Ok(Self::Rejected),
            (Self::Pending, ApprovalEvent::RecordVote | ApprovalEvent::Escalate) => {
                Ok(Self::Pending)
            }
            (from, event) => {
                Err(DomainError::InvalidApprovalTransition { from: *from, event: event.as_str() })
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalEvent {
    RecordVote,
    Approve,
    Reject,
    Escalate,
    Withdraw,
}

impl ApprovalEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordVote => "record_vote",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Escalate => "escalate",
            Self::Withdraw => "withdraw",
        }
    }
}

/// Sign-off kind an approval is waiting on. Rules may name any role.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ApprovalType {
    Admin,
    SalesManager,
    Role(String),
}

impl ApprovalType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::SalesManager => "sales_manager",
            Self::Role(role) => role,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let key = normalize_role(value);
        match key.as_str() {
            "" => None,
            "admin" => Some(Self::Admin),
            "sales_manager" => Some(Self::SalesManager),
            _ => Some(Self::Role(key)),
        }
    }

    pub fn matches_role(&self, role: &str) -> bool {
        normalize_role(role) == self.as_str()
    }
}

impl fmt::Display for ApprovalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ApprovalType> for String {
    fn from(value: ApprovalType) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for ApprovalType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| "approval type must not be empty".to_string())
    }
}

pub fn normalize_role(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPriority {
    #[default]
    Normal,
    High,
    Urgent,
}

impl ApprovalPriority {
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::High => 1,
            Self::Urgent => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Normal),
            1 => Some(Self::High),
            2 => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub cart_id: CartId,
    pub company_id: CompanyId,
    #[serde(rename = "type")]
    pub approval_type: ApprovalType,
    pub status: ApprovalStatus,
    pub created_by: String,
    pub handled_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub approval_comment: Option<String>,
    pub handled_at: Option<DateTime<Utc>>,
    pub client_ip_hash: Option<String>,
    pub user_agent_hash: Option<String>,
    pub cart_total_snapshot: i64,
    pub priority: ApprovalPriority,
    pub approvers_required: u32,
    pub escalated: bool,
    pub escalated_at: Option<DateTime<Utc>>,
    pub escalated_from: Option<String>,
    pub escalated_to: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Approval {
    /// Role that currently holds decision authority.
    pub fn deciding_role(&self) -> &str {
        match (&self.escalated_to, self.escalated) {
            (Some(role), true) => role,
            _ => self.approval_type.as_str(),
        }
    }

    pub fn is_decidable_by(&self, actor_role: &str) -> bool {
        normalize_role(actor_role) == normalize_role(self.deciding_role())
    }
}

#[cfg(test)]
mod tests {
    use super::{ApprovalEvent, ApprovalPriority, ApprovalStatus, ApprovalType};
    use crate::errors::DomainError;

    #[test]
    fn status_round_trips_from_storage_encoding() {
        for status in [ApprovalStatus::Pending, ApprovalStatus::Approved, ApprovalStatus::Rejected]
        {
            assert_eq!(ApprovalStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn pending_accepts_every_event() {
        let pending = ApprovalStatus::Pending;
        assert_eq!(pending.apply(ApprovalEvent::Approve), Ok(ApprovalStatus::Approved));
        assert_eq!(pending.apply(ApprovalEvent::Reject), Ok(ApprovalStatus::Rejected));
        assert_eq!(pending.apply(ApprovalEvent::Withdraw), Ok(ApprovalStatus::Rejected));
        assert_eq!(pending.apply(ApprovalEvent::RecordVote), Ok(ApprovalStatus::Pending));
        assert_eq!(pending.apply(ApprovalEvent::Escalate), Ok(ApprovalStatus::Pending));
    }

    #[test]
    fn terminal_statuses_reject_every_event() {
        for status in [ApprovalStatus::Approved, ApprovalStatus::Rejected] {
            for event in [
                ApprovalEvent::RecordVote,
                ApprovalEvent::Approve,
                ApprovalEvent::Reject,
                ApprovalEvent::Escalate,
                ApprovalEvent::Withdraw,
            ] {
                assert_eq!(
                    status.apply(event),
                    Err(DomainError::InvalidApprovalTransition {
                        from: status,
                        event: event.as_str()
                    })
                );
            }
        }
    }

    #[test]
    fn approval_type_parses_known_and_rule_defined_roles() {
        assert_eq!(ApprovalType::parse("Admin"), Some(ApprovalType::Admin));
        assert_eq!(ApprovalType::parse("sales_manager"), Some(ApprovalType::SalesManager));
        assert_eq!(
            ApprovalType::parse(" Finance_Director "),
            Some(ApprovalType::Role("finance_director".to_string()))
        );
        assert_eq!(ApprovalType::parse("  "), None);
        assert!(ApprovalType::SalesManager.matches_role("SALES_MANAGER"));
    }

    #[test]
    fn approval_type_serializes_as_plain_string() {
        let json = serde_json::to_string(&ApprovalType::SalesManager).expect("serialize");
        assert_eq!(json, "\"sales_manager\"");
        let decoded: ApprovalType = serde_json::from_str("\"procurement\"").expect("deserialize");
        assert_eq!(decoded, ApprovalType::Role("procurement".to_string()));
    }

    #[test]
    fn priority_storage_encoding_is_numeric() {
        assert_eq!(ApprovalPriority::Urgent.as_i64(), 2);
        assert_eq!(ApprovalPriority::from_i64(1), Some(ApprovalPriority::High));
        assert_eq!(ApprovalPriority::from_i64(7), None);
        assert!(ApprovalPriority::Urgent > ApprovalPriority::High);
    }
}
