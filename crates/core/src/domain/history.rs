use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalId, ApprovalStatus};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalHistoryId(pub String);

pub const METADATA_DECISION: &str = "decision";
pub const DECISION_APPROVE: &str = "approve";
pub const DECISION_REJECT: &str = "reject";

/// One immutable audit row per approval state change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalHistory {
    pub id: ApprovalHistoryId,
    pub approval_id: ApprovalId,
    pub previous_status: Option<ApprovalStatus>,
    pub new_status: ApprovalStatus,
    pub actor_id: Option<String>,
    pub actor_role: Option<String>,
    pub actor_ip_hash: Option<String>,
    pub actor_user_agent_hash: Option<String>,
    pub reason: Option<String>,
    pub comment: Option<String>,
    pub cart_total_at_action: i64,
    pub action_timestamp: DateTime<Utc>,
    pub is_escalation: bool,
    pub is_system_action: bool,
    pub metadata: BTreeMap<String, String>,
}

impl ApprovalHistory {
    pub fn is_approve_vote(&self) -> bool {
        !self.is_system_action
            && self.metadata.get(METADATA_DECISION).map(String::as_str) == Some(DECISION_APPROVE)
    }
}
