//! Audit trail rows for approval state changes.
//!
//! The recorder only builds rows. Stores persist each row in the same
//! transaction as the approval mutation it documents, so a failed history
//! insert rolls the transition back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::approval::{ApprovalId, ApprovalStatus};
use crate::domain::history::{ApprovalHistory, ApprovalHistoryId};

/// Metadata keys that may carry raw identity and are dropped before storage.
const REDACTED_METADATA_KEYS: [&str; 8] = [
    "ip",
    "client_ip",
    "ip_address",
    "user_agent",
    "email",
    "authorization",
    "cookie",
    "token",
];

pub const SYSTEM_ACTOR_ID: &str = "system";

/// Who performed a transition. Raw client identifiers live only here and are
/// hashed when the history row is built.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor_id: Option<String>,
    pub actor_role: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub is_system: bool,
}

impl ActorContext {
    pub fn system() -> Self {
        Self { actor_id: Some(SYSTEM_ACTOR_ID.to_owned()), is_system: true, ..Self::default() }
    }

    pub fn user(actor_id: impl Into<String>, actor_role: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            actor_role: Some(actor_role.into()),
            ..Self::default()
        }
    }

    pub fn with_client(mut self, client_ip: Option<String>, user_agent: Option<String>) -> Self {
        self.client_ip = client_ip;
        self.user_agent = user_agent;
        self
    }

    pub fn ip_hash(&self) -> Option<String> {
        self.client_ip.as_deref().and_then(hash_identifier)
    }

    pub fn user_agent_hash(&self) -> Option<String> {
        self.user_agent.as_deref().and_then(hash_identifier)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransitionContext {
    pub reason: Option<String>,
    pub comment: Option<String>,
    pub cart_total_at_action: i64,
    pub is_escalation: bool,
    pub metadata: BTreeMap<String, String>,
}

impl TransitionContext {
    pub fn new(cart_total_at_action: i64) -> Self {
        Self { cart_total_at_action, ..Self::default() }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AuditTrailRecorder;

impl AuditTrailRecorder {
    pub fn record(
        &self,
        approval_id: &ApprovalId,
        previous_status: Option<ApprovalStatus>,
        new_status: ApprovalStatus,
        actor: &ActorContext,
        context: TransitionContext,
        at: DateTime<Utc>,
    ) -> ApprovalHistory {
        ApprovalHistory {
            id: ApprovalHistoryId(Uuid::new_v4().to_string()),
            approval_id: approval_id.clone(),
            previous_status,
            new_status,
            actor_id: actor.actor_id.clone(),
            actor_role: actor.actor_role.clone(),
            actor_ip_hash: actor.ip_hash(),
            actor_user_agent_hash: actor.user_agent_hash(),
            reason: context.reason,
            comment: context.comment,
            cart_total_at_action: context.cart_total_at_action,
            action_timestamp: at,
            is_escalation: context.is_escalation,
            is_system_action: actor.is_system,
            metadata: sanitize_metadata(context.metadata),
        }
    }
}

/// Unsalted SHA-256, lowercase hex. Blank input yields `None`.
pub fn hash_identifier(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(format!("{:x}", Sha256::digest(trimmed.as_bytes())))
}

pub fn sanitize_metadata(metadata: BTreeMap<String, String>) -> BTreeMap<String, String> {
    metadata
        .into_iter()
        .filter(|(key, _)| {
            let key = key.trim().to_ascii_lowercase();
            !REDACTED_METADATA_KEYS.contains(&key.as_str())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{hash_identifier, ActorContext, AuditTrailRecorder, TransitionContext};
    use crate::domain::approval::{ApprovalId, ApprovalStatus};

    #[test]
    fn hash_is_stable_sha256_hex() {
        assert_eq!(
            hash_identifier("abc").as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(hash_identifier(" abc "), hash_identifier("abc"));
        assert_eq!(hash_identifier("   "), None);
    }

    #[test]
    fn recorded_row_never_contains_raw_client_identity() {
        let actor = ActorContext::user("user-7", "admin").with_client(
            Some("203.0.113.9".to_owned()),
            Some("Mozilla/5.0 (X11; Linux x86_64)".to_owned()),
        );
        let context = TransitionContext::new(1_500_000)
            .with_metadata("decision", "approve")
            .with_metadata("client_ip", "203.0.113.9")
            .with_metadata("User_Agent", "Mozilla/5.0");

        let row = AuditTrailRecorder.record(
            &ApprovalId("apr-1".to_owned()),
            Some(ApprovalStatus::Pending),
            ApprovalStatus::Approved,
            &actor,
            context,
            Utc::now(),
        );

        let ip_hash = row.actor_ip_hash.clone().expect("ip hash");
        assert_eq!(ip_hash.len(), 64);
        assert_ne!(ip_hash, "203.0.113.9");
        assert!(row.actor_user_agent_hash.is_some());
        assert_eq!(row.metadata.len(), 1);
        assert_eq!(row.metadata.get("decision").map(String::as_str), Some("approve"));

        let serialized = serde_json::to_string(&row).expect("serialize row");
        assert!(!serialized.contains("203.0.113.9"));
        assert!(!serialized.contains("Mozilla"));
    }

    #[test]
    fn system_rows_are_flagged() {
        let mut context = TransitionContext::new(42);
        context.is_escalation = true;

        let row = AuditTrailRecorder.record(
            &ApprovalId("apr-2".to_owned()),
            Some(ApprovalStatus::Pending),
            ApprovalStatus::Pending,
            &ActorContext::system(),
            context,
            Utc::now(),
        );

        assert!(row.is_system_action);
        assert!(row.is_escalation);
        assert_eq!(row.actor_ip_hash, None);
        assert_eq!(row.cart_total_at_action, 42);
        assert!(!row.is_approve_vote());
    }
}
