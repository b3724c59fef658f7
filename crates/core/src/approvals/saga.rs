use chrono::{DateTime, Utc};

use crate::approvals::machine::plan_withdrawal;
use crate::domain::approval::{Approval, ApprovalId};
use crate::domain::history::ApprovalHistory;
use crate::errors::StoreError;
use crate::store::{ApprovalStore, InsertOutcome};

/// Multi-step approval creation. Each insert is paired with a withdrawal that
/// undoes it; rows that already existed before this saga are never undone.
pub struct CreationSaga<'a> {
    store: &'a dyn ApprovalStore,
    inserted: Vec<Approval>,
}

impl<'a> CreationSaga<'a> {
    pub fn new(store: &'a dyn ApprovalStore) -> Self {
        Self { store, inserted: Vec::new() }
    }

    pub async fn insert(
        &mut self,
        approval: Approval,
        history: ApprovalHistory,
    ) -> Result<InsertOutcome, StoreError> {
        let outcome = self.store.insert_pending(approval, history).await?;
        if let InsertOutcome::Inserted(approval) = &outcome {
            self.inserted.push(approval.clone());
        }
        Ok(outcome)
    }

    pub fn inserted(&self) -> &[Approval] {
        &self.inserted
    }

    /// Withdraws this saga's inserts, newest first. Returns the ids that were
    /// withdrawn; rows decided in the meantime are left as they are.
    pub async fn compensate(self, now: DateTime<Utc>) -> Vec<ApprovalId> {
        let mut withdrawn = Vec::with_capacity(self.inserted.len());

        for approval in self.inserted.iter().rev() {
            let planner = |current: &Approval, _: &[ApprovalHistory]| plan_withdrawal(current, now);
            match self.store.apply_transition(&approval.id, &planner).await {
                Ok(_) => {
                    tracing::warn!(
                        event_name = "approval.creation.compensated",
                        approval_id = %approval.id.0,
                        cart_id = %approval.cart_id.0,
                        "withdrew approval after failed multi-type creation"
                    );
                    withdrawn.push(approval.id.clone());
                }
                Err(error) => {
                    tracing::error!(
                        event_name = "approval.creation.compensation_failed",
                        approval_id = %approval.id.0,
                        cart_id = %approval.cart_id.0,
                        error = %error,
                        "could not withdraw approval during compensation"
                    );
                }
            }
        }

        withdrawn
    }
}
