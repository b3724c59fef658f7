//! Timeout-driven escalation. One call to [`EscalationScheduler::run_once`]
//! is one scan; the periodic loop lives with the process that owns the clock.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::approvals::machine::plan_escalation;
use crate::domain::approval::{Approval, ApprovalId};
use crate::domain::history::ApprovalHistory;
use crate::domain::settings::ApprovalSettings;
use crate::errors::ApplicationError;
use crate::signals::{self, SignalKind, SignalSink, TracingSignalSink};
use crate::store::{ApprovalStore, PolicyStore};

pub const DEFAULT_BATCH_LIMIT: u32 = 500;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationReport {
    pub companies_scanned: usize,
    pub escalated: Vec<ApprovalId>,
    /// Decided or escalated by someone else between listing and locking.
    pub skipped: usize,
    pub misconfigured: usize,
    pub failed: usize,
}

pub struct EscalationScheduler {
    approvals: Arc<dyn ApprovalStore>,
    policies: Arc<dyn PolicyStore>,
    signals: Arc<dyn SignalSink>,
    batch_limit: u32,
}

impl EscalationScheduler {
    pub fn new(approvals: Arc<dyn ApprovalStore>, policies: Arc<dyn PolicyStore>) -> Self {
        Self {
            approvals,
            policies,
            signals: Arc::new(TracingSignalSink),
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    pub fn with_signal_sink(mut self, signals: Arc<dyn SignalSink>) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_batch_limit(mut self, batch_limit: u32) -> Self {
        self.batch_limit = batch_limit.max(1);
        self
    }

    /// Scans every escalation-enabled company once. Only failing to list the
    /// companies aborts the run; per-company and per-approval failures are
    /// logged and counted.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<EscalationReport, ApplicationError> {
        let companies = self.policies.list_escalation_enabled().await?;
        let mut report = EscalationReport::default();

        for settings in &companies {
            report.companies_scanned += 1;
            self.scan_company(settings, now, &mut report).await;
        }

        tracing::info!(
            event_name = "escalation.scan.completed",
            companies_scanned = report.companies_scanned,
            escalated = report.escalated.len(),
            skipped = report.skipped,
            misconfigured = report.misconfigured,
            failed = report.failed,
            "escalation scan completed"
        );

        Ok(report)
    }

    async fn scan_company(
        &self,
        settings: &ApprovalSettings,
        now: DateTime<Utc>,
        report: &mut EscalationReport,
    ) {
        let company_id = &settings.company_id;
        let cutoff = now - Duration::hours(i64::from(settings.escalation_timeout_hours));

        let candidates = match self
            .approvals
            .list_escalation_candidates(company_id, cutoff, self.batch_limit)
            .await
        {
            Ok(candidates) => candidates,
            Err(error) => {
                report.failed += 1;
                tracing::error!(
                    event_name = "escalation.scan.company_failed",
                    company_id = %company_id.0,
                    error = %error,
                    "could not list escalation candidates"
                );
                return;
            }
        };

        let Some(role) = settings.escalation_target() else {
            for approval in &candidates {
                let error = ApplicationError::Configuration(format!(
                    "company `{}` enables escalation without an escalation_role",
                    company_id.0
                ));
                tracing::error!(
                    event_name = "escalation.misconfigured",
                    company_id = %company_id.0,
                    approval_id = %approval.id.0,
                    error = %error,
                    "approval left pending without escalation"
                );
            }
            report.misconfigured += candidates.len();
            return;
        };

        for approval in candidates {
            let planner = |current: &Approval, _: &[ApprovalHistory]| {
                plan_escalation(current, &role, now)
            };
            match self.approvals.apply_transition(&approval.id, &planner).await {
                Ok(plan) => {
                    tracing::info!(
                        event_name = "approval.escalated",
                        approval_id = %plan.approval.id.0,
                        cart_id = %plan.approval.cart_id.0,
                        company_id = %company_id.0,
                        escalated_from = plan.approval.escalated_from.as_deref().unwrap_or(""),
                        escalated_to = %role,
                        "approval escalated"
                    );
                    signals::deliver(self.signals.as_ref(), SignalKind::Escalated, &plan.approval);
                    report.escalated.push(plan.approval.id);
                }
                Err(ApplicationError::Conflict(reason)) => {
                    report.skipped += 1;
                    tracing::debug!(
                        event_name = "escalation.candidate.skipped",
                        approval_id = %approval.id.0,
                        reason = %reason,
                        "escalation candidate no longer eligible"
                    );
                }
                Err(error) => {
                    report.failed += 1;
                    tracing::error!(
                        event_name = "escalation.candidate.failed",
                        approval_id = %approval.id.0,
                        company_id = %company_id.0,
                        error = %error,
                        "escalation failed for approval"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::EscalationScheduler;
    use crate::approvals::{Decision, DecisionCommand};
    use crate::domain::approval::{Approval, ApprovalStatus};
    use crate::domain::company::{CartId, CompanyId};
    use crate::errors::ApplicationError;
    use crate::signals::SignalKind;
    use crate::testing::Harness;

    async fn escalation_harness(role: Option<&str>) -> (Harness, EscalationScheduler) {
        let harness = Harness::new().await;
        let role = role.map(str::to_string);
        harness
            .update_settings(move |settings| {
                settings.escalation_enabled = true;
                settings.escalation_timeout_hours = 24;
                settings.escalation_role = role;
            })
            .await;
        let scheduler =
            EscalationScheduler::new(harness.approvals.clone(), harness.policies.clone())
                .with_signal_sink(harness.signals_arc());
        (harness, scheduler)
    }

    async fn open_approval(harness: &Harness, cart: &str) -> Approval {
        harness
            .manager
            .create_approvals(
                &CartId(cart.to_string()),
                &CompanyId("co-1".to_string()),
                &harness.admin_decision(1_200_000),
                "emp-1",
            )
            .await
            .expect("create")
            .remove(0)
    }

    #[tokio::test]
    async fn stale_pending_approval_escalates_exactly_once() {
        let (harness, scheduler) = escalation_harness(Some("sales_manager")).await;
        let approval = open_approval(&harness, "cart-1").await;
        let created_at = harness.now();

        let early = scheduler.run_once(created_at + Duration::hours(23)).await.expect("early run");
        assert!(early.escalated.is_empty());

        let first = scheduler.run_once(created_at + Duration::hours(25)).await.expect("first run");
        assert_eq!(first.escalated, vec![approval.id.clone()]);

        let escalated = harness.manager.find_approval(&approval.id).await.expect("find");
        assert!(escalated.escalated);
        assert_eq!(escalated.status, ApprovalStatus::Pending);
        assert_eq!(escalated.escalated_from.as_deref(), Some("admin"));
        assert_eq!(escalated.escalated_to.as_deref(), Some("sales_manager"));
        assert_eq!(escalated.escalated_at, Some(created_at + Duration::hours(25)));

        let second =
            scheduler.run_once(created_at + Duration::hours(50)).await.expect("second run");
        assert!(second.escalated.is_empty());

        let history = harness.manager.list_history(&approval.id).await.expect("history");
        let escalations: Vec<_> = history.iter().filter(|row| row.is_escalation).collect();
        assert_eq!(escalations.len(), 1);
        assert!(escalations[0].is_system_action);
        assert_eq!(escalations[0].new_status, ApprovalStatus::Pending);
        assert_eq!(harness.signals.kinds(), vec![SignalKind::Created, SignalKind::Escalated]);
    }

    #[tokio::test]
    async fn escalated_approval_is_decided_by_escalation_role() {
        let (harness, scheduler) = escalation_harness(Some("sales_manager")).await;
        let approval = open_approval(&harness, "cart-2").await;
        scheduler.run_once(harness.now() + Duration::hours(30)).await.expect("run");

        let command = |actor: &str, role: &str| DecisionCommand {
            approval_id: approval.id.clone(),
            actor_id: actor.to_string(),
            actor_role: role.to_string(),
            decision: Decision::Approve,
            reason: None,
            comment: None,
            client_ip: None,
            user_agent: None,
        };

        let refused = harness.manager.decide(command("admin-1", "admin")).await;
        assert!(matches!(refused, Err(ApplicationError::Authorization { .. })));

        let approved =
            harness.manager.decide(command("sm-1", "sales_manager")).await.expect("approve");
        assert_eq!(approved.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn missing_escalation_role_leaves_approvals_pending() {
        let (harness, scheduler) = escalation_harness(None).await;
        let approval = open_approval(&harness, "cart-3").await;

        let report = scheduler.run_once(harness.now() + Duration::hours(25)).await.expect("run");

        assert_eq!(report.companies_scanned, 1);
        assert_eq!(report.misconfigured, 1);
        assert!(report.escalated.is_empty());
        let untouched = harness.manager.find_approval(&approval.id).await.expect("find");
        assert!(!untouched.escalated);
        assert_eq!(untouched.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn decided_approvals_are_never_escalated() {
        let (harness, scheduler) = escalation_harness(Some("sales_manager")).await;
        let approval = open_approval(&harness, "cart-4").await;
        harness
            .manager
            .decide(DecisionCommand {
                approval_id: approval.id.clone(),
                actor_id: "admin-1".to_string(),
                actor_role: "admin".to_string(),
                decision: Decision::Reject,
                reason: Some("duplicate order".to_string()),
                comment: None,
                client_ip: None,
                user_agent: None,
            })
            .await
            .expect("reject");

        let report = scheduler.run_once(harness.now() + Duration::hours(48)).await.expect("run");

        assert!(report.escalated.is_empty());
        let rejected = harness.manager.find_approval(&approval.id).await.expect("find");
        assert!(!rejected.escalated);
        assert_eq!(rejected.escalated_at, None);
    }

    #[tokio::test]
    async fn companies_without_escalation_are_not_scanned() {
        let harness = Harness::new().await;
        open_approval(&harness, "cart-5").await;
        let scheduler =
            EscalationScheduler::new(harness.approvals.clone(), harness.policies.clone());

        let report = scheduler.run_once(harness.now() + Duration::days(10)).await.expect("run");

        assert_eq!(report.companies_scanned, 0);
        assert!(report.escalated.is_empty());
    }
}
