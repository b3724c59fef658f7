use std::sync::Arc;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};

use crate::approvals::ApprovalRequestManager;
use crate::clock::FixedClock;
use crate::domain::approval::{ApprovalPriority, ApprovalType};
use crate::domain::company::{
    CartId, CartSnapshot, Company, CompanyId, Employee, EmployeeId, ResetFrequency,
};
use crate::domain::settings::ApprovalSettings;
use crate::policy::PolicyDecision;
use crate::signals::{InMemorySignalSink, SignalSink};
use crate::store::{
    ApprovalStore, InMemoryApprovalStore, InMemoryCommerceReader, InMemoryPolicyStore, PolicyStore,
};

pub(crate) struct Harness {
    pub manager: ApprovalRequestManager,
    pub approvals: Arc<InMemoryApprovalStore>,
    pub policies: Arc<InMemoryPolicyStore>,
    pub commerce: Arc<InMemoryCommerceReader>,
    pub signals: InMemorySignalSink,
    pub clock: FixedClock,
}

impl Harness {
    /// Company `co-1` with employee `emp-1`; the clock reads Wednesday
    /// 2026-10-14 15:00 UTC.
    pub async fn new() -> Self {
        let now: DateTime<FixedOffset> = FixedOffset::east_opt(0)
            .and_then(|offset| offset.with_ymd_and_hms(2026, 10, 14, 15, 0, 0).single())
            .expect("fixed clock instant");
        let clock = FixedClock(now);

        let commerce = Arc::new(InMemoryCommerceReader::default());
        commerce
            .put_company(Company {
                id: CompanyId("co-1".to_string()),
                name: "Acme Supplies".to_string(),
                spending_limit_reset_frequency: ResetFrequency::Monthly,
            })
            .await;
        commerce
            .put_employee(Employee {
                id: EmployeeId("emp-1".to_string()),
                company_id: CompanyId("co-1".to_string()),
                spending_limit: 100_000_000,
            })
            .await;

        let approvals = Arc::new(InMemoryApprovalStore::default());
        let policies = Arc::new(InMemoryPolicyStore::default());
        let signals = InMemorySignalSink::default();
        let manager = ApprovalRequestManager::new(
            approvals.clone(),
            policies.clone(),
            commerce.clone(),
        )
        .with_signal_sink(Arc::new(signals.clone()))
        .with_clock(Arc::new(clock));

        Self { manager, approvals, policies, commerce, signals, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.0.with_timezone(&Utc)
    }

    pub fn signals_arc(&self) -> Arc<dyn SignalSink> {
        Arc::new(self.signals.clone())
    }

    pub fn manager_with(
        &self,
        approvals: Arc<dyn ApprovalStore>,
        signals: Arc<dyn SignalSink>,
    ) -> ApprovalRequestManager {
        ApprovalRequestManager::new(approvals, self.policies.clone(), self.commerce.clone())
            .with_signal_sink(signals)
            .with_clock(Arc::new(self.clock))
    }

    pub async fn update_settings(&self, edit: impl FnOnce(&mut ApprovalSettings)) {
        let company_id = CompanyId("co-1".to_string());
        let mut settings =
            self.policies.settings_for_company(&company_id, self.now()).await.expect("settings");
        edit(&mut settings);
        self.policies.save_settings(settings).await.expect("save settings");
    }

    pub async fn set_spending_limit(&self, spending_limit: i64) {
        self.commerce
            .put_employee(Employee {
                id: EmployeeId("emp-1".to_string()),
                company_id: CompanyId("co-1".to_string()),
                spending_limit,
            })
            .await;
    }

    pub async fn put_cart(&self, id: &str, total: i64) {
        self.commerce
            .put_cart(CartSnapshot {
                id: CartId(id.to_string()),
                employee_id: EmployeeId("emp-1".to_string()),
                total,
                item_count: 2,
                currency_code: "USD".to_string(),
                created_at: self.now(),
            })
            .await;
    }

    pub fn admin_decision(&self, cart_total: i64) -> PolicyDecision {
        PolicyDecision {
            required: true,
            approval_types: vec![ApprovalType::Admin],
            approvers_required: 1,
            priority: ApprovalPriority::Normal,
            cart_total,
            windowed_spend: 0,
            over_limit: false,
            auto_approved: false,
            matched_rule_id: None,
        }
    }
}
