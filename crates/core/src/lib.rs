pub mod admin;
pub mod approvals;
pub mod audit;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod escalation;
pub mod policy;
pub mod signals;
pub mod spend;
pub mod store;

#[cfg(test)]
mod testing;

pub use admin::SettingsAdmin;
pub use approvals::{
    idempotency_key, ApprovalRequestManager, ApprovalRequirement, Decision, DecisionCommand,
};
pub use audit::{ActorContext, AuditTrailRecorder, TransitionContext};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::approval::{Approval, ApprovalId, ApprovalPriority, ApprovalStatus, ApprovalType};
pub use domain::company::{
    CartId, CartSnapshot, Company, CompanyId, Employee, EmployeeId, OrderRecord, ResetFrequency,
};
pub use domain::history::{ApprovalHistory, ApprovalHistoryId};
pub use domain::rule::{ApprovalRule, ApprovalRuleId, RuleCondition};
pub use domain::settings::ApprovalSettings;
pub use errors::{ApplicationError, DomainError, InterfaceError, StoreError};
pub use escalation::{EscalationReport, EscalationScheduler};
pub use policy::{ApprovalPolicyEvaluator, PolicyDecision, PolicyEvaluator, PolicyInput};
pub use signals::{ApprovalSignal, SignalKind, SignalSink, TracingSignalSink};
pub use spend::{SpendWindow, SpendWindowCalculator};
pub use store::{
    ApprovalStore, CommerceReader, InsertOutcome, Page, PolicyStore, TransitionOutcome,
    TransitionPlan,
};
