pub mod conditions;

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalPriority, ApprovalType};
use crate::domain::company::{CartSnapshot, Company, Employee, OrderRecord};
use crate::domain::rule::{ApprovalRule, ApprovalRuleId};
use crate::domain::settings::ApprovalSettings;
use crate::spend::SpendWindowCalculator;

pub use conditions::ConditionContext;

#[derive(Clone, Copy, Debug)]
pub struct PolicyInput<'a> {
    pub cart: &'a CartSnapshot,
    pub employee: &'a Employee,
    pub company: &'a Company,
    pub settings: &'a ApprovalSettings,
    pub rules: &'a [ApprovalRule],
    pub orders: &'a [OrderRecord],
    /// Evaluation instant in the company's local offset.
    pub now: DateTime<FixedOffset>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub required: bool,
    pub approval_types: Vec<ApprovalType>,
    pub approvers_required: u32,
    pub priority: ApprovalPriority,
    pub cart_total: i64,
    pub windowed_spend: i64,
    pub over_limit: bool,
    pub auto_approved: bool,
    pub matched_rule_id: Option<ApprovalRuleId>,
}

pub trait PolicyEvaluator: Send + Sync {
    fn evaluate(&self, input: &PolicyInput<'_>) -> PolicyDecision;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalPolicyEvaluator {
    spend: SpendWindowCalculator,
}

impl PolicyEvaluator for ApprovalPolicyEvaluator {
    fn evaluate(&self, input: &PolicyInput<'_>) -> PolicyDecision {
        let settings = input.settings;
        let cart_total = input.cart.total;

        let window =
            self.spend.compute_window(input.company.spending_limit_reset_frequency, &input.now);
        let windowed_spend = self.spend.sum_orders_in_window(input.orders, &window);
        let over_limit = windowed_spend.saturating_add(cart_total) > input.employee.spending_limit;

        let context = ConditionContext {
            cart_total,
            item_count: input.cart.item_count,
            weekday: input.now.weekday(),
            hour: input.now.hour(),
            over_spending_limit: over_limit,
        };

        let matched = first_matching_rule(input.rules, &context, input.now.with_timezone(&Utc));
        let (mut approval_types, approvers_required, rule_priority) = match matched {
            Some(rule) => (
                vec![rule.required_approval_type.clone()],
                rule.required_approvers_count.max(1),
                rule.approval_priority,
            ),
            None => (settings.threshold_types(cart_total), settings.approvers_required(), None),
        };

        let auto_approved = !over_limit && settings.auto_approves(cart_total);
        if auto_approved {
            approval_types.clear();
        }
        if over_limit && approval_types.is_empty() {
            approval_types.push(settings.primary_approval_type());
        }

        let threshold_priority = match settings.priority_threshold {
            Some(threshold) if cart_total >= threshold => ApprovalPriority::Urgent,
            _ => ApprovalPriority::Normal,
        };
        let priority = rule_priority.map_or(threshold_priority, |p| p.max(threshold_priority));

        PolicyDecision {
            required: !approval_types.is_empty(),
            approval_types,
            approvers_required,
            priority,
            cart_total,
            windowed_spend,
            over_limit,
            auto_approved,
            matched_rule_id: matched.map(|rule| rule.id.clone()),
        }
    }
}

/// Highest priority first; equal priorities keep creation order.
fn first_matching_rule<'r>(
    rules: &'r [ApprovalRule],
    context: &ConditionContext,
    at: DateTime<Utc>,
) -> Option<&'r ApprovalRule> {
    let mut candidates: Vec<&ApprovalRule> =
        rules.iter().filter(|rule| rule.is_effective_at(at)).collect();
    candidates.sort_by(|left, right| {
        right.priority.cmp(&left.priority).then(left.sequence.cmp(&right.sequence))
    });

    candidates.into_iter().find(|rule| conditions::all_hold(&rule.conditions, context))
}
