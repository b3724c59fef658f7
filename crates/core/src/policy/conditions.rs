use chrono::Weekday;

use crate::domain::rule::RuleCondition;

/// Facts about a checkout that rule conditions are evaluated against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionContext {
    pub cart_total: i64,
    pub item_count: u32,
    pub weekday: Weekday,
    pub hour: u32,
    pub over_spending_limit: bool,
}

impl RuleCondition {
    pub fn holds(&self, context: &ConditionContext) -> bool {
        match self {
            Self::CartTotalAtLeast { amount } => context.cart_total >= *amount,
            Self::CartTotalBelow { amount } => context.cart_total < *amount,
            Self::ItemCountAtLeast { count } => context.item_count >= *count,
            Self::DayOfWeekIn { days } => days.contains(&context.weekday),
            Self::HourOfDayBetween { start, end } if start <= end => {
                (*start..=*end).contains(&context.hour)
            }
            Self::HourOfDayBetween { start, end } => context.hour >= *start || context.hour <= *end,
            Self::OverSpendingLimit => context.over_spending_limit,
        }
    }
}

pub fn all_hold(conditions: &[RuleCondition], context: &ConditionContext) -> bool {
    !conditions.is_empty() && conditions.iter().all(|condition| condition.holds(context))
}
