use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalPriority, ApprovalType};
use crate::domain::company::CompanyId;
use crate::errors::ApplicationError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalRuleId(pub String);

/// A single predicate over the checkout context. A rule matches when every one
/// of its conditions holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    CartTotalAtLeast { amount: i64 },
    CartTotalBelow { amount: i64 },
    ItemCountAtLeast { count: u32 },
    DayOfWeekIn { days: Vec<Weekday> },
    /// Inclusive on both ends; `start > end` wraps past midnight.
    HourOfDayBetween { start: u32, end: u32 },
    OverSpendingLimit,
}

impl RuleCondition {
    fn validate(&self) -> Result<(), String> {
        match self {
            Self::CartTotalAtLeast { amount } | Self::CartTotalBelow { amount } if *amount < 0 => {
                Err("condition amount must not be negative".to_string())
            }
            Self::DayOfWeekIn { days } if days.is_empty() => {
                Err("day_of_week_in requires at least one day".to_string())
            }
            Self::HourOfDayBetween { start, end } if *start > 23 || *end > 23 => {
                Err("hour_of_day_between hours must be within 0..=23".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: ApprovalRuleId,
    pub company_id: CompanyId,
    pub priority: i32,
    pub conditions: Vec<RuleCondition>,
    pub required_approval_type: ApprovalType,
    pub required_approvers_count: u32,
    pub approval_priority: Option<ApprovalPriority>,
    pub is_active: bool,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Insertion order assigned by the store; breaks priority ties.
    pub sequence: i64,
}

impl ApprovalRule {
    pub fn validate(&self) -> Result<(), ApplicationError> {
        let invalid = |message: String| {
            ApplicationError::Validation(format!("rule `{}`: {message}", self.id.0))
        };

        if self.conditions.is_empty() {
            return Err(invalid("at least one condition is required".to_string()));
        }
        for condition in &self.conditions {
            condition.validate().map_err(invalid)?;
        }
        if self.required_approvers_count == 0 {
            return Err(invalid("required_approvers_count must be at least 1".to_string()));
        }
        if let (Some(from), Some(until)) = (self.effective_from, self.effective_until) {
            if from > until {
                return Err(invalid("effective_from must not be after effective_until".to_string()));
            }
        }

        Ok(())
    }

    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.is_active
            && self.effective_from.map_or(true, |from| from <= at)
            && self.effective_until.map_or(true, |until| at <= until)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc, Weekday};

    use super::{ApprovalRule, ApprovalRuleId, RuleCondition};
    use crate::domain::approval::ApprovalType;
    use crate::domain::company::CompanyId;

    fn rule(conditions: Vec<RuleCondition>) -> ApprovalRule {
        ApprovalRule {
            id: ApprovalRuleId("rule-1".to_string()),
            company_id: CompanyId("co-1".to_string()),
            priority: 10,
            conditions,
            required_approval_type: ApprovalType::Admin,
            required_approvers_count: 1,
            approval_priority: None,
            is_active: true,
            effective_from: None,
            effective_until: None,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            sequence: 1,
        }
    }

    #[test]
    fn rules_without_conditions_are_rejected() {
        let error = rule(vec![]).validate().expect_err("empty rule");
        assert!(error.to_string().contains("at least one condition"));
    }

    #[test]
    fn malformed_conditions_are_rejected() {
        assert!(rule(vec![RuleCondition::DayOfWeekIn { days: vec![] }]).validate().is_err());
        assert!(rule(vec![RuleCondition::HourOfDayBetween { start: 9, end: 24 }])
            .validate()
            .is_err());
        assert!(rule(vec![RuleCondition::CartTotalBelow { amount: -5 }]).validate().is_err());
        assert!(rule(vec![RuleCondition::HourOfDayBetween { start: 22, end: 6 }])
            .validate()
            .is_ok());
    }

    #[test]
    fn inverted_effective_window_is_rejected() {
        let mut rule = rule(vec![RuleCondition::OverSpendingLimit]);
        let now = Utc::now();
        rule.effective_from = Some(now);
        rule.effective_until = Some(now - Duration::days(1));

        assert!(rule.validate().is_err());
    }

    #[test]
    fn effective_window_bounds_are_inclusive() {
        let mut rule = rule(vec![RuleCondition::CartTotalAtLeast { amount: 1 }]);
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2026, 3, 31, 23, 59, 59).unwrap();
        rule.effective_from = Some(from);
        rule.effective_until = Some(until);

        assert!(rule.is_effective_at(from));
        assert!(rule.is_effective_at(until));
        assert!(!rule.is_effective_at(until + Duration::seconds(1)));

        rule.is_active = false;
        assert!(!rule.is_effective_at(from));
    }

    #[test]
    fn conditions_deserialize_from_tagged_json() {
        let conditions: Vec<RuleCondition> = serde_json::from_str(
            r#"[
                {"kind":"cart_total_at_least","amount":250000},
                {"kind":"day_of_week_in","days":["Sat","Sun"]},
                {"kind":"over_spending_limit"}
            ]"#,
        )
        .expect("conditions json");

        assert_eq!(
            conditions,
            vec![
                RuleCondition::CartTotalAtLeast { amount: 250_000 },
                RuleCondition::DayOfWeekIn { days: vec![Weekday::Sat, Weekday::Sun] },
                RuleCondition::OverSpendingLimit,
            ]
        );
    }
}
