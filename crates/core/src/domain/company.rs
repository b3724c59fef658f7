use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompanyId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmployeeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartId(pub String);

/// Cadence on which an employee's accumulated spend starts again from zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetFrequency {
    Never,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl ResetFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "never" => Some(Self::Never),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            _ => None,
        }
    }

    /// Unknown values track spend cumulatively rather than dropping it.
    pub fn parse_or_never(value: &str) -> Self {
        Self::parse(value).unwrap_or_else(|| {
            tracing::warn!(
                event_name = "spend.reset_frequency.unrecognized",
                value = %value,
                "unrecognized spending limit reset frequency, tracking cumulatively"
            );
            Self::Never
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub spending_limit_reset_frequency: ResetFrequency,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub company_id: CompanyId,
    /// Minor currency units.
    pub spending_limit: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub id: CartId,
    pub employee_id: EmployeeId,
    pub total: i64,
    pub item_count: u32,
    pub currency_code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub employee_id: EmployeeId,
    pub total: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::ResetFrequency;

    #[test]
    fn reset_frequency_round_trips_from_storage_encoding() {
        let cases = [
            ResetFrequency::Never,
            ResetFrequency::Daily,
            ResetFrequency::Weekly,
            ResetFrequency::Monthly,
            ResetFrequency::Yearly,
        ];

        for frequency in cases {
            assert_eq!(ResetFrequency::parse(frequency.as_str()), Some(frequency));
        }
    }

    #[test]
    fn unrecognized_frequency_falls_back_to_cumulative_tracking() {
        assert_eq!(ResetFrequency::parse_or_never("fortnightly"), ResetFrequency::Never);
        assert_eq!(ResetFrequency::parse_or_never(" Weekly "), ResetFrequency::Weekly);
    }
}
