use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use spendgate_core::errors::StoreError;

pub mod approval;
pub mod commerce;
pub mod policy;

pub use approval::SqlApprovalStore;
pub use commerce::SqlCommerceReader;
pub use policy::SqlPolicyStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(error) => StoreError::Database(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

/// Fixed-width UTC form so lexical order in SQLite is chronological order.
pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| parse_timestamp(column, value)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("column `{column}` is out of range for u32: {value}"))
    })
}
