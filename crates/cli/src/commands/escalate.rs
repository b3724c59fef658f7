use std::sync::Arc;

use chrono::{DateTime, Utc};
use spendgate_core::EscalationScheduler;
use spendgate_db::{SqlApprovalStore, SqlPolicyStore};

use crate::commands::{with_database, CommandResult};

/// One escalation pass, independent of `escalation.enabled` which only gates the
/// server's periodic loop.
pub fn run(at: Option<DateTime<Utc>>) -> CommandResult {
    with_database("escalate", |config, pool| async move {
        let scheduler = EscalationScheduler::new(
            Arc::new(SqlApprovalStore::new(pool.clone())),
            Arc::new(SqlPolicyStore::new(pool)),
        )
        .with_batch_limit(config.escalation.batch_limit);

        match scheduler.run_once(at.unwrap_or_else(Utc::now)).await {
            Ok(report) => CommandResult::success(
                "escalate",
                format!(
                    "companies_scanned={} escalated={} skipped={} misconfigured={} failed={}",
                    report.companies_scanned,
                    report.escalated.len(),
                    report.skipped,
                    report.misconfigured,
                    report.failed
                ),
            ),
            Err(error) => CommandResult::failure("escalate", "escalation", error.to_string(), 5),
        }
    })
}
