use std::sync::Arc;

use chrono::Utc;

use crate::clock::{Clock, SystemClock};
use crate::domain::company::CompanyId;
use crate::domain::rule::ApprovalRule;
use crate::domain::settings::ApprovalSettings;
use crate::errors::ApplicationError;
use crate::store::PolicyStore;

/// Company administration of approval settings and rules. Everything is
/// validated before it reaches the store.
pub struct SettingsAdmin {
    policies: Arc<dyn PolicyStore>,
    clock: Arc<dyn Clock>,
}

impl SettingsAdmin {
    pub fn new(policies: Arc<dyn PolicyStore>) -> Self {
        Self { policies, clock: Arc::new(SystemClock) }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn settings(
        &self,
        company_id: &CompanyId,
    ) -> Result<ApprovalSettings, ApplicationError> {
        let now = self.clock.now().with_timezone(&Utc);
        Ok(self.policies.settings_for_company(company_id, now).await?)
    }

    pub async fn update_settings(
        &self,
        mut settings: ApprovalSettings,
    ) -> Result<ApprovalSettings, ApplicationError> {
        settings.validate()?;

        let current = self.settings(&settings.company_id).await?;
        settings.created_at = current.created_at;
        settings.updated_at = self.clock.now().with_timezone(&Utc);
        self.policies.save_settings(settings.clone()).await?;

        tracing::info!(
            event_name = "approval.settings.updated",
            company_id = %settings.company_id.0,
            escalation_enabled = settings.escalation_enabled,
            "approval settings updated"
        );
        if settings.escalation_enabled && settings.escalation_target().is_none() {
            tracing::warn!(
                event_name = "escalation.misconfigured",
                company_id = %settings.company_id.0,
                "escalation enabled without an escalation_role; stale approvals will not escalate"
            );
        }

        Ok(settings)
    }

    pub async fn list_rules(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, ApplicationError> {
        Ok(self.policies.list_rules(company_id).await?)
    }

    pub async fn upsert_rule(&self, rule: ApprovalRule) -> Result<ApprovalRule, ApplicationError> {
        rule.validate()?;
        let saved = self.policies.save_rule(rule).await?;

        tracing::info!(
            event_name = "approval.rule.saved",
            company_id = %saved.company_id.0,
            rule_id = %saved.id.0,
            priority = saved.priority,
            sequence = saved.sequence,
            "approval rule saved"
        );
        Ok(saved)
    }
}
