use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::{Approval, ApprovalId, ApprovalType};
use crate::domain::company::{CartId, CompanyId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Created,
    Approved,
    Rejected,
    Escalated,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "approval.created",
            Self::Approved => "approval.approved",
            Self::Rejected => "approval.rejected",
            Self::Escalated => "approval.escalated",
        }
    }
}

/// Outbound notification consumed by external notifier collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSignal {
    pub kind: SignalKind,
    pub approval_id: ApprovalId,
    pub cart_id: CartId,
    pub company_id: CompanyId,
    #[serde(rename = "type")]
    pub approval_type: ApprovalType,
}

impl ApprovalSignal {
    pub fn for_approval(kind: SignalKind, approval: &Approval) -> Self {
        Self {
            kind,
            approval_id: approval.id.clone(),
            cart_id: approval.cart_id.clone(),
            company_id: approval.company_id.clone(),
            approval_type: approval.approval_type.clone(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("signal delivery failed: {0}")]
pub struct SignalError(pub String);

/// Delivery happens after the store commit; errors are logged, never rolled back.
pub trait SignalSink: Send + Sync {
    fn emit(&self, signal: ApprovalSignal) -> Result<(), SignalError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSignalSink;

impl SignalSink for TracingSignalSink {
    fn emit(&self, signal: ApprovalSignal) -> Result<(), SignalError> {
        tracing::info!(
            event_name = "approval.signal.emitted",
            signal = signal.kind.as_str(),
            approval_id = %signal.approval_id.0,
            cart_id = %signal.cart_id.0,
            company_id = %signal.company_id.0,
            approval_type = %signal.approval_type,
            "approval signal emitted"
        );
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemorySignalSink {
    signals: Arc<Mutex<Vec<ApprovalSignal>>>,
}

impl InMemorySignalSink {
    pub fn signals(&self) -> Vec<ApprovalSignal> {
        match self.signals.lock() {
            Ok(signals) => signals.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<SignalKind> {
        self.signals().into_iter().map(|signal| signal.kind).collect()
    }
}

impl SignalSink for InMemorySignalSink {
    fn emit(&self, signal: ApprovalSignal) -> Result<(), SignalError> {
        match self.signals.lock() {
            Ok(mut signals) => signals.push(signal),
            Err(poisoned) => poisoned.into_inner().push(signal),
        }
        Ok(())
    }
}

pub(crate) fn deliver(sink: &dyn SignalSink, kind: SignalKind, approval: &Approval) {
    if let Err(error) = sink.emit(ApprovalSignal::for_approval(kind, approval)) {
        tracing::warn!(
            event_name = "approval.signal.failed",
            signal = kind.as_str(),
            approval_id = %approval.id.0,
            error = %error,
            "approval signal could not be delivered"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{ApprovalSignal, InMemorySignalSink, SignalKind, SignalSink};
    use crate::domain::approval::{ApprovalId, ApprovalType};
    use crate::domain::company::{CartId, CompanyId};

    #[test]
    fn in_memory_sink_keeps_emission_order() {
        let sink = InMemorySignalSink::default();
        for kind in [SignalKind::Created, SignalKind::Escalated, SignalKind::Approved] {
            sink.emit(ApprovalSignal {
                kind,
                approval_id: ApprovalId("apr-1".to_owned()),
                cart_id: CartId("cart-1".to_owned()),
                company_id: CompanyId("co-1".to_owned()),
                approval_type: ApprovalType::Admin,
            })
            .expect("emit");
        }

        assert_eq!(
            sink.kinds(),
            vec![SignalKind::Created, SignalKind::Escalated, SignalKind::Approved]
        );
    }

    #[test]
    fn signal_payload_carries_wire_field_names() {
        let signal = ApprovalSignal {
            kind: SignalKind::Rejected,
            approval_id: ApprovalId("apr-9".to_owned()),
            cart_id: CartId("cart-9".to_owned()),
            company_id: CompanyId("co-9".to_owned()),
            approval_type: ApprovalType::SalesManager,
        };

        let json = serde_json::to_value(&signal).expect("serialize");
        assert_eq!(json["type"], "sales_manager");
        assert_eq!(json["approval_id"], "apr-9");
        assert_eq!(SignalKind::Rejected.as_str(), "approval.rejected");
    }
}
