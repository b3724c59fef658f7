use thiserror::Error;

use crate::domain::approval::ApprovalStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid approval transition from {from:?} on {event}")]
    InvalidApprovalTransition { from: ApprovalStatus, event: &'static str },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("actor role `{actor_role}` is not authorized to decide `{required_role}` approvals")]
    Authorization { actor_role: String, required_role: String },
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl ApplicationError {
    /// Failures whose detail stays in the logs rather than the response.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Configuration(_))
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not allowed to decide this approval.",
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => "This approval has already been decided.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::ServiceUnavailable { .. } => 503,
            Self::Internal { .. } => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Validation(message) => Self::BadRequest { message, correlation_id },
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            error @ ApplicationError::Authorization { .. } => {
                Self::Forbidden { message: error.to_string(), correlation_id }
            }
            error @ ApplicationError::NotFound { .. } => {
                Self::NotFound { message: error.to_string(), correlation_id }
            }
            ApplicationError::Conflict(message) => Self::Conflict { message, correlation_id },
            ApplicationError::Persistence(_) => Self::ServiceUnavailable {
                message: "approval storage is unavailable".to_owned(),
                correlation_id,
            },
            ApplicationError::Configuration(_) => Self::Internal {
                message: "approval engine is misconfigured".to_owned(),
                correlation_id,
            },
        }
    }
}
