use thiserror::Error;

use crate::approvals::TransitionError;
use crate::domain::approval::{ChainValidationError, WorkflowId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    ChainValidation(#[from] ChainValidationError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("workflow {workflow_id} was modified concurrently (expected version {expected}, found {actual})")]
    StaleWrite { workflow_id: WorkflowId, expected: u32, actual: u32 },
    #[error("workflow {0} already exists")]
    Duplicate(WorkflowId),
    #[error("workflow {0} not found")]
    NotFound(WorkflowId),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<TransitionError> for ApplicationError {
    fn from(value: TransitionError) -> Self {
        Self::Domain(DomainError::Transition(value))
    }
}

impl From<ChainValidationError> for ApplicationError {
    fn from(value: ChainValidationError) -> Self {
        Self::Domain(DomainError::ChainValidation(value))
    }
}

impl ApplicationError {
    /// Stable machine-readable class, used as the CLI `error_class`.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::Transition(error)) => error.kind(),
            Self::Domain(DomainError::ChainValidation(_)) => "chain_validation",
            Self::Domain(DomainError::InvariantViolation(_)) => "invariant_violation",
            Self::StaleWrite { .. } => "stale_write",
            Self::Duplicate(_) => "duplicate",
            Self::NotFound(_) => "not_found",
            Self::Persistence(_) => "persistence",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, retryable: bool, correlation_id: String },
    #[error("already exists: {message}")]
    AlreadyExists { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
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
            Self::Forbidden { .. } => "You are not an eligible approver for this step.",
            Self::Conflict { retryable: false, .. } => "This request has already been decided.",
            Self::Conflict { retryable: true, .. } => {
                "This request was updated by someone else. Reload it and try again."
            }
            Self::AlreadyExists { .. } => "A request with this id already exists.",
            Self::NotFound { .. } => "The requested approval could not be found.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { retryable: true, .. } | Self::ServiceUnavailable { .. }
        )
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::AlreadyExists { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::AlreadyExists { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        let message = value.to_string();
        match value {
            ApplicationError::Domain(DomainError::Transition(TransitionError::AlreadyTerminal {
                ..
            })) => Self::Conflict { message, retryable: false, correlation_id },
            ApplicationError::Domain(DomainError::Transition(TransitionError::NotAuthorized {
                ..
            })) => Self::Forbidden { message, correlation_id },
            ApplicationError::Domain(DomainError::Transition(TransitionError::InvalidInput(_)))
            | ApplicationError::Domain(DomainError::ChainValidation(_)) => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::Domain(DomainError::InvariantViolation(_)) => {
                Self::Internal { message, correlation_id }
            }
            ApplicationError::StaleWrite { .. } => {
                Self::Conflict { message, retryable: true, correlation_id }
            }
            ApplicationError::Duplicate(_) => Self::AlreadyExists { message, correlation_id },
            ApplicationError::NotFound(_) => Self::NotFound { message, correlation_id },
            ApplicationError::Persistence(_) => Self::ServiceUnavailable { message, correlation_id },
        }
    }
}
