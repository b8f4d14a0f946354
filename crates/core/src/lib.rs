pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;

pub use approvals::{ApprovalAction, ApprovalEngine, TransitionError};
pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use chrono;
pub use domain::approval::{
    ActorId, ApprovalLevel, ApprovalStatus, ApprovalWorkflow, ChainValidationError,
    NewApprovalLevel, NewWorkflow, WorkflowId,
};
pub use domain::role::{Action, Module, Permission, Role};
pub use errors::{ApplicationError, DomainError, InterfaceError};
