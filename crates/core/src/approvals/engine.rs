use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::approval::{ActorId, ApprovalStatus, ApprovalWorkflow, WorkflowId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("workflow {workflow_id} has already been decided ({})", .status.as_str())]
    AlreadyTerminal { workflow_id: WorkflowId, status: ApprovalStatus },
    #[error("actor `{actor_id}` is not an eligible approver for level {level:?} of workflow {workflow_id}")]
    NotAuthorized { workflow_id: WorkflowId, actor_id: ActorId, level: Option<usize> },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TransitionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyTerminal { .. } => "already_terminal",
            Self::NotAuthorized { .. } => "not_authorized",
            Self::InvalidInput(_) => "invalid_input",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve { comment: Option<String> },
    Reject { reason: String },
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
        }
    }
}

/// Computes approval transitions. Holds no state; every call works on a copy of
/// the workflow it is given and returns the successor value.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalEngine;

impl ApprovalEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn approve_at_level(
        &self,
        workflow: &ApprovalWorkflow,
        actor_id: &ActorId,
        comment: Option<&str>,
    ) -> Result<ApprovalWorkflow, TransitionError> {
        let index = guard(workflow, actor_id)?;
        let now = Utc::now();

        let mut next = workflow.clone();
        record_decision(&mut next, index, ApprovalStatus::Approved, actor_id, comment, now);
        next.current_approval_level = index + 1;
        if next.current_approval_level == next.approval_chain.len() {
            next.overall_status = ApprovalStatus::Approved;
        }
        next.updated_at = now;

        Ok(next)
    }

    /// Rejection is final for the whole chain. The cursor stays on the level that
    /// rejected so the audit trail shows where the request stopped.
    pub fn reject_at_level(
        &self,
        workflow: &ApprovalWorkflow,
        actor_id: &ActorId,
        reason: &str,
    ) -> Result<ApprovalWorkflow, TransitionError> {
        let index = guard(workflow, actor_id)?;
        if reason.trim().is_empty() {
            return Err(TransitionError::InvalidInput(
                "a rejection reason is required".to_string(),
            ));
        }
        let now = Utc::now();

        let mut next = workflow.clone();
        record_decision(&mut next, index, ApprovalStatus::Rejected, actor_id, Some(reason), now);
        next.overall_status = ApprovalStatus::Rejected;
        next.updated_at = now;

        Ok(next)
    }

    pub fn apply(
        &self,
        workflow: &ApprovalWorkflow,
        actor_id: &ActorId,
        action: &ApprovalAction,
    ) -> Result<ApprovalWorkflow, TransitionError> {
        match action {
            ApprovalAction::Approve { comment } => {
                self.approve_at_level(workflow, actor_id, comment.as_deref())
            }
            ApprovalAction::Reject { reason } => self.reject_at_level(workflow, actor_id, reason),
        }
    }

    pub fn apply_with_audit<S>(
        &self,
        workflow: &ApprovalWorkflow,
        actor_id: &ActorId,
        action: &ApprovalAction,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<ApprovalWorkflow, TransitionError>
    where
        S: AuditSink,
    {
        let result = self.apply(workflow, actor_id, action);
        match &result {
            Ok(next) => {
                let level = workflow.current_approval_level;
                let role = workflow.current_level().map(|l| l.role.as_str()).unwrap_or("unknown");
                let event_type = match (action, next.overall_status) {
                    (ApprovalAction::Reject { .. }, _) => "approval.level_rejected",
                    (ApprovalAction::Approve { .. }, ApprovalStatus::Approved) => {
                        "approval.workflow_approved"
                    }
                    (ApprovalAction::Approve { .. }, _) => "approval.level_approved",
                };
                sink.emit(
                    AuditEvent::new(
                        Some(workflow.id.clone()),
                        audit.correlation_id.clone(),
                        event_type,
                        AuditCategory::Workflow,
                        actor_id.0.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("level", level.to_string())
                    .with_metadata("role", role)
                    .with_metadata("cursor_to", next.current_approval_level.to_string())
                    .with_metadata("overall_status", next.overall_status.as_str()),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        Some(workflow.id.clone()),
                        audit.correlation_id.clone(),
                        "approval.transition_denied",
                        AuditCategory::Workflow,
                        actor_id.0.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("action", action.as_str())
                    .with_metadata("error_kind", error.kind())
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

fn guard(workflow: &ApprovalWorkflow, actor_id: &ActorId) -> Result<usize, TransitionError> {
    if workflow.is_terminal() {
        return Err(TransitionError::AlreadyTerminal {
            workflow_id: workflow.id.clone(),
            status: workflow.overall_status,
        });
    }

    if !workflow.is_authorized(actor_id) {
        return Err(TransitionError::NotAuthorized {
            workflow_id: workflow.id.clone(),
            actor_id: actor_id.clone(),
            level: workflow.current_level().map(|_| workflow.current_approval_level),
        });
    }

    Ok(workflow.current_approval_level)
}

fn record_decision(
    workflow: &mut ApprovalWorkflow,
    index: usize,
    status: ApprovalStatus,
    actor_id: &ActorId,
    comment: Option<&str>,
    now: DateTime<Utc>,
) {
    let level = &mut workflow.approval_chain[index];
    level.status = status;
    level.acted_by = Some(actor_id.clone());
    level.acted_at = Some(now);
    level.comments = comment.map(str::trim).filter(|c| !c.is_empty()).map(str::to_string);
}
