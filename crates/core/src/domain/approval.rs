use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::role::Role;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn generate() -> Self {
        Self(format!("WF-{}", Uuid::new_v4()))
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an authenticated user acting on a workflow.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLevel {
    pub role: Role,
    pub approver_ids: BTreeSet<ActorId>,
    pub status: ApprovalStatus,
    pub acted_by: Option<ActorId>,
    pub acted_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
}

impl ApprovalLevel {
    pub fn pending(role: Role, approver_ids: impl IntoIterator<Item = ActorId>) -> Self {
        Self {
            role,
            approver_ids: approver_ids.into_iter().collect(),
            status: ApprovalStatus::Pending,
            acted_by: None,
            acted_at: None,
            comments: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: WorkflowId,
    pub request_type: String,
    pub description: String,
    pub amount: Option<Decimal>,
    pub requested_by: ActorId,
    pub approval_chain: Vec<ApprovalLevel>,
    pub current_approval_level: usize,
    pub overall_status: ApprovalStatus,
    /// Optimistic-lock version. Zero until the store first accepts the workflow.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Level definition supplied by a workflow originator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApprovalLevel {
    pub role: Role,
    pub approver_ids: Vec<String>,
}

/// Business request that needs a multi-level sign-off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWorkflow {
    #[serde(default)]
    pub id: Option<WorkflowId>,
    pub request_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    pub requested_by: String,
    pub approval_chain: Vec<NewApprovalLevel>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChainValidationError {
    #[error("approval chain must contain at least one level")]
    EmptyChain,
    #[error("approval level {level} has no eligible approvers and could never be satisfied")]
    NoApprovers { level: usize },
    #[error("approval level {level} lists a blank approver id")]
    BlankApprover { level: usize },
    #[error("request type must not be blank")]
    BlankRequestType,
    #[error("requester id must not be blank")]
    BlankRequester,
    #[error("workflow id must not be blank when supplied")]
    BlankId,
}

impl ApprovalWorkflow {
    pub fn new(request: NewWorkflow) -> Result<Self, ChainValidationError> {
        let id = match request.id {
            Some(WorkflowId(raw)) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(ChainValidationError::BlankId);
                }
                WorkflowId(trimmed.to_string())
            }
            None => WorkflowId::generate(),
        };

        let request_type = request.request_type.trim().to_string();
        if request_type.is_empty() {
            return Err(ChainValidationError::BlankRequestType);
        }

        let requested_by = request.requested_by.trim().to_string();
        if requested_by.is_empty() {
            return Err(ChainValidationError::BlankRequester);
        }

        if request.approval_chain.is_empty() {
            return Err(ChainValidationError::EmptyChain);
        }

        let mut approval_chain = Vec::with_capacity(request.approval_chain.len());
        for (level, definition) in request.approval_chain.into_iter().enumerate() {
            let mut approver_ids = BTreeSet::new();
            for raw in definition.approver_ids {
                let approver = raw.trim();
                if approver.is_empty() {
                    return Err(ChainValidationError::BlankApprover { level });
                }
                approver_ids.insert(ActorId::new(approver));
            }
            if approver_ids.is_empty() {
                return Err(ChainValidationError::NoApprovers { level });
            }
            approval_chain.push(ApprovalLevel::pending(definition.role, approver_ids));
        }

        let now = Utc::now();
        Ok(Self {
            id,
            request_type,
            description: request.description,
            amount: request.amount,
            requested_by: ActorId::new(requested_by),
            approval_chain,
            current_approval_level: 0,
            overall_status: ApprovalStatus::Pending,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Overall status implied by the per-level outcomes.
    pub fn derived_status(&self) -> ApprovalStatus {
        if self.approval_chain.iter().any(|level| level.status == ApprovalStatus::Rejected) {
            ApprovalStatus::Rejected
        } else if self.approval_chain.iter().all(|level| level.status == ApprovalStatus::Approved) {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Pending
        }
    }

    /// Re-checks the structural invariants of a workflow loaded from outside the engine.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        let len = self.approval_chain.len();
        if len == 0 {
            return Err(violation(&self.id, "approval chain is empty"));
        }
        if self.current_approval_level > len {
            return Err(violation(
                &self.id,
                format!("cursor {} is past chain length {len}", self.current_approval_level),
            ));
        }

        let derived = self.derived_status();
        if derived != self.overall_status {
            return Err(violation(
                &self.id,
                format!(
                    "overall status `{}` disagrees with level outcomes (`{}`)",
                    self.overall_status.as_str(),
                    derived.as_str()
                ),
            ));
        }

        if (self.current_approval_level == len) != (self.overall_status == ApprovalStatus::Approved)
        {
            return Err(violation(&self.id, "cursor reaches chain end only when fully approved"));
        }

        for (index, level) in self.approval_chain.iter().enumerate() {
            let expected = if index < self.current_approval_level {
                ApprovalStatus::Approved
            } else if index == self.current_approval_level {
                if self.overall_status == ApprovalStatus::Rejected {
                    ApprovalStatus::Rejected
                } else {
                    ApprovalStatus::Pending
                }
            } else {
                ApprovalStatus::Pending
            };
            if level.status != expected {
                return Err(violation(
                    &self.id,
                    format!(
                        "level {index} is `{}` but `{}` was expected at cursor {}",
                        level.status.as_str(),
                        expected.as_str(),
                        self.current_approval_level
                    ),
                ));
            }

            let acted = level.acted_by.is_some() && level.acted_at.is_some();
            if acted == (level.status == ApprovalStatus::Pending) {
                return Err(violation(
                    &self.id,
                    format!("level {index} action record does not match its status"),
                ));
            }
        }

        Ok(())
    }
}

fn violation(id: &WorkflowId, detail: impl std::fmt::Display) -> DomainError {
    DomainError::InvariantViolation(format!("workflow {id}: {detail}"))
}
