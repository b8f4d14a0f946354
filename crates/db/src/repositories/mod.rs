use async_trait::async_trait;
use thiserror::Error;

use adminos_core::domain::approval::{ActorId, ApprovalStatus, ApprovalWorkflow, WorkflowId};
use adminos_core::errors::ApplicationError;

pub mod memory;
pub mod workflow;

pub use memory::InMemoryWorkflowRepository;
pub use workflow::SqlWorkflowRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("stale write for workflow {workflow_id}: expected version {expected}, stored {actual}")]
    StaleWrite { workflow_id: WorkflowId, expected: u32, actual: u32 },
    #[error("workflow {0} already exists")]
    AlreadyExists(WorkflowId),
    #[error("workflow {0} not found")]
    NotFound(WorkflowId),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::StaleWrite { workflow_id, expected, actual } => {
                Self::StaleWrite { workflow_id, expected, actual }
            }
            RepositoryError::AlreadyExists(workflow_id) => Self::Duplicate(workflow_id),
            RepositoryError::NotFound(workflow_id) => Self::NotFound(workflow_id),
            other => Self::Persistence(other.to_string()),
        }
    }
}

/// Listing criteria. Unset fields do not filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkflowFilter {
    pub status: Option<ApprovalStatus>,
    /// Requester, approver at any level, or actor on any level.
    pub involving_actor_id: Option<ActorId>,
    /// Pending workflows whose current level lists this actor.
    pub awaiting_actor_id: Option<ActorId>,
    pub request_type: Option<String>,
    pub limit: Option<u32>,
}

impl WorkflowFilter {
    pub fn matches(&self, workflow: &ApprovalWorkflow) -> bool {
        if self.status.is_some_and(|status| workflow.overall_status != status) {
            return false;
        }
        if let Some(actor) = &self.involving_actor_id {
            if !workflow.involves(actor) {
                return false;
            }
        }
        if let Some(actor) = &self.awaiting_actor_id {
            if !workflow.is_awaiting(actor) {
                return false;
            }
        }
        if let Some(request_type) = &self.request_type {
            if &workflow.request_type != request_type {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn get(&self, id: &WorkflowId) -> Result<Option<ApprovalWorkflow>, RepositoryError>;

    /// Stores `workflow` if its `version` matches the stored one (zero for a new
    /// workflow) and returns the stored copy carrying the incremented version.
    async fn put(&self, workflow: ApprovalWorkflow) -> Result<ApprovalWorkflow, RepositoryError>;

    /// Newest first, ties broken by id.
    async fn list(&self, filter: &WorkflowFilter) -> Result<Vec<ApprovalWorkflow>, RepositoryError>;
}

#[async_trait]
impl<R> WorkflowRepository for std::sync::Arc<R>
where
    R: WorkflowRepository + ?Sized,
{
    async fn get(&self, id: &WorkflowId) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        (**self).get(id).await
    }

    async fn put(&self, workflow: ApprovalWorkflow) -> Result<ApprovalWorkflow, RepositoryError> {
        (**self).put(workflow).await
    }

    async fn list(&self, filter: &WorkflowFilter) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        (**self).list(filter).await
    }
}

#[cfg(test)]
mod tests {
    use adminos_core::domain::approval::{
        ActorId, ApprovalStatus, ApprovalWorkflow, NewApprovalLevel, NewWorkflow, WorkflowId,
    };
    use adminos_core::domain::role::Role;
    use adminos_core::errors::ApplicationError;

    use super::{RepositoryError, WorkflowFilter};

    fn workflow() -> ApprovalWorkflow {
        ApprovalWorkflow::new(NewWorkflow {
            id: Some(WorkflowId("WF-F1".to_string())),
            request_type: "expense".to_string(),
            description: String::new(),
            amount: None,
            requested_by: "emp-1".to_string(),
            approval_chain: vec![
                NewApprovalLevel { role: Role::DeptManager, approver_ids: vec!["u1".to_string()] },
                NewApprovalLevel {
                    role: Role::FinanceDirector,
                    approver_ids: vec!["u2".to_string()],
                },
            ],
        })
        .expect("valid workflow")
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(WorkflowFilter::default().matches(&workflow()));
    }

    #[test]
    fn awaiting_filter_only_matches_current_level() {
        let workflow = workflow();
        let awaiting_u1 =
            WorkflowFilter { awaiting_actor_id: Some(ActorId::new("u1")), ..Default::default() };
        let awaiting_u2 =
            WorkflowFilter { awaiting_actor_id: Some(ActorId::new("u2")), ..Default::default() };
        let involving_u2 =
            WorkflowFilter { involving_actor_id: Some(ActorId::new("u2")), ..Default::default() };

        assert!(awaiting_u1.matches(&workflow));
        assert!(!awaiting_u2.matches(&workflow));
        assert!(involving_u2.matches(&workflow));
    }

    #[test]
    fn status_and_request_type_filters_combine() {
        let workflow = workflow();
        let filter = WorkflowFilter {
            status: Some(ApprovalStatus::Pending),
            request_type: Some("leave".to_string()),
            ..Default::default()
        };

        assert!(!filter.matches(&workflow));
    }

    #[test]
    fn repository_errors_map_to_application_errors() {
        let stale = ApplicationError::from(RepositoryError::StaleWrite {
            workflow_id: WorkflowId("WF-1".to_string()),
            expected: 1,
            actual: 2,
        });
        let decode = ApplicationError::from(RepositoryError::Decode("bad row".to_string()));

        let duplicate =
            ApplicationError::from(RepositoryError::AlreadyExists(WorkflowId("WF-1".to_string())));

        assert_eq!(stale.class(), "stale_write");
        assert_eq!(duplicate.class(), "duplicate");
        assert!(matches!(decode, ApplicationError::Persistence(ref message) if message.contains("bad row")));
    }
}
