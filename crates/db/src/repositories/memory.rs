use std::collections::HashMap;

use tokio::sync::RwLock;

use adminos_core::domain::approval::{ApprovalWorkflow, WorkflowId};

use super::{RepositoryError, WorkflowFilter, WorkflowRepository};

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<HashMap<String, ApprovalWorkflow>>,
}

#[async_trait::async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn get(&self, id: &WorkflowId) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        Ok(workflows.get(&id.0).cloned())
    }

    async fn put(&self, workflow: ApprovalWorkflow) -> Result<ApprovalWorkflow, RepositoryError> {
        let mut workflows = self.workflows.write().await;
        let actual = workflows.get(&workflow.id.0).map(|stored| stored.version);

        let mut stored = workflow;
        match actual {
            None if stored.version == 0 => {}
            None => return Err(RepositoryError::NotFound(stored.id)),
            Some(_) if stored.version == 0 => {
                return Err(RepositoryError::AlreadyExists(stored.id));
            }
            Some(actual) if actual != stored.version => {
                return Err(RepositoryError::StaleWrite {
                    workflow_id: stored.id,
                    expected: stored.version,
                    actual,
                });
            }
            Some(_) => {}
        }

        stored.version += 1;
        workflows.insert(stored.id.0.clone(), stored.clone());
        Ok(stored)
    }

    async fn list(&self, filter: &WorkflowFilter) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        let mut matching: Vec<ApprovalWorkflow> =
            workflows.values().filter(|workflow| filter.matches(workflow)).cloned().collect();
        matching.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| left.id.cmp(&right.id))
        });
        if let Some(limit) = filter.limit {
            matching.truncate(limit as usize);
        }
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use adminos_core::chrono::Duration;

    use adminos_core::approvals::ApprovalEngine;
    use adminos_core::domain::approval::{
        ActorId, ApprovalStatus, ApprovalWorkflow, NewApprovalLevel, NewWorkflow, WorkflowId,
    };
    use adminos_core::domain::role::Role;

    use crate::repositories::{
        InMemoryWorkflowRepository, RepositoryError, WorkflowFilter, WorkflowRepository,
    };

    fn single_level(id: &str, approver: &str) -> ApprovalWorkflow {
        ApprovalWorkflow::new(NewWorkflow {
            id: Some(WorkflowId(id.to_string())),
            request_type: "leave".to_string(),
            description: "Two days off".to_string(),
            amount: None,
            requested_by: "emp-7".to_string(),
            approval_chain: vec![NewApprovalLevel {
                role: Role::HrManager,
                approver_ids: vec![approver.to_string()],
            }],
        })
        .expect("valid workflow")
    }

    #[tokio::test]
    async fn in_memory_put_and_get_round_trip() {
        let repo = InMemoryWorkflowRepository::default();
        let workflow = single_level("WF-M1", "hr-1");

        let stored = repo.put(workflow.clone()).await.expect("insert");
        let found = repo.get(&workflow.id).await.expect("get");

        assert_eq!(stored.version, 1);
        assert_eq!(found, Some(stored));
    }

    #[tokio::test]
    async fn in_memory_stale_put_is_rejected_and_record_kept() {
        let repo = InMemoryWorkflowRepository::default();
        let engine = ApprovalEngine::new();
        let stored = repo.put(single_level("WF-M2", "hr-1")).await.expect("insert");

        let approved = engine.approve_at_level(&stored, &ActorId::new("hr-1"), None).expect("ok");
        let rejected =
            engine.reject_at_level(&stored, &ActorId::new("hr-1"), "overlaps release").expect("ok");

        repo.put(approved).await.expect("first write");
        let error = repo.put(rejected).await.expect_err("stale write");

        assert!(matches!(error, RepositoryError::StaleWrite { expected: 1, actual: 2, .. }));
        let found = repo.get(&stored.id).await.expect("get").expect("exists");
        assert_eq!(found.overall_status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn in_memory_second_insert_with_same_id_already_exists() {
        let repo = InMemoryWorkflowRepository::default();
        let stored = repo.put(single_level("WF-M6", "hr-1")).await.expect("insert");

        let error = repo.put(single_level("WF-M6", "hr-2")).await.expect_err("duplicate id");
        assert!(matches!(error, RepositoryError::AlreadyExists(ref id) if id.0 == "WF-M6"));

        let found = repo.get(&stored.id).await.expect("get").expect("exists");
        assert_eq!(found, stored);
    }

    #[tokio::test]
    async fn in_memory_unknown_versioned_put_is_not_found() {
        let repo = InMemoryWorkflowRepository::default();
        let mut workflow = single_level("WF-M3", "hr-1");
        workflow.version = 1;

        let error = repo.put(workflow).await.expect_err("not found");
        assert!(matches!(error, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn in_memory_list_orders_newest_first_and_limits() {
        let repo = InMemoryWorkflowRepository::default();
        let first = single_level("WF-M4", "hr-1");
        let mut second = single_level("WF-M5", "hr-2");
        second.created_at = first.created_at + Duration::seconds(5);

        repo.put(first).await.expect("insert first");
        repo.put(second).await.expect("insert second");

        let all = repo.list(&WorkflowFilter::default()).await.expect("list");
        assert_eq!(all[0].id.0, "WF-M5");
        assert_eq!(all[1].id.0, "WF-M4");

        let awaiting = repo
            .list(&WorkflowFilter {
                awaiting_actor_id: Some(ActorId::new("hr-1")),
                limit: Some(5),
                ..Default::default()
            })
            .await
            .expect("awaiting");
        assert_eq!(awaiting.len(), 1);
        assert_eq!(awaiting[0].id.0, "WF-M4");

        let limited =
            repo.list(&WorkflowFilter { limit: Some(1), ..Default::default() }).await.expect("list");
        assert_eq!(limited.len(), 1);
    }
}
