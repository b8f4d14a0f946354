use std::time::Duration;

use adminos_core::approvals::{ApprovalAction, ApprovalEngine};
use adminos_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
};
use adminos_core::config::ApprovalsConfig;
use adminos_core::domain::approval::{ActorId, ApprovalWorkflow, NewWorkflow, WorkflowId};
use adminos_core::errors::{ApplicationError, DomainError};

use crate::repositories::{RepositoryError, WorkflowFilter, WorkflowRepository};

/// Bounded re-read-and-retry policy for decisions that lose a version race.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff_ms: 50 }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ApprovalsConfig) -> Self {
        Self { max_attempts: config.max_write_attempts.max(1), backoff_ms: config.retry_backoff_ms }
    }

    /// Delay before attempt `attempt + 1`: 1x, 2x, 4x ... the base backoff.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1_u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Store-backed entry point for submitting and deciding workflows.
pub struct ApprovalService<R, S> {
    repository: R,
    sink: S,
    engine: ApprovalEngine,
    retry: RetryPolicy,
    default_list_limit: u32,
}

impl<R, S> ApprovalService<R, S>
where
    R: WorkflowRepository,
    S: AuditSink,
{
    pub fn new(repository: R, sink: S, config: &ApprovalsConfig) -> Self {
        Self {
            repository,
            sink,
            engine: ApprovalEngine::new(),
            retry: RetryPolicy::from_config(config),
            default_list_limit: config.default_list_limit,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn submit(
        &self,
        request: NewWorkflow,
        correlation_id: &str,
    ) -> Result<ApprovalWorkflow, ApplicationError> {
        let workflow = ApprovalWorkflow::new(request)?;
        workflow.check_invariants()?;

        let stored = self.repository.put(workflow).await?;

        self.sink.emit(
            AuditEvent::new(
                Some(stored.id.clone()),
                correlation_id,
                "approval.workflow_submitted",
                AuditCategory::Workflow,
                stored.requested_by.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("request_type", stored.request_type.clone())
            .with_metadata("levels", stored.approval_chain.len().to_string()),
        );
        tracing::info!(
            event_name = "approval.workflow.submitted",
            correlation_id,
            workflow_id = %stored.id,
            request_type = %stored.request_type,
            levels = stored.approval_chain.len(),
            "approval workflow submitted"
        );

        Ok(stored)
    }

    pub async fn get(&self, id: &WorkflowId) -> Result<ApprovalWorkflow, ApplicationError> {
        self.repository.get(id).await?.ok_or_else(|| ApplicationError::NotFound(id.clone()))
    }

    pub async fn list(
        &self,
        mut filter: WorkflowFilter,
    ) -> Result<Vec<ApprovalWorkflow>, ApplicationError> {
        if filter.limit.is_none() {
            filter.limit = Some(self.default_list_limit);
        }
        Ok(self.repository.list(&filter).await?)
    }

    pub async fn approve(
        &self,
        id: &WorkflowId,
        actor_id: &ActorId,
        comment: Option<String>,
        correlation_id: &str,
    ) -> Result<ApprovalWorkflow, ApplicationError> {
        self.decide(id, actor_id, ApprovalAction::Approve { comment }, correlation_id).await
    }

    pub async fn reject(
        &self,
        id: &WorkflowId,
        actor_id: &ActorId,
        reason: String,
        correlation_id: &str,
    ) -> Result<ApprovalWorkflow, ApplicationError> {
        self.decide(id, actor_id, ApprovalAction::Reject { reason }, correlation_id).await
    }

    /// Read, decide, write. A stale write re-reads the workflow, so a decision
    /// that raced a concurrent one is re-evaluated against the newer state.
    pub async fn decide(
        &self,
        id: &WorkflowId,
        actor_id: &ActorId,
        action: ApprovalAction,
        correlation_id: &str,
    ) -> Result<ApprovalWorkflow, ApplicationError> {
        let audit = AuditContext::new(Some(id.clone()), correlation_id, actor_id.as_str());
        let mut attempt = 0_u32;

        loop {
            attempt += 1;
            let current = self.get(id).await?;

            // Events are held back until the write lands so a lost race is not audited twice.
            let pending = InMemoryAuditSink::default();
            let decided =
                self.engine.apply_with_audit(&current, actor_id, &action, &pending, &audit);
            let next = match decided {
                Ok(next) => next,
                Err(error) => {
                    self.flush(&pending);
                    tracing::warn!(
                        event_name = "approval.decision.denied",
                        correlation_id,
                        workflow_id = %id,
                        actor_id = %actor_id,
                        action = action.as_str(),
                        error_kind = error.kind(),
                        "approval decision denied"
                    );
                    return Err(ApplicationError::Domain(DomainError::Transition(error)));
                }
            };
            next.check_invariants()?;

            match self.repository.put(next).await {
                Ok(stored) => {
                    self.flush(&pending);
                    tracing::info!(
                        event_name = "approval.decision.stored",
                        correlation_id,
                        workflow_id = %stored.id,
                        actor_id = %actor_id,
                        action = action.as_str(),
                        cursor = stored.current_approval_level,
                        overall_status = stored.overall_status.as_str(),
                        version = stored.version,
                        attempt,
                        "approval decision stored"
                    );
                    return Ok(stored);
                }
                Err(RepositoryError::StaleWrite { expected, actual, .. })
                    if attempt < self.retry.max_attempts =>
                {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        event_name = "approval.decision.retry",
                        correlation_id,
                        workflow_id = %id,
                        expected,
                        actual,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "concurrent modification detected, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "approval.decision.write_failed",
                        correlation_id,
                        workflow_id = %id,
                        attempt,
                        error = %error,
                        "approval decision could not be stored"
                    );
                    return Err(error.into());
                }
            }
        }
    }

    fn flush(&self, pending: &InMemoryAuditSink) {
        for event in pending.events() {
            self.sink.emit(event);
        }
    }
}
