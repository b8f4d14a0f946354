use std::collections::BTreeSet;
use std::fs;
use std::future::Future;
use std::path::Path;

use adminos_core::audit::TracingAuditSink;
use adminos_core::config::{AppConfig, LoadOptions};
use adminos_core::domain::approval::{
    ActorId, ApprovalStatus, ApprovalWorkflow, NewWorkflow, WorkflowId,
};
use adminos_core::errors::{ApplicationError, InterfaceError};
use adminos_db::{
    connect_with_config, migrations, ApprovalService, SqlWorkflowRepository, WorkflowFilter,
};
use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::commands::CommandResult;
use crate::ListArgs;

type SqlApprovalService = ApprovalService<SqlWorkflowRepository, TracingAuditSink>;

#[derive(Serialize)]
struct WorkflowView {
    #[serde(flatten)]
    workflow: ApprovalWorkflow,
    pending_approvers: BTreeSet<ActorId>,
}

impl From<ApprovalWorkflow> for WorkflowView {
    fn from(workflow: ApprovalWorkflow) -> Self {
        let pending_approvers = workflow.pending_approvers();
        Self { workflow, pending_approvers }
    }
}

pub fn submit(file: &Path) -> CommandResult {
    let request = match read_request(file) {
        Ok(request) => request,
        Err(error) => {
            return CommandResult::failure(
                "workflow.submit",
                "invalid_input",
                format!("{error:#}"),
                7,
            );
        }
    };

    with_service("workflow.submit", |service, correlation_id| async move {
        let workflow = service.submit(request, &correlation_id).await?;
        Ok((format!("submitted workflow {}", workflow.id), workflow))
    })
}

pub fn show(id: &str) -> CommandResult {
    let id = WorkflowId(id.trim().to_string());
    with_service("workflow.show", |service, _| async move {
        let workflow = service.get(&id).await?;
        let message = format!("workflow {} is {}", workflow.id, workflow.overall_status.as_str());
        Ok((message, WorkflowView::from(workflow)))
    })
}

pub fn list(args: ListArgs) -> CommandResult {
    let status = match args.status.as_deref().map(|raw| (raw, ApprovalStatus::parse(raw))) {
        None => None,
        Some((_, Some(status))) => Some(status),
        Some((raw, None)) => {
            return CommandResult::failure(
                "workflow.list",
                "invalid_input",
                format!("unknown status `{raw}` (expected pending|approved|rejected)"),
                7,
            );
        }
    };

    let filter = WorkflowFilter {
        status,
        involving_actor_id: non_blank(args.involving).map(ActorId),
        awaiting_actor_id: non_blank(args.awaiting).map(ActorId),
        request_type: non_blank(args.request_type),
        limit: args.limit,
    };

    with_service("workflow.list", |service, _| async move {
        let workflows = service.list(filter).await?;
        Ok((format!("{} workflow(s)", workflows.len()), workflows))
    })
}

pub fn approve(id: &str, actor: &str, comment: Option<String>) -> CommandResult {
    let id = WorkflowId(id.trim().to_string());
    let actor = ActorId::new(actor.trim());
    with_service("workflow.approve", |service, correlation_id| async move {
        let workflow = service.approve(&id, &actor, comment, &correlation_id).await?;
        let message = match workflow.overall_status {
            ApprovalStatus::Approved => format!("workflow {} fully approved", workflow.id),
            _ => format!(
                "level {} approved; workflow {} awaits level {}",
                workflow.current_approval_level - 1,
                workflow.id,
                workflow.current_approval_level
            ),
        };
        Ok((message, workflow))
    })
}

pub fn reject(id: &str, actor: &str, reason: String) -> CommandResult {
    let id = WorkflowId(id.trim().to_string());
    let actor = ActorId::new(actor.trim());
    with_service("workflow.reject", |service, correlation_id| async move {
        let workflow = service.reject(&id, &actor, reason, &correlation_id).await?;
        Ok((
            format!("workflow {} rejected at level {}", workflow.id, workflow.current_approval_level),
            workflow,
        ))
    })
}

fn read_request(path: &Path) -> anyhow::Result<NewWorkflow> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read request file `{}`", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("request file `{}` is not a valid workflow", path.display()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

/// Loads config, opens the store with an up-to-date schema, and runs one service
/// operation. The operation's value becomes the payload's `data`.
fn with_service<F, Fut, T>(command: &str, operation: F) -> CommandResult
where
    F: FnOnce(SqlApprovalService, String) -> Fut,
    Fut: Future<Output = Result<(String, T), ApplicationError>>,
    T: Serialize,
{
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let correlation_id = format!("cli-{}", Uuid::new_v4());

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database).await.map_err(|error| {
            CommandResult::failure(command, "db_connectivity", error.to_string(), 4)
        })?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| CommandResult::failure(command, "migration", error.to_string(), 5))?;

        let service = ApprovalService::new(
            SqlWorkflowRepository::new(pool.clone()),
            TracingAuditSink,
            &config.approvals,
        );
        let outcome = operation(service, correlation_id.clone()).await;
        pool.close().await;
        Ok::<_, CommandResult>(outcome)
    });

    match result {
        Ok(Ok((message, value))) => match serde_json::to_value(&value) {
            Ok(data) => CommandResult::success_with_data(command, message, Some(data)),
            Err(error) => CommandResult::failure(command, "serialization", error.to_string(), 1),
        },
        Ok(Err(error)) => application_failure(command, error, &correlation_id),
        Err(failure) => failure,
    }
}

fn application_failure(
    command: &str,
    error: ApplicationError,
    correlation_id: &str,
) -> CommandResult {
    let error_class = error.class();
    let interface = error.into_interface(correlation_id);

    tracing::warn!(
        event_name = "cli.command.failed",
        correlation_id,
        command,
        error_class,
        error = %interface,
        "command failed"
    );

    CommandResult::failure_with_data(
        command,
        error_class,
        format!("{} ({interface})", interface.user_message()),
        exit_code(&interface),
        Some(json!({
            "correlation_id": interface.correlation_id(),
            "retryable": interface.is_retryable(),
        })),
    )
}

fn exit_code(error: &InterfaceError) -> u8 {
    match error {
        InterfaceError::Internal { .. } => 1,
        InterfaceError::ServiceUnavailable { .. } => 4,
        InterfaceError::BadRequest { .. } => 7,
        InterfaceError::Forbidden { .. } => 8,
        InterfaceError::Conflict { .. } | InterfaceError::AlreadyExists { .. } => 9,
        InterfaceError::NotFound { .. } => 10,
    }
}

#[cfg(test)]
mod tests {
    use adminos_core::domain::approval::WorkflowId;
    use adminos_core::errors::{ApplicationError, InterfaceError};

    use super::{exit_code, non_blank};

    #[test]
    fn blank_filters_are_dropped() {
        assert_eq!(non_blank(Some("  ".to_string())), None);
        assert_eq!(non_blank(Some(" u2 ".to_string())), Some("u2".to_string()));
        assert_eq!(non_blank(None), None);
    }

    #[test]
    fn exit_codes_distinguish_error_families() {
        let not_found =
            ApplicationError::NotFound(WorkflowId("WF-1".to_string())).into_interface("c");
        let stale = ApplicationError::StaleWrite {
            workflow_id: WorkflowId("WF-1".to_string()),
            expected: 1,
            actual: 2,
        }
        .into_interface("c");

        assert_eq!(exit_code(&not_found), 10);
        assert_eq!(exit_code(&stale), 9);
        let duplicate =
            ApplicationError::Duplicate(WorkflowId("WF-1".to_string())).into_interface("c");
        assert_eq!(exit_code(&duplicate), 9);
        assert!(!duplicate.is_retryable());
        assert!(matches!(stale, InterfaceError::Conflict { retryable: true, .. }));
    }
}
