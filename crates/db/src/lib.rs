pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use repositories::{
    InMemoryWorkflowRepository, RepositoryError, SqlWorkflowRepository, WorkflowFilter,
    WorkflowRepository,
};
pub use service::{ApprovalService, RetryPolicy};
