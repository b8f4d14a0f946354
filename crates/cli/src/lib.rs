pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use adminos_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "adminos",
    about = "AdminOS approvals operator CLI",
    long_about = "Submit, inspect, and decide multi-level approval workflows, and operate the backing store.",
    after_help = "Examples:\n  adminos migrate\n  adminos workflow submit --file expense.json\n  adminos workflow approve --id WF-1 --actor u1 --comment \"within budget\"\n  adminos workflow list --awaiting u2"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, and schema migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Submit, inspect, and decide approval workflows")]
    Workflow(WorkflowCommand),
}

#[derive(Debug, Subcommand)]
enum WorkflowCommand {
    #[command(about = "Create a workflow from a JSON request document")]
    Submit {
        #[arg(long, help = "Path to the JSON request document")]
        file: PathBuf,
    },
    #[command(about = "Show one workflow with its full approval chain")]
    Show {
        #[arg(long)]
        id: String,
    },
    #[command(about = "List workflows, newest first")]
    List(ListArgs),
    #[command(about = "Approve the current level of a workflow")]
    Approve {
        #[arg(long)]
        id: String,
        #[arg(long, help = "Identity of the approving user")]
        actor: String,
        #[arg(long)]
        comment: Option<String>,
    },
    #[command(about = "Reject a workflow at its current level")]
    Reject {
        #[arg(long)]
        id: String,
        #[arg(long, help = "Identity of the rejecting user")]
        actor: String,
        #[arg(long, help = "Reason recorded on the rejecting level")]
        reason: String,
    },
}

#[derive(Debug, Default, Args)]
pub struct ListArgs {
    #[arg(long, help = "pending | approved | rejected")]
    pub status: Option<String>,
    #[arg(long, help = "Workflows the actor requested, approves, or acted on")]
    pub involving: Option<String>,
    #[arg(long, help = "Pending workflows waiting on the actor's decision")]
    pub awaiting: Option<String>,
    #[arg(long = "request-type")]
    pub request_type: Option<String>,
    #[arg(long)]
    pub limit: Option<u32>,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Workflow(command) => match command {
            WorkflowCommand::Submit { file } => commands::workflow::submit(&file),
            WorkflowCommand::Show { id } => commands::workflow::show(&id),
            WorkflowCommand::List(args) => commands::workflow::list(args),
            WorkflowCommand::Approve { id, actor, comment } => {
                commands::workflow::approve(&id, &actor, comment)
            }
            WorkflowCommand::Reject { id, actor, reason } => {
                commands::workflow::reject(&id, &actor, reason)
            }
        },
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout carries only the command payload.
/// `ADMINOS_LOG_FILTER` takes a full `EnvFilter` directive and wins over `logging.level`.
pub fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_env("ADMINOS_LOG_FILTER")
        .unwrap_or_else(|_| EnvFilter::new(logging.level.trim().to_ascii_lowercase()));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = match logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
