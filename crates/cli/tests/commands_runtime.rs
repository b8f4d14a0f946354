use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use adminos_cli::commands::{config, doctor, migrate, workflow};
use adminos_cli::ListArgs;
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_valid_env() {
    let dir = TempDir::new().expect("tempdir");
    let url = database_url(dir.path());
    with_env(&[("ADMINOS_DATABASE_URL", url.as_str())], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["applied_versions"].as_array().map(Vec::len), Some(1));
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("ADMINOS_DATABASE_URL", "postgres://localhost/adminos")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_reports_env_sources() {
    with_env(&[("ADMINOS_APPROVALS_MAX_WRITE_ATTEMPTS", "4")], || {
        let result = config::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        let field = &payload["data"]["approvals.max_write_attempts"];
        assert_eq!(field["value"], "4");
        assert_eq!(field["source"], "env (ADMINOS_APPROVALS_MAX_WRITE_ATTEMPTS)");
        assert_eq!(payload["data"]["logging.level"]["source"], "default");
    });
}

#[test]
fn doctor_reports_pending_migrations_then_passes() {
    let dir = TempDir::new().expect("tempdir");
    let url = database_url(dir.path());
    with_env(&[("ADMINOS_DATABASE_URL", url.as_str())], || {
        let before = doctor::run(true);
        let report = parse_payload(&before.output);
        assert_eq!(before.exit_code, 1);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(check_status(&report, "database_connectivity"), "pass");
        assert_eq!(check_status(&report, "schema_migrations"), "fail");

        assert_eq!(migrate::run().exit_code, 0);

        let after = doctor::run(true);
        let report = parse_payload(&after.output);
        assert_eq!(after.exit_code, 0);
        assert_eq!(report["overall_status"], "pass");
    });
}

#[test]
fn two_level_workflow_runs_end_to_end() {
    let dir = TempDir::new().expect("tempdir");
    let url = database_url(dir.path());
    let request = write_request(
        dir.path(),
        "WF-CLI-1",
        r#"[
            {"role": "dept_manager", "approver_ids": ["u1"]},
            {"role": "finance_director", "approver_ids": ["u2"]}
        ]"#,
    );

    with_env(&[("ADMINOS_DATABASE_URL", url.as_str())], || {
        let submitted = parse_payload(&workflow::submit(&request).output);
        assert_eq!(submitted["status"], "ok");
        assert_eq!(submitted["data"]["id"], "WF-CLI-1");
        assert_eq!(submitted["data"]["version"], 1);

        let outsider = workflow::approve("WF-CLI-1", "u2", None);
        assert_eq!(outsider.exit_code, 8);
        assert_eq!(parse_payload(&outsider.output)["error_class"], "not_authorized");

        let first = parse_payload(&workflow::approve("WF-CLI-1", "u1", None).output);
        assert_eq!(first["data"]["current_approval_level"], 1);
        assert_eq!(first["data"]["overall_status"], "pending");

        let pending = parse_payload(&workflow::show("WF-CLI-1").output);
        assert_eq!(pending["data"]["pending_approvers"], serde_json::json!(["u2"]));
        assert_eq!(pending["data"]["id"], "WF-CLI-1");

        let awaiting = workflow::list(ListArgs {
            awaiting: Some("u2".to_string()),
            ..ListArgs::default()
        });
        let awaiting = parse_payload(&awaiting.output);
        assert_eq!(awaiting["data"].as_array().map(Vec::len), Some(1));

        let second = workflow::approve("WF-CLI-1", "u2", Some("within budget".to_string()));
        let second = parse_payload(&second.output);
        assert_eq!(second["data"]["current_approval_level"], 2);
        assert_eq!(second["data"]["overall_status"], "approved");

        let late = workflow::reject("WF-CLI-1", "u2", "too late".to_string());
        assert_eq!(late.exit_code, 9);
        let late = parse_payload(&late.output);
        assert_eq!(late["error_class"], "already_terminal");
        assert_eq!(late["data"]["retryable"], false);
        let message = late["message"].as_str().unwrap_or_default();
        assert!(message.starts_with("This request has already been decided."));

        let shown = parse_payload(&workflow::show("WF-CLI-1").output);
        assert_eq!(shown["data"]["approval_chain"][1]["comments"], "within budget");
        assert_eq!(shown["data"]["pending_approvers"], serde_json::json!([]));
    });
}

#[test]
fn rejection_keeps_cursor_and_blocks_later_approvals() {
    let dir = TempDir::new().expect("tempdir");
    let url = database_url(dir.path());
    let request = write_request(
        dir.path(),
        "WF-CLI-2",
        r#"[
            {"role": "dept_manager", "approver_ids": ["u1"]},
            {"role": "finance_director", "approver_ids": ["u2"]}
        ]"#,
    );

    with_env(&[("ADMINOS_DATABASE_URL", url.as_str())], || {
        assert_eq!(workflow::submit(&request).exit_code, 0);

        let blank = workflow::reject("WF-CLI-2", "u1", "   ".to_string());
        assert_eq!(blank.exit_code, 7);
        assert_eq!(parse_payload(&blank.output)["error_class"], "invalid_input");

        let rejected = workflow::reject("WF-CLI-2", "u1", "over budget".to_string());
        let rejected = parse_payload(&rejected.output);
        assert_eq!(rejected["data"]["overall_status"], "rejected");
        assert_eq!(rejected["data"]["current_approval_level"], 0);

        let later = workflow::approve("WF-CLI-2", "u2", None);
        assert_eq!(parse_payload(&later.output)["error_class"], "already_terminal");

        let listed = workflow::list(ListArgs {
            status: Some("rejected".to_string()),
            ..ListArgs::default()
        });
        assert_eq!(parse_payload(&listed.output)["data"].as_array().map(Vec::len), Some(1));
    });
}

#[test]
fn submit_rejects_empty_chain_and_bad_files() {
    let dir = TempDir::new().expect("tempdir");
    let url = database_url(dir.path());
    let empty_chain = write_request(dir.path(), "WF-CLI-3", "[]");

    with_env(&[("ADMINOS_DATABASE_URL", url.as_str())], || {
        let result = workflow::submit(&empty_chain);
        assert_eq!(result.exit_code, 7);
        assert_eq!(parse_payload(&result.output)["error_class"], "chain_validation");

        let single_level = r#"[{"role": "admin", "approver_ids": ["u1"]}]"#;
        let first = write_request(dir.path(), "WF-CLI-4", single_level);
        assert_eq!(workflow::submit(&first).exit_code, 0);
        let duplicate = workflow::submit(&first);
        assert_eq!(duplicate.exit_code, 9);
        let duplicate = parse_payload(&duplicate.output);
        assert_eq!(duplicate["error_class"], "duplicate");
        assert_eq!(duplicate["data"]["retryable"], false);

        let blank_id = write_request(dir.path(), " ", single_level);
        let blank = workflow::submit(&blank_id);
        assert_eq!(blank.exit_code, 7);
        assert_eq!(parse_payload(&blank.output)["error_class"], "chain_validation");

        let missing = workflow::submit(&dir.path().join("missing.json"));
        assert_eq!(missing.exit_code, 7);
        assert_eq!(parse_payload(&missing.output)["error_class"], "invalid_input");

        let unknown = workflow::show("WF-NOPE");
        assert_eq!(unknown.exit_code, 10);
        assert_eq!(parse_payload(&unknown.output)["error_class"], "not_found");

        let bad_status =
            workflow::list(ListArgs { status: Some("stuck".to_string()), ..ListArgs::default() });
        assert_eq!(bad_status.exit_code, 7);
    });
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", dir.join("adminos-test.db").display())
}

fn write_request(dir: &Path, id: &str, chain: &str) -> std::path::PathBuf {
    let path = dir.join(format!("{id}.json"));
    let body = format!(
        r#"{{
            "id": "{id}",
            "request_type": "expense",
            "description": "Conference travel",
            "amount": "1250.50",
            "requested_by": "emp-1",
            "approval_chain": {chain}
        }}"#
    );
    fs::write(&path, body).expect("write request file");
    path
}

fn check_status(report: &Value, name: &str) -> String {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or_default()
        .to_string()
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "ADMINOS_DATABASE_URL",
        "ADMINOS_DATABASE_MAX_CONNECTIONS",
        "ADMINOS_DATABASE_TIMEOUT_SECS",
        "ADMINOS_APPROVALS_MAX_WRITE_ATTEMPTS",
        "ADMINOS_APPROVALS_RETRY_BACKOFF_MS",
        "ADMINOS_APPROVALS_DEFAULT_LIST_LIMIT",
        "ADMINOS_LOGGING_LEVEL",
        "ADMINOS_LOGGING_FORMAT",
        "ADMINOS_LOG_LEVEL",
        "ADMINOS_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
