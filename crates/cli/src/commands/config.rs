use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use adminos_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields = [
        Field {
            key: "database.url",
            value: config.database.url.clone(),
            env_keys: &["ADMINOS_DATABASE_URL"],
        },
        Field {
            key: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_keys: &["ADMINOS_DATABASE_MAX_CONNECTIONS"],
        },
        Field {
            key: "database.timeout_secs",
            value: config.database.timeout_secs.to_string(),
            env_keys: &["ADMINOS_DATABASE_TIMEOUT_SECS"],
        },
        Field {
            key: "approvals.max_write_attempts",
            value: config.approvals.max_write_attempts.to_string(),
            env_keys: &["ADMINOS_APPROVALS_MAX_WRITE_ATTEMPTS"],
        },
        Field {
            key: "approvals.retry_backoff_ms",
            value: config.approvals.retry_backoff_ms.to_string(),
            env_keys: &["ADMINOS_APPROVALS_RETRY_BACKOFF_MS"],
        },
        Field {
            key: "approvals.default_list_limit",
            value: config.approvals.default_list_limit.to_string(),
            env_keys: &["ADMINOS_APPROVALS_DEFAULT_LIST_LIMIT"],
        },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["ADMINOS_LOGGING_LEVEL", "ADMINOS_LOG_LEVEL"],
        },
        Field {
            key: "logging.format",
            value: format!("{:?}", config.logging.format).to_ascii_lowercase(),
            env_keys: &["ADMINOS_LOGGING_FORMAT", "ADMINOS_LOG_FORMAT"],
        },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    let mut data = serde_json::Map::new();
    for field in &fields {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
        data.insert(
            field.key.to_string(),
            serde_json::json!({ "value": field.value, "source": source }),
        );
    }

    CommandResult::success_with_data(
        "config",
        lines.join("\n"),
        Some(serde_json::Value::Object(data)),
    )
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("config file"));
            return format!("file ({})", file_path.display());
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, field_source};

    #[test]
    fn nested_keys_are_found_in_file_doc() {
        let doc: Value = "[approvals]\nmax_write_attempts = 4\n".parse().expect("toml");

        assert!(contains_path(&doc, "approvals.max_write_attempts"));
        assert!(!contains_path(&doc, "approvals.retry_backoff_ms"));
        assert!(!contains_path(&doc, "logging.level"));
    }

    #[test]
    fn unset_keys_fall_back_to_default_source() {
        let source = field_source("logging.level", &["ADMINOS_TEST_NEVER_SET_VAR"], None, None);
        assert_eq!(source, "default");
    }
}
