use std::time::Duration;

use adminos_core::config::DatabaseConfig;
use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_config(database: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&database.url, database.max_connections, database.timeout_secs).await
}

/// Opens a SQLite pool. Every connection enforces foreign keys, since level and
/// approver rows cascade from their workflow, and waits up to `timeout_secs` on
/// busy writers instead of failing immediately.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    tracing::debug!(
        event_name = "db.connect",
        max_connections,
        timeout_secs,
        "opening sqlite pool"
    );

    let timeout = Duration::from_secs(timeout_secs.max(1));
    let busy_timeout_ms = timeout.as_millis();

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(timeout)
        .after_connect(move |conn, _meta| {
            let busy_timeout = format!("PRAGMA busy_timeout = {busy_timeout_ms}");
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query(&busy_timeout).execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use adminos_core::config::AppConfig;

    use super::{connect_with_config, connect_with_settings};

    #[tokio::test]
    async fn connections_enforce_foreign_keys() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");

        let enabled = sqlx::query("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("read pragma")
            .get::<i64, _>(0);

        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn busy_timeout_follows_configured_timeout() {
        let pool = connect_with_settings("sqlite::memory:", 1, 7).await.expect("connect");

        let busy_timeout = sqlx::query("PRAGMA busy_timeout")
            .fetch_one(&pool)
            .await
            .expect("read pragma")
            .get::<i64, _>(0);

        assert_eq!(busy_timeout, 7_000);
    }

    #[tokio::test]
    async fn connect_with_config_uses_database_section() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.database.url = format!("sqlite://{}?mode=rwc", dir.path().join("cfg.db").display());
        config.database.max_connections = 2;

        let pool = connect_with_config(&config.database).await.expect("connect");
        let one = sqlx::query("SELECT 1 AS one")
            .fetch_one(&pool)
            .await
            .expect("probe")
            .get::<i64, _>("one");

        assert_eq!(one, 1);
        pool.close().await;
    }
}
