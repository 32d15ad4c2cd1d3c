use crate::common::error::{CoreError, Result};
use libsql::{Builder, Connection, Database};
use tracing::info;

pub struct DatabaseManager {
    db: Database,
}

impl DatabaseManager {
    /// Connect to Turso when `url` is a `libsql://`, `http(s)://` or `ws(s)://` URL,
    /// otherwise open a local database file (an optional `file:` prefix is stripped).
    pub async fn new(url: &str, auth_token: Option<&str>) -> Result<Self> {
        let is_remote = ["libsql://", "http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| url.starts_with(scheme));

        let db = if is_remote {
            info!("Connecting to Turso database at {}", url);
            Builder::new_remote(url.to_string(), auth_token.unwrap_or_default().to_string())
                .build()
                .await
        } else {
            let path = url.strip_prefix("file:").unwrap_or(url);
            info!("Opening local database at {}", path);
            Builder::new_local(path).build().await
        }
        .map_err(|e| CoreError::database(format!("Failed to connect to database: {e}")))?;

        Ok(Self { db })
    }

    /// Get a connection to the database
    pub async fn get_connection(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| CoreError::database(format!("Failed to get database connection: {e}")))
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");

        let conn = self.get_connection().await?;

        // Apply base schema
        let migration_sql_001 = include_str!("../migrations/001_create_gym_schema.sql");
        conn.execute_batch(migration_sql_001)
            .await
            .map_err(|e| CoreError::database(format!("Failed to run base migration: {e}")))?;

        // Apply indexes
        let migration_sql_002 = include_str!("../migrations/002_indexes.sql");
        conn.execute_batch(migration_sql_002)
            .await
            .map_err(|e| CoreError::database(format!("Failed to run index migration: {e}")))?;

        info!("Database migrations completed successfully");
        Ok(())
    }
}
