//! Database layer for Lectern
//!
//! Provides:
//! - SeaORM entity for the conversation history table
//! - Session history stores (SQL and in-memory)
//! - Connection pool management and schema bootstrap

pub mod history;
pub mod models;

pub use history::{HistoryStore, MemoryHistoryStore, SqlHistoryStore};
pub use models::chat_turn::ConversationTurn;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

fn connect_options(url: &str, config: &DatabaseConfig) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);
    opts
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let primary = Database::connect(connect_options(&config.url, config))
            .await
            .map_err(|e| AppError::configuration(format!("Failed to connect to primary: {}", e)))?;

        let replica = match config.read_url.as_deref() {
            Some(read_url) => {
                info!("Connecting to read replica...");
                let conn = Database::connect(connect_options(read_url, config))
                    .await
                    .map_err(|e| {
                        AppError::configuration(format!("Failed to connect to replica: {}", e))
                    })?;
                Some(conn)
            }
            None => None,
        };

        info!("Database connections established");

        let pool = Self { primary, replica };
        if config.auto_migrate {
            pool.ensure_schema().await?;
        }
        Ok(pool)
    }

    /// Wrap an existing connection (tests, embedded hosts)
    pub fn from_connection(primary: DatabaseConnection) -> Self {
        Self { primary, replica: None }
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Create the history table when it does not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        let backend = self.primary.get_database_backend();
        let schema = Schema::new(backend);
        let mut stmt = schema.create_table_from_entity(models::chat_turn::Entity);
        stmt.if_not_exists();

        self.primary.execute(backend.build(&stmt)).await?;
        info!(table = "chat_history", "History schema ready");
        Ok(())
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary.execute_unprepared("SELECT 1").await?;

        if let Some(ref replica) = self.replica {
            replica.execute_unprepared("SELECT 1").await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_bootstrap_is_repeatable() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Default::default()
        };
        let pool = DbPool::new(&config).await.unwrap();
        tokio_test::assert_ok!(pool.ensure_schema().await);
        tokio_test::assert_ok!(pool.ping().await);
    }
}
