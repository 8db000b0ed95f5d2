//! Session history stores
//!
//! A session is never a standing object: it is whatever `load_history`
//! returns for a user, in insertion order.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveValue::NotSet, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use tokio::sync::RwLock;

use super::models::chat_turn::{self, ConversationTurn};
use super::DbPool;
use crate::errors::{AppError, Result};

/// Durable per-user log of conversation turns
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// All turns for `user_id` in creation order; empty when none exist.
    async fn load_history(&self, user_id: i64) -> Result<Vec<ConversationTurn>>;

    /// Record one turn with a single atomic write.
    async fn append_turn(&self, user_id: i64, query: &str, response: &str)
        -> Result<ConversationTurn>;

    /// Remove every turn for `user_id`; returns how many were removed.
    async fn clear_history(&self, user_id: i64) -> Result<u64>;

    /// Backend name for logs
    fn backend(&self) -> &'static str;
}

fn persistence(err: sea_orm::DbErr) -> AppError {
    AppError::Persistence {
        message: err.to_string(),
    }
}

/// History store over the `chat_history` table
#[derive(Clone)]
pub struct SqlHistoryStore {
    pool: DbPool,
}

impl SqlHistoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for SqlHistoryStore {
    async fn load_history(&self, user_id: i64) -> Result<Vec<ConversationTurn>> {
        // Always the primary: the next turn must see the one just appended
        chat_turn::Entity::find()
            .filter(chat_turn::Column::UserId.eq(user_id))
            .order_by_asc(chat_turn::Column::Id)
            .all(self.pool.write())
            .await
            .map_err(persistence)
    }

    async fn append_turn(
        &self,
        user_id: i64,
        query: &str,
        response: &str,
    ) -> Result<ConversationTurn> {
        let created_at = Utc::now();
        let row = chat_turn::ActiveModel {
            id: NotSet,
            user_id: Set(user_id),
            query: Set(query.to_string()),
            response: Set(response.to_string()),
            created_at: Set(created_at),
        };

        // Single INSERT statement; the row is either fully written or absent.
        let inserted = chat_turn::Entity::insert(row)
            .exec(self.pool.write())
            .await
            .map_err(persistence)?;

        Ok(ConversationTurn {
            id: inserted.last_insert_id,
            user_id,
            query: query.to_string(),
            response: response.to_string(),
            created_at,
        })
    }

    async fn clear_history(&self, user_id: i64) -> Result<u64> {
        let result = chat_turn::Entity::delete_many()
            .filter(chat_turn::Column::UserId.eq(user_id))
            .exec(self.pool.write())
            .await
            .map_err(persistence)?;
        Ok(result.rows_affected)
    }

    fn backend(&self) -> &'static str {
        "sql"
    }
}

#[derive(Default)]
struct MemoryState {
    next_id: i32,
    turns: HashMap<i64, Vec<ConversationTurn>>,
}

/// Process-local history store for development and tests
#[derive(Default)]
pub struct MemoryHistoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load_history(&self, user_id: i64) -> Result<Vec<ConversationTurn>> {
        let state = self.state.read().await;
        Ok(state.turns.get(&user_id).cloned().unwrap_or_default())
    }

    async fn append_turn(
        &self,
        user_id: i64,
        query: &str,
        response: &str,
    ) -> Result<ConversationTurn> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let turn = ConversationTurn {
            id: state.next_id,
            user_id,
            query: query.to_string(),
            response: response.to_string(),
            created_at: Utc::now(),
        };
        state.turns.entry(user_id).or_default().push(turn.clone());
        Ok(turn)
    }

    async fn clear_history(&self, user_id: i64) -> Result<u64> {
        let mut state = self.state.write().await;
        Ok(state
            .turns
            .remove(&user_id)
            .map(|turns| turns.len() as u64)
            .unwrap_or(0))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use sea_orm::ConnectionTrait;

    async fn sqlite_store() -> SqlHistoryStore {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        SqlHistoryStore::new(DbPool::new(&config).await.unwrap())
    }

    async fn assert_ordering(store: &dyn HistoryStore) {
        for i in 0..5 {
            store
                .append_turn(7, &format!("q{i}"), &format!("r{i}"))
                .await
                .unwrap();
        }
        store.append_turn(8, "other", "user").await.unwrap();

        let turns = store.load_history(7).await.unwrap();
        let queries: Vec<_> = turns.iter().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, ["q0", "q1", "q2", "q3", "q4"]);
        assert!(turns.windows(2).all(|w| w[0].id < w[1].id));
    }

    async fn assert_round_trip(store: &dyn HistoryStore) {
        store.append_turn(11, "Q", "R").await.unwrap();
        let last = store.load_history(11).await.unwrap().pop().unwrap();
        assert_eq!(last.query, "Q");
        assert_eq!(last.response, "R");
        assert_eq!(last.user_id, 11);
    }

    async fn assert_idempotent_clear(store: &dyn HistoryStore) {
        store.append_turn(3, "a", "b").await.unwrap();
        store.append_turn(3, "c", "d").await.unwrap();

        assert_eq!(store.clear_history(3).await.unwrap(), 2);
        assert!(store.load_history(3).await.unwrap().is_empty());

        assert_eq!(store.clear_history(3).await.unwrap(), 0);
        assert!(store.load_history(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user_has_empty_history() {
        let store = sqlite_store().await;
        assert!(store.load_history(404).await.unwrap().is_empty());
        assert!(MemoryHistoryStore::new().load_history(404).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sql_history_ordering() {
        assert_ordering(&sqlite_store().await).await;
    }

    #[tokio::test]
    async fn test_sql_round_trip() {
        assert_round_trip(&sqlite_store().await).await;
    }

    #[tokio::test]
    async fn test_sql_reads_ignore_replica() {
        // Two separate in-memory databases; only the primary gets the schema
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            read_url: Some("sqlite::memory:".to_string()),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let store = SqlHistoryStore::new(DbPool::new(&config).await.unwrap());
        assert!(store.pool.replica.is_some());

        assert_round_trip(&store).await;
        assert_ordering(&store).await;
    }

    #[tokio::test]
    async fn test_sql_idempotent_clear() {
        assert_idempotent_clear(&sqlite_store().await).await;
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        assert_ordering(&MemoryHistoryStore::new()).await;
        assert_round_trip(&MemoryHistoryStore::new()).await;
        assert_idempotent_clear(&MemoryHistoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_sql_failure_is_persistence_error() {
        let store = sqlite_store().await;
        store
            .pool
            .write()
            .execute_unprepared("DROP TABLE chat_history")
            .await
            .unwrap();

        assert!(matches!(
            store.append_turn(1, "q", "r").await,
            Err(AppError::Persistence { .. })
        ));
        assert!(matches!(
            store.load_history(1).await,
            Err(AppError::Persistence { .. })
        ));
    }
}
