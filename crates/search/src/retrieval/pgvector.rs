//! Vector similarity search using pgvector
//!
//! Reads the `chunks` table written by the ingestion job:
//! `(id bigserial, source_id text, ordinal int, week int, lecture int,
//!   content text, embedding vector)`

use async_trait::async_trait;
use lectern_common::db::DbPool;
use lectern_common::errors::{AppError, Result};
use sea_orm::{DbBackend, FromQueryResult, Statement, Value};

use super::{ChunkMetadata, DocumentChunk, MetadataFilter, ScoredChunk, VectorIndex};

/// Vector index backed by a Postgres table
pub struct PgVectorIndex {
    db: DbPool,
    table: String,
}

#[derive(Debug, FromQueryResult)]
struct ChunkRow {
    source_id: String,
    ordinal: i32,
    week: Option<i32>,
    lecture: Option<i32>,
    content: String,
    score: Option<f64>,
}

impl From<ChunkRow> for ScoredChunk {
    fn from(row: ChunkRow) -> Self {
        ScoredChunk {
            score: row.score.unwrap_or_default() as f32,
            chunk: DocumentChunk {
                text: row.content,
                metadata: ChunkMetadata {
                    source_id: row.source_id,
                    ordinal: row.ordinal.max(0) as u32,
                    week: row.week.map(|w| w.max(0) as u32),
                    lecture: row.lecture.map(|l| l.max(0) as u32),
                },
            },
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct SourceRow {
    source_id: String,
}

#[derive(Debug, FromQueryResult)]
struct CountRow {
    count: i64,
}

fn retrieval(err: sea_orm::DbErr) -> AppError {
    AppError::Retrieval {
        message: format!("Vector search failed: {}", err),
    }
}

/// Render an embedding as a pgvector literal
pub(crate) fn vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Filter clause shared by search and scan; binds start at `$first`.
fn filter_clause(filter: &MetadataFilter, first: usize) -> (String, Vec<Value>) {
    let sql = format!(
        "(${a}::text IS NULL OR source_id = ${a}) \
         AND (${b}::int IS NULL OR week = ${b}) \
         AND (${c}::int IS NULL OR lecture = ${c})",
        a = first,
        b = first + 1,
        c = first + 2
    );
    let values = vec![
        filter.source_id.clone().into(),
        filter.week.map(|w| w as i32).into(),
        filter.lecture.map(|l| l as i32).into(),
    ];
    (sql, values)
}

impl PgVectorIndex {
    /// `table` must be a plain identifier; it is interpolated into SQL.
    pub fn new(db: DbPool, table: &str) -> Result<Self> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if !valid {
            return Err(AppError::configuration(format!(
                "invalid index table name '{table}'"
            )));
        }
        Ok(Self {
            db,
            table: table.to_string(),
        })
    }

    fn search_statement(&self, embedding: &[f32], k: usize, filter: &MetadataFilter) -> Statement {
        let (clause, mut values) = filter_clause(filter, 2);
        let sql = format!(
            r#"
            SELECT source_id, ordinal, week, lecture, content,
                   1 - (embedding <=> $1::vector) AS score
            FROM {table}
            WHERE {clause}
            ORDER BY embedding <=> $1::vector, id
            LIMIT $5
            "#,
            table = self.table,
        );
        let mut binds: Vec<Value> = vec![vector_literal(embedding).into()];
        binds.append(&mut values);
        binds.push((k as i64).into());
        Statement::from_sql_and_values(DbBackend::Postgres, sql, binds)
    }

    fn scan_statement(&self, filter: &MetadataFilter, limit: usize) -> Statement {
        let (clause, mut values) = filter_clause(filter, 1);
        let sql = format!(
            r#"
            SELECT source_id, ordinal, week, lecture, content, NULL::float8 AS score
            FROM {table}
            WHERE {clause}
            ORDER BY ordinal, id
            LIMIT $4
            "#,
            table = self.table,
        );
        values.push((limit as i64).into());
        Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = ChunkRow::find_by_statement(self.search_statement(embedding, k, filter))
            .all(self.db.read())
            .await
            .map_err(retrieval)?;
        Ok(rows.into_iter().map(ScoredChunk::from).collect())
    }

    async fn scan(&self, filter: &MetadataFilter, limit: usize) -> Result<Vec<DocumentChunk>> {
        let rows = ChunkRow::find_by_statement(self.scan_statement(filter, limit))
            .all(self.db.read())
            .await
            .map_err(retrieval)?;
        Ok(rows.into_iter().map(|r| ScoredChunk::from(r).chunk).collect())
    }

    async fn sources(&self) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT source_id FROM {} ORDER BY source_id",
            self.table
        );
        let rows = SourceRow::find_by_statement(Statement::from_string(DbBackend::Postgres, sql))
            .all(self.db.read())
            .await
            .map_err(retrieval)?;
        Ok(rows.into_iter().map(|r| r.source_id).collect())
    }

    async fn len(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*)::bigint AS count FROM {}", self.table);
        let row = CountRow::find_by_statement(Statement::from_string(DbBackend::Postgres, sql))
            .one(self.db.read())
            .await
            .map_err(retrieval)?;
        Ok(row.map(|r| r.count.max(0) as usize).unwrap_or(0))
    }

    fn dimension(&self) -> Option<usize> {
        None
    }

    fn backend(&self) -> &'static str {
        "pgvector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn index() -> PgVectorIndex {
        let conn = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        PgVectorIndex::new(DbPool::from_connection(conn), "chunks").unwrap()
    }

    #[test]
    fn test_embedding_format() {
        assert_eq!(vector_literal(&[0.1, 0.2, 0.3]), "[0.1,0.2,0.3]");
    }

    #[test]
    fn test_search_statement_binds_filter() {
        let filter = MetadataFilter {
            source_id: Some("Week_1_Lecture_2.pdf".to_string()),
            week: None,
            lecture: Some(2),
        };
        let stmt = index().search_statement(&[1.0, 0.0], 3, &filter);
        assert!(stmt.sql.contains("ORDER BY embedding <=> $1::vector, id"));
        assert!(stmt.sql.contains("LIMIT $5"));
        assert_eq!(stmt.values.map(|v| v.0.len()), Some(5));
    }

    #[test]
    fn test_scan_statement_orders_by_ordinal() {
        let stmt = index().scan_statement(&MetadataFilter::week(3), 10);
        assert!(stmt.sql.contains("ORDER BY ordinal, id"));
        assert!(stmt.sql.contains("LIMIT $4"));
    }

    #[test]
    fn test_rejects_unsafe_table_names() {
        let conn = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let pool = DbPool::from_connection(conn);
        assert!(PgVectorIndex::new(pool.clone(), "chunks; DROP TABLE x").is_err());
        assert!(PgVectorIndex::new(pool, "").is_err());
    }
}
