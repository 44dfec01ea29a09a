//! SQLite document store.
//!
//! All tables share one physical table, `documents`, keyed by
//! `(tbl, key)` with the record held as JSON text. Predicates are
//! translated to `json_extract` comparisons so filtering, ordering and
//! limits run inside SQLite.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use strata_core::error::StoreError;
use strata_core::store::{DocumentStore, InsertOutcome, Predicate, SortOrder};
use tracing::{debug, info};

/// A durable `DocumentStore` on SQLite.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

/// A scalar bound into a predicate.
enum Bind {
    Text(String),
    Int(i64),
    Real(f64),
    Bool(bool),
}

impl SqliteDocumentStore {
    /// Open (or create) a database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful
    /// for tests); it is served by a single connection so every query sees
    /// the same data.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite document store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                tbl         TEXT NOT NULL,
                key         TEXT NOT NULL,
                body        TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (tbl, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("documents table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_tbl ON documents(tbl)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("tbl index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Field names are interpolated into a JSON path, so only plain
    /// identifiers are accepted.
    fn json_path(field: &str) -> Result<String, StoreError> {
        if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::QueryFailed(format!("invalid field name: {field}")));
        }
        Ok(format!("'$.{field}'"))
    }

    fn parse_body(row: &sqlx::sqlite::SqliteRow) -> Result<Value, StoreError> {
        let body: String = row
            .try_get("body")
            .map_err(|e| StoreError::QueryFailed(format!("body column: {e}")))?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, table: &str, key: &str, record: Value) -> Result<InsertOutcome, StoreError> {
        let body = serde_json::to_string(&record)?;
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO documents (tbl, key, body, created_at, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(tbl, key) DO NOTHING",
        )
        .bind(table)
        .bind(key)
        .bind(&body)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("insert {table}/{key}: {e}")))?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn upsert(&self, table: &str, key: &str, record: Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(&record)?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO documents (tbl, key, body, created_at, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(tbl, key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        )
        .bind(table)
        .bind(key)
        .bind(&body)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("upsert {table}/{key}: {e}")))?;
        Ok(())
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT body FROM documents WHERE tbl = ? AND key = ?")
            .bind(table)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("get {table}/{key}: {e}")))?;

        row.as_ref().map(Self::parse_body).transpose()
    }

    async fn query(&self, table: &str, predicate: &Predicate) -> Result<Vec<Value>, StoreError> {
        let mut sql = String::from("SELECT body FROM documents WHERE tbl = ?");
        let mut binds = Vec::new();

        for (field, expected) in &predicate.equals {
            let path = Self::json_path(field)?;
            match expected {
                Value::Null => sql.push_str(&format!(" AND json_extract(body, {path}) IS NULL")),
                Value::String(s) => {
                    sql.push_str(&format!(" AND json_extract(body, {path}) = ?"));
                    binds.push(Bind::Text(s.clone()));
                }
                Value::Bool(b) => {
                    sql.push_str(&format!(" AND json_extract(body, {path}) = ?"));
                    binds.push(Bind::Bool(*b));
                }
                Value::Number(n) => {
                    sql.push_str(&format!(" AND json_extract(body, {path}) = ?"));
                    binds.push(match n.as_i64() {
                        Some(i) => Bind::Int(i),
                        None => Bind::Real(n.as_f64().unwrap_or(0.0)),
                    });
                }
                Value::Array(_) | Value::Object(_) => {
                    return Err(StoreError::QueryFailed(format!(
                        "non-scalar equality on field {field} is not supported"
                    )));
                }
            }
        }

        match &predicate.order_by {
            Some((field, order)) => {
                let path = Self::json_path(field)?;
                let dir = match order {
                    SortOrder::Asc => "ASC",
                    SortOrder::Desc => "DESC",
                };
                sql.push_str(&format!(" ORDER BY json_extract(body, {path}) {dir}, key ASC"));
            }
            None => sql.push_str(" ORDER BY key ASC"),
        }

        if let Some(limit) = predicate.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql).bind(table);
        for bind in binds {
            query = match bind {
                Bind::Text(s) => query.bind(s),
                Bind::Int(i) => query.bind(i),
                Bind::Real(f) => query.bind(f),
                Bind::Bool(b) => query.bind(b),
            };
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("query {table}: {e}")))?;

        rows.iter().map(Self::parse_body).collect()
    }
}
