//! # nb-store-sqlite Implementation
//!
//! This module implements the `DocumentStore` port on top of SQLite. Every
//! collection shares one `documents` table; bodies are JSON text and filters
//! and sorts go through `json_extract`.

use async_trait::async_trait;
use nb_core::error::{AppError, Result};
use nb_core::query::{apply_update, document_id, Direction, Document, Filter, Mutation, Query, WriteBatch};
use nb_core::traits::DocumentStore;
use nb_core::fields;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id         TEXT NOT NULL,
    body       TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE INDEX IF NOT EXISTS documents_user_id     ON documents (collection, json_extract(body, '$.user_id'));
CREATE INDEX IF NOT EXISTS documents_topic_id    ON documents (collection, json_extract(body, '$.topic_id'));
CREATE INDEX IF NOT EXISTS documents_node_id     ON documents (collection, json_extract(body, '$.node_id'));
CREATE INDEX IF NOT EXISTS documents_category_id ON documents (collection, json_extract(body, '$.category_id'));
CREATE INDEX IF NOT EXISTS documents_username    ON documents (collection, json_extract(body, '$.username'));
CREATE INDEX IF NOT EXISTS documents_slug        ON documents (collection, json_extract(body, '$.slug'));
";

/// How long a writer waits for the database lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

/// Connectivity problems are transient; everything else is internal.
fn map_sqlx(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::WorkerCrashed => AppError::Unavailable(err.to_string()),
        sqlx::Error::Database(db) if db.message().contains("locked") || db.message().contains("busy") => {
            AppError::Unavailable(err.to_string())
        }
        _ => AppError::Internal(err.to_string()),
    }
}

/// JSON path for a document field. Field names are restricted so they can be
/// inlined into SQL.
fn json_path(field: &str) -> Result<String> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::Internal(format!("unsupported field name {field:?}")));
    }
    Ok(format!("$.{field}"))
}

fn decode_body(body: &str) -> Result<Document> {
    match serde_json::from_str(body)? {
        Value::Object(document) => Ok(document),
        _ => Err(AppError::Corrupt("stored body is not a JSON object".into())),
    }
}

fn push_where(qb: &mut QueryBuilder<'_, Sqlite>, collection: &str, filter: &Filter) -> Result<()> {
    qb.push(" WHERE collection = ");
    qb.push_bind(collection.to_string());

    for (field, value) in &filter.clauses {
        qb.push(" AND ");
        if field == fields::ID {
            qb.push("id");
        } else {
            // Literal path, so the expression indexes in SCHEMA apply.
            qb.push(format!("json_extract(body, '{}')", json_path(field)?));
        }

        match value {
            Value::Null => {
                qb.push(" IS NULL");
            }
            Value::Bool(flag) => {
                // json_extract yields 1/0 for true/false
                qb.push(" = ");
                qb.push_bind(i64::from(*flag));
            }
            Value::Number(number) => {
                qb.push(" = ");
                match number.as_i64() {
                    Some(int) => qb.push_bind(int),
                    None => qb.push_bind(number.as_f64().unwrap_or(f64::NAN)),
                };
            }
            Value::String(text) => {
                qb.push(" = ");
                qb.push_bind(text.clone());
            }
            Value::Array(_) | Value::Object(_) => {
                qb.push(" = json(");
                qb.push_bind(value.to_string());
                qb.push(")");
            }
        }
    }
    Ok(())
}

impl SqliteDocumentStore {
    /// Opens (creating if needed) the database at `url` and ensures the schema.
    ///
    /// # Developer Note
    /// `sqlite::memory:` databases live and die with their connection, so
    /// those pools are pinned to a single connection that never expires.
    pub async fn new(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(map_sqlx)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        if !in_memory {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let mut pool_options = SqlitePoolOptions::new().max_connections(8);
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await.map_err(map_sqlx)?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(map_sqlx)?;
        tracing::info!(url, "sqlite document store ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT body FROM documents");
        push_where(&mut qb, collection, filter)?;
        qb.push(" ORDER BY id LIMIT 1");

        let row = qb.build().fetch_optional(&self.pool).await.map_err(map_sqlx)?;
        match row {
            Some(row) => {
                let body: String = row.try_get("body").map_err(map_sqlx)?;
                Ok(Some(decode_body(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT body FROM documents");
        push_where(&mut qb, collection, &query.filter)?;

        qb.push(" ORDER BY ");
        for key in &query.sort {
            let column = if key.field == fields::ID {
                "id".to_string()
            } else {
                format!("json_extract(body, '{}')", json_path(&key.field)?)
            };
            let direction = match key.direction {
                Direction::Ascending => "ASC",
                Direction::Descending => "DESC",
            };
            qb.push(format!("{column} {direction}, "));
        }
        // Natural order: by id
        qb.push("id ASC");

        if let Some(limit) = query.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }

        qb.build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .into_iter()
            .map(|row| {
                let body: String = row.try_get("body").map_err(map_sqlx)?;
                decode_body(&body)
            })
            .collect()
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM documents");
        push_where(&mut qb, collection, filter)?;

        let row = qb.build().fetch_one(&self.pool).await.map_err(map_sqlx)?;
        let n: i64 = row.try_get("n").map_err(map_sqlx)?;
        Ok(n as u64)
    }

    /// Applies the batch inside one transaction.
    ///
    /// # Developer Note
    /// `BEGIN IMMEDIATE` takes the write lock before the first read, so
    /// concurrent batches wait on `busy_timeout` instead of failing the
    /// read-to-write lock upgrade. Any early return drops `tx`, which rolls
    /// back everything staged so far.
    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await.map_err(map_sqlx)?;

        for op in &batch.ops {
            match op {
                Mutation::Insert { collection, document } => {
                    let id = document_id(document)?;
                    let inserted = sqlx::query("INSERT INTO documents (collection, id, body) VALUES (?, ?, ?)")
                        .bind(collection.as_str())
                        .bind(id)
                        .bind(serde_json::to_string(document)?)
                        .execute(&mut *tx)
                        .await;
                    match inserted {
                        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                            return Err(AppError::Conflict(format!("{collection}/{id} already exists")));
                        }
                        other => {
                            other.map_err(map_sqlx)?;
                        }
                    }
                }
                Mutation::Delete { collection, id } => {
                    let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
                        .bind(collection.as_str())
                        .bind(id.to_string())
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx)?;
                    if result.rows_affected() == 0 {
                        return Err(AppError::NotFound(collection.clone(), id.to_string()));
                    }
                }
                Mutation::Set { collection, id, .. }
                | Mutation::Increment { collection, id, .. }
                | Mutation::AddToSet { collection, id, .. }
                | Mutation::Pull { collection, id, .. }
                | Mutation::Expect { collection, id, .. } => {
                    let body: Option<String> =
                        sqlx::query_scalar("SELECT body FROM documents WHERE collection = ? AND id = ?")
                            .bind(collection.as_str())
                            .bind(id.to_string())
                            .fetch_optional(&mut *tx)
                            .await
                            .map_err(map_sqlx)?;

                    let Some(body) = body else {
                        return Err(match op {
                            Mutation::Expect { field, value, .. } => AppError::Conflict(format!(
                                "{collection}/{id}: expected {field} = {value}, document is gone"
                            )),
                            _ => AppError::NotFound(collection.clone(), id.to_string()),
                        });
                    };

                    let mut document = decode_body(&body)?;
                    apply_update(&mut document, op)?;
                    if matches!(op, Mutation::Expect { .. }) {
                        continue;
                    }

                    sqlx::query("UPDATE documents SET body = ? WHERE collection = ? AND id = ?")
                        .bind(serde_json::to_string(&document)?)
                        .bind(collection.as_str())
                        .bind(id.to_string())
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx)?;
                }
            }
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }
}
