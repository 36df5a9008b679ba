use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::debug;

use crate::collection::{CollectionRef, DocumentCollection};
use crate::db::memory::document_id;
use crate::document::{ChangeSpec, Condition, FieldMap, UpdateReport};
use crate::error::{StoreError, StoreResult};

pub type SqlitePool = Pool<Sqlite>;

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    fields TEXT NOT NULL,
    PRIMARY KEY (collection, id)
)";

/// SQLite-backed document store. Documents are JSON text rows keyed by
/// (collection, id); conditional operations run inside an IMMEDIATE
/// transaction so concurrent writers on the same file serialize at the
/// database instead of racing between read and write.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(path: &Path, max_connections: u32) -> Result<Self> {
        let max_connections = max_connections.max(1);
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to database: {}", path.display()))?;

        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("failed to create documents table")?;

        debug!(path = %path.display(), max_connections, "opened sqlite document store");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn collection(&self, name: &str) -> CollectionRef {
        std::sync::Arc::new(SqliteCollection {
            pool: self.pool.clone(),
            name: name.to_owned(),
        })
    }
}

pub struct SqliteCollection {
    pool: SqlitePool,
    name: String,
}

impl SqliteCollection {
    async fn load_candidates(
        &self,
        conn: &mut SqliteConnection,
        filter: &Condition,
    ) -> StoreResult<Vec<(String, FieldMap)>> {
        let rows: Vec<(String, String)> = if let Some(id) = filter.id_constraint() {
            sqlx::query_as("SELECT id, fields FROM documents WHERE collection = ? AND id = ?")
                .bind(&self.name)
                .bind(id)
                .fetch_all(&mut *conn)
                .await?
        } else {
            sqlx::query_as("SELECT id, fields FROM documents WHERE collection = ? ORDER BY id")
                .bind(&self.name)
                .fetch_all(&mut *conn)
                .await?
        };

        let mut docs = Vec::with_capacity(rows.len());
        for (id, fields) in rows {
            let doc: FieldMap = serde_json::from_str(&fields)?;
            docs.push((id, doc));
        }
        Ok(docs)
    }

    async fn write_back(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        doc: &FieldMap,
    ) -> StoreResult<()> {
        let fields = serde_json::to_string(doc)?;
        sqlx::query("UPDATE documents SET fields = ? WHERE collection = ? AND id = ?")
            .bind(fields)
            .bind(&self.name)
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn update_in_tx(
        &self,
        conn: &mut SqliteConnection,
        filter: &Condition,
        change: &ChangeSpec,
    ) -> StoreResult<UpdateReport> {
        let candidates = self.load_candidates(conn, filter).await?;
        let mut report = UpdateReport::default();
        for (id, mut doc) in candidates {
            if !filter.matches(&doc) {
                continue;
            }
            report.matched += 1;
            let before = doc.clone();
            change.apply(&mut doc)?;
            if doc != before {
                self.write_back(conn, &id, &doc).await?;
                report.modified += 1;
            }
        }
        Ok(report)
    }

    async fn find_and_modify_in_tx(
        &self,
        conn: &mut SqliteConnection,
        filter: &Condition,
        change: &ChangeSpec,
    ) -> StoreResult<Option<FieldMap>> {
        let candidates = self.load_candidates(conn, filter).await?;
        for (id, mut doc) in candidates {
            if filter.matches(&doc) {
                change.apply(&mut doc)?;
                self.write_back(conn, &id, &doc).await?;
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    async fn begin_immediate(&self) -> StoreResult<sqlx::pool::PoolConnection<Sqlite>> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(conn.as_mut())
            .await?;
        Ok(conn)
    }

    async fn finish_tx<T>(
        &self,
        conn: &mut SqliteConnection,
        result: StoreResult<T>,
    ) -> StoreResult<T> {
        match result {
            Ok(value) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(value)
            }
            Err(err) => {
                debug!(collection = %self.name, "rolling back failed conditional write");
                // A failed rollback leaves the pooled connection unusable;
                // the original error is still the one worth keeping.
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl DocumentCollection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, filter: &Condition) -> StoreResult<Option<FieldMap>> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
        let candidates = self.load_candidates(conn.as_mut(), filter).await?;
        Ok(candidates
            .into_iter()
            .map(|(_, doc)| doc)
            .find(|doc| filter.matches(doc)))
    }

    async fn insert(&self, doc: FieldMap) -> StoreResult<()> {
        let id = document_id(&self.name, &doc)?;
        let fields = serde_json::to_string(&doc)?;
        let result = sqlx::query("INSERT INTO documents (collection, id, fields) VALUES (?, ?, ?)")
            .bind(&self.name)
            .bind(&id)
            .bind(fields)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::already_exists(&self.name, id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update(&self, filter: &Condition, change: &ChangeSpec) -> StoreResult<UpdateReport> {
        let mut conn = self.begin_immediate().await?;
        let result = self.update_in_tx(conn.as_mut(), filter, change).await;
        self.finish_tx(conn.as_mut(), result).await
    }

    async fn find_and_modify(
        &self,
        filter: &Condition,
        change: &ChangeSpec,
    ) -> StoreResult<Option<FieldMap>> {
        let mut conn = self.begin_immediate().await?;
        let result = self.find_and_modify_in_tx(conn.as_mut(), filter, change).await;
        self.finish_tx(conn.as_mut(), result).await
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_error) = err {
        return db_error.message().contains("UNIQUE constraint failed");
    }
    false
}
