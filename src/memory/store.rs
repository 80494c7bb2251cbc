//! SQLite-backed implementations of the three store contracts.
//!
//! The stores may share one database file, but each only ever touches its
//! own table, so they fail and commit independently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::memory::schema::{initialize_schema, is_initialized};
use crate::memory::traits::{GraphStore, RecordStore, VectorStore};
use crate::memory::types::*;

/// Shared SQLite connection.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage)?;

        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(storage)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        initialize_schema(&conn).map_err(storage)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Internal(format!("Storage task failed: {}", e)))?
    }
}

fn storage(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

/// `SQLITE_CONSTRAINT_UNIQUE`; NOT NULL and primary-key failures are not duplicates.
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == SQLITE_CONSTRAINT_UNIQUE
    )
}

fn content_hash(content: &str) -> String {
    Sha256::digest(content.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn parse_id(raw: String, column: usize) -> rusqlite::Result<MemoryId> {
    MemoryId::parse(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_datetime(raw: String, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

// ==================== Record store ====================

/// Record store over the `memories` table.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: SqliteDatabase,
}

impl SqliteRecordStore {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert(&self, content: &str) -> Result<MemoryId> {
        let id = MemoryId::new();
        let content = content.to_string();
        let row_id = id.clone();

        self.db
            .with_conn(move |conn| {
                let now = Utc::now().to_rfc3339();
                conn.execute(
                    "INSERT INTO memories (id, content, content_hash, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![row_id.to_string(), content, content_hash(&content), now],
                )
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        Error::duplicate_content(&content)
                    } else {
                        storage(e)
                    }
                })?;
                Ok(())
            })
            .await?;

        Ok(id)
    }

    async fn get(&self, id: &MemoryId) -> Result<Option<MemoryRecord>> {
        let id = id.to_string();
        self.db
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT id, content, created_at, updated_at FROM memories WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(MemoryRecord {
                            id: parse_id(row.get(0)?, 0)?,
                            content: row.get(1)?,
                            created_at: parse_datetime(row.get(2)?, 2)?,
                            updated_at: parse_datetime(row.get(3)?, 3)?,
                        })
                    },
                )
                .optional()
                .map_err(storage)
            })
            .await
    }

    async fn update(&self, id: &MemoryId, content: &str) -> Result<()> {
        let target = id.clone();
        let content = content.to_string();
        self.db
            .with_conn(move |conn| {
                let rows = conn
                    .execute(
                        "UPDATE memories SET content = ?2, content_hash = ?3, updated_at = ?4
                         WHERE id = ?1",
                        params![
                            target.to_string(),
                            content,
                            content_hash(&content),
                            Utc::now().to_rfc3339()
                        ],
                    )
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            Error::duplicate_content(&content)
                        } else {
                            storage(e)
                        }
                    })?;
                if rows == 0 {
                    return Err(Error::NotFound { id: target });
                }
                Ok(())
            })
            .await
    }

    async fn count(&self) -> Result<u64> {
        self.db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM memories", [], |row| {
                    row.get::<_, i64>(0)
                })
                .map(|n| n as u64)
                .map_err(storage)
            })
            .await
    }

    async fn clear_all(&self) -> Result<()> {
        self.db
            .with_conn(|conn| {
                conn.execute("DELETE FROM memories", []).map_err(storage)?;
                Ok(())
            })
            .await
    }
}

// ==================== Vector store ====================

/// Brute-force cosine vector store over the `vectors` table.
#[derive(Clone)]
pub struct SqliteVectorStore {
    db: SqliteDatabase,
    dimensions: usize,
}

impl SqliteVectorStore {
    pub fn new(db: SqliteDatabase, dimensions: usize) -> Self {
        Self { db, dimensions }
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::InvalidDimension {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, id: &MemoryId, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;
        let id = id.to_string();
        let blob = encode_vector(vector);
        let dimensions = self.dimensions as i64;

        self.db
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO vectors (id, embedding, dimensions, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                        embedding = excluded.embedding,
                        dimensions = excluded.dimensions,
                        updated_at = excluded.updated_at",
                    params![id, blob, dimensions, Utc::now().to_rfc3339()],
                )
                .map_err(storage)?;
                Ok(())
            })
            .await
    }

    async fn search(&self, vector: &[f32], limit: usize, metric: Metric) -> Result<Vec<ScoredId>> {
        self.check_dimensions(vector)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = vector.to_vec();

        self.db
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT id, embedding FROM vectors")
                    .map_err(storage)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((parse_id(row.get(0)?, 0)?, row.get::<_, Vec<u8>>(1)?))
                    })
                    .map_err(storage)?;

                let mut hits = Vec::new();
                for row in rows {
                    let (id, blob) = row.map_err(storage)?;
                    let score = match metric {
                        Metric::Cosine => cosine_similarity(&query, &decode_vector(&blob)),
                    };
                    hits.push(ScoredId::new(id, score));
                }

                hits.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.id.cmp(&b.id))
                });
                hits.truncate(limit);
                Ok(hits)
            })
            .await
    }

    async fn count(&self) -> Result<u64> {
        self.db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(storage)
            })
            .await
    }

    async fn clear_all(&self) -> Result<()> {
        self.db
            .with_conn(|conn| {
                conn.execute("DELETE FROM vectors", []).map_err(storage)?;
                Ok(())
            })
            .await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ==================== Graph store ====================

/// Adjacency-list graph store over the `adjacency` table.
#[derive(Clone)]
pub struct SqliteGraphStore {
    db: SqliteDatabase,
}

impl SqliteGraphStore {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn add_symmetric_edge(&self, a: &MemoryId, b: &MemoryId) -> Result<()> {
        let (a, b) = (a.to_string(), b.to_string());
        self.db
            .with_conn(move |conn| {
                let now = Utc::now().to_rfc3339();
                let tx = conn.transaction().map_err(storage)?;
                for (from, to) in [(&a, &b), (&b, &a)] {
                    tx.execute(
                        "INSERT OR IGNORE INTO adjacency (node_id, neighbor_id, created_at)
                         VALUES (?1, ?2, ?3)",
                        params![from, to, now],
                    )
                    .map_err(storage)?;
                }
                tx.commit().map_err(storage)
            })
            .await
    }

    async fn neighbors(&self, id: &MemoryId) -> Result<Vec<MemoryId>> {
        let id = id.to_string();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT neighbor_id FROM adjacency WHERE node_id = ?1 ORDER BY rowid")
                    .map_err(storage)?;
                let rows = stmt
                    .query_map(params![id], |row| parse_id(row.get(0)?, 0))
                    .map_err(storage)?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage)
            })
            .await
    }

    async fn get_adjacency(&self) -> Result<Adjacency> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn
                    .prepare("SELECT node_id, neighbor_id FROM adjacency ORDER BY rowid")
                    .map_err(storage)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((parse_id(row.get(0)?, 0)?, parse_id(row.get(1)?, 1)?))
                    })
                    .map_err(storage)?;

                let mut adjacency = Adjacency::new();
                for row in rows {
                    let (node, neighbor) = row.map_err(storage)?;
                    adjacency.entry(node).or_default().push(neighbor);
                }
                Ok(adjacency)
            })
            .await
    }

    async fn edge_count(&self) -> Result<u64> {
        self.db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM adjacency WHERE node_id <= neighbor_id",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .map(|n| n as u64)
                .map_err(storage)
            })
            .await
    }

    async fn clear_all(&self) -> Result<()> {
        self.db
            .with_conn(|conn| {
                conn.execute("DELETE FROM adjacency", []).map_err(storage)?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stores() -> (SqliteRecordStore, SqliteVectorStore, SqliteGraphStore) {
        let db = SqliteDatabase::in_memory().unwrap();
        (
            SqliteRecordStore::new(db.clone()),
            SqliteVectorStore::new(db.clone(), 3),
            SqliteGraphStore::new(db),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get_record() {
        let (records, _, _) = stores();
        let id = records.insert("User enjoys hiking").await.unwrap();

        let record = records.get(&id).await.unwrap().unwrap();
        assert_eq!(record.content, "User enjoys hiking");
        assert_eq!(record.id, id);
        assert!(records.get(&MemoryId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_content_rejected() {
        let (records, _, _) = stores();
        records.insert("User lives in Pune").await.unwrap();

        let err = records.insert("User lives in Pune").await.unwrap_err();
        assert!(matches!(err, Error::DuplicateContent { .. }));
        assert_eq!(records.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_only_unique_index_failures_are_duplicates() {
        let db = SqliteDatabase::in_memory().unwrap();
        let records = SqliteRecordStore::new(db.clone());
        let id = records.insert("User lives in Pune").await.unwrap();

        let (duplicate, primary_key, not_null) = db
            .with_conn(move |conn| {
                let insert = "INSERT INTO memories (id, content, content_hash, created_at, updated_at)
                              VALUES (?1, ?2, ?3, 'now', 'now')";
                let duplicate = conn
                    .execute(insert, params![MemoryId::new().to_string(), "x", content_hash("User lives in Pune")])
                    .unwrap_err();
                let primary_key = conn
                    .execute(insert, params![id.to_string(), "y", content_hash("y")])
                    .unwrap_err();
                let not_null = conn
                    .execute(
                        "INSERT INTO memories (id, content, content_hash, created_at, updated_at)
                         VALUES (?1, NULL, 'h', 'now', 'now')",
                        params![MemoryId::new().to_string()],
                    )
                    .unwrap_err();
                Ok((duplicate, primary_key, not_null))
            })
            .await
            .unwrap();

        assert!(is_unique_violation(&duplicate));
        assert!(!is_unique_violation(&primary_key));
        assert!(!is_unique_violation(&not_null));
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_is_an_error() {
        let db = SqliteDatabase::in_memory().unwrap();
        let records = SqliteRecordStore::new(db.clone());
        let id = records.insert("User owns a dog").await.unwrap();

        let row = id.to_string();
        db.with_conn(move |conn| {
            conn.execute(
                "UPDATE memories SET created_at = 'yesterday' WHERE id = ?1",
                params![row],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
        .unwrap();

        let err = records.get(&id).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_update_record() {
        let (records, _, _) = stores();
        let id = records.insert("User owns a dog").await.unwrap();
        let other = records.insert("User owns a cat").await.unwrap();

        records.update(&id, "User owns a dog named Bruno").await.unwrap();
        assert_eq!(
            records.get(&id).await.unwrap().unwrap().content,
            "User owns a dog named Bruno"
        );

        // Same content on the same record is not a violation.
        records.update(&id, "User owns a dog named Bruno").await.unwrap();

        let err = records.update(&other, "User owns a dog named Bruno").await.unwrap_err();
        assert!(matches!(err, Error::DuplicateContent { .. }));

        let missing = MemoryId::new();
        let err = records.update(&missing, "anything").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { id } if id == missing));
    }

    #[tokio::test]
    async fn test_vector_upsert_replaces() {
        let (_, vectors, _) = stores();
        let id = MemoryId::new();

        vectors.upsert(&id, &[1.0, 0.0, 0.0]).await.unwrap();
        vectors.upsert(&id, &[0.0, 1.0, 0.0]).await.unwrap();
        assert_eq!(vectors.count().await.unwrap(), 1);

        let hits = vectors.search(&[0.0, 1.0, 0.0], 5, Metric::Cosine).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_vector_dimension_checked() {
        let (_, vectors, _) = stores();
        let err = vectors.upsert(&MemoryId::new(), &[1.0, 0.0]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { expected: 3, got: 2 }));

        let err = vectors.search(&[1.0], 5, Metric::Cosine).await.unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { .. }));
    }

    #[tokio::test]
    async fn test_vector_search_ranks_and_limits() {
        let (_, vectors, _) = stores();
        let near = MemoryId::new();
        let mid = MemoryId::new();
        let far = MemoryId::new();
        vectors.upsert(&far, &[0.0, 0.0, 1.0]).await.unwrap();
        vectors.upsert(&near, &[1.0, 0.1, 0.0]).await.unwrap();
        vectors.upsert(&mid, &[1.0, 1.0, 0.0]).await.unwrap();

        let hits = vectors.search(&[1.0, 0.0, 0.0], 2, Metric::Cosine).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.clone()).collect();
        assert_eq!(ids, vec![near, mid]);
        assert!(hits[0].score >= hits[1].score);

        assert!(vectors.search(&[1.0, 0.0, 0.0], 0, Metric::Cosine).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_vector_store_search() {
        let (_, vectors, _) = stores();
        let hits = vectors.search(&[1.0, 0.0, 0.0], 10, Metric::Cosine).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_symmetric_edges_are_idempotent() {
        let (_, _, graph) = stores();
        let a = MemoryId::new();
        let b = MemoryId::new();

        graph.add_symmetric_edge(&a, &b).await.unwrap();
        graph.add_symmetric_edge(&a, &b).await.unwrap();
        graph.add_symmetric_edge(&b, &a).await.unwrap();

        assert_eq!(graph.neighbors(&a).await.unwrap(), vec![b.clone()]);
        assert_eq!(graph.neighbors(&b).await.unwrap(), vec![a.clone()]);
        assert_eq!(graph.edge_count().await.unwrap(), 1);

        let adjacency = graph.get_adjacency().await.unwrap();
        assert_eq!(adjacency.len(), 2);
        assert_eq!(adjacency[&a], vec![b]);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (records, vectors, graph) = stores();
        let id = records.insert("fact").await.unwrap();
        vectors.upsert(&id, &[1.0, 0.0, 0.0]).await.unwrap();
        graph.add_symmetric_edge(&id, &MemoryId::new()).await.unwrap();

        records.clear_all().await.unwrap();
        vectors.clear_all().await.unwrap();
        graph.clear_all().await.unwrap();

        assert_eq!(records.count().await.unwrap(), 0);
        assert_eq!(vectors.count().await.unwrap(), 0);
        assert!(graph.get_adjacency().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memories.db");

        let id = {
            let records = SqliteRecordStore::new(SqliteDatabase::open(&path).unwrap());
            records.insert("User prefers tea").await.unwrap()
        };

        let records = SqliteRecordStore::new(SqliteDatabase::open(&path).unwrap());
        let record = records.get(&id).await.unwrap().unwrap();
        assert_eq!(record.content, "User prefers tea");
    }
}
