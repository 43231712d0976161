//! Vector store: three level collections with cosine KNN search.
//!
//! [`VectorStore`] is the injection seam; [`SqliteVectorStore`] backs it with
//! sqlite-vec `vec0` virtual tables in a database file separate from the
//! metadata store, so cross-store consistency is a real protocol rather than
//! a single transaction. Transient SQLite failures are retried with bounded
//! exponential backoff before surfacing as store-unavailable.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::types::MemoryLevel;
use super::{bytes_to_vector, l2_to_cosine, vector_to_bytes};
use crate::encoding::FUSED_DIM;
use crate::error::{Error, Result};

/// Initial backoff delay for transient failures.
const RETRY_INITIAL: Duration = Duration::from_millis(100);
/// Maximum attempts before a transient failure becomes unavailable.
const RETRY_ATTEMPTS: u32 = 5;

/// One search hit: the vector key and its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub vector_ref: String,
    pub score: f64,
}

/// Capability set of the vector store.
///
/// Guarantees: inserts are atomic per call and upsert on conflict; deletes
/// are idempotent; search results are sorted by descending score with ties
/// broken by ascending ref.
pub trait VectorStore: Send + Sync {
    fn insert(
        &self,
        level: MemoryLevel,
        vector_ref: &str,
        vector: &[f32],
        source_path: Option<&str>,
    ) -> Result<()>;

    fn delete(&self, level: MemoryLevel, vector_ref: &str) -> Result<()>;

    /// Fetch a stored vector back by ref.
    fn fetch(&self, level: MemoryLevel, vector_ref: &str) -> Result<Option<Vec<f32>>>;

    /// KNN search within one collection, optionally filtered by the
    /// `source_path` payload field.
    fn search(
        &self,
        level: MemoryLevel,
        query: &[f32],
        k: usize,
        source_path: Option<&str>,
    ) -> Result<Vec<VectorHit>>;

    /// Search several collections with one call; used by retrieval seeding.
    fn batch_search(
        &self,
        levels: &[MemoryLevel],
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(MemoryLevel, Vec<VectorHit>)>> {
        levels
            .iter()
            .map(|level| Ok((*level, self.search(*level, query, k, None)?)))
            .collect()
    }

    /// Every ref in a collection; used by the reconciliation sweep.
    fn list_refs(&self, level: MemoryLevel) -> Result<Vec<String>>;
}

/// sqlite-vec implementation: one `vec0` table per collection plus a payload
/// side table for filterable fields.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

impl SqliteVectorStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        crate::db::load_sqlite_vec();
        let conn = Connection::open(path).map_err(|e| {
            Error::Fatal(format!(
                "failed to open vector database at {}: {e}",
                path.display()
            ))
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", "5000")?;
        Self::init_collections(&conn)?;
        tracing::info!(path = %path.display(), "vector database initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory variant for tests and ephemeral setups.
    pub fn open_in_memory() -> Result<Self> {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Fatal(format!("failed to open in-memory vector db: {e}")))?;
        Self::init_collections(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_collections(conn: &Connection) -> Result<()> {
        for level in MemoryLevel::ALL {
            conn.execute_batch(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING vec0(
                    vector_ref TEXT PRIMARY KEY,
                    embedding FLOAT[{FUSED_DIM}]
                );",
                level.collection()
            ))
            .map_err(|e| Error::Fatal(format!("failed to create vector collection: {e}")))?;
        }
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vector_payloads (
                collection TEXT NOT NULL,
                vector_ref TEXT NOT NULL,
                source_path TEXT,
                PRIMARY KEY (collection, vector_ref)
            );",
        )
        .map_err(|e| Error::Fatal(format!("failed to create payload table: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Fatal("vector store lock poisoned".into()))
    }
}

impl VectorStore for SqliteVectorStore {
    fn insert(
        &self,
        level: MemoryLevel,
        vector_ref: &str,
        vector: &[f32],
        source_path: Option<&str>,
    ) -> Result<()> {
        if vector.len() != FUSED_DIM {
            return Err(Error::Validation(format!(
                "vector has {} dimensions, expected {FUSED_DIM}",
                vector.len()
            )));
        }
        with_retry(|| {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            // vec0 has no ON CONFLICT support; delete-then-insert is the upsert
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE vector_ref = ?1",
                    level.collection()
                ),
                params![vector_ref],
            )?;
            tx.execute(
                &format!(
                    "INSERT INTO {} (vector_ref, embedding) VALUES (?1, ?2)",
                    level.collection()
                ),
                params![vector_ref, vector_to_bytes(vector)],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO vector_payloads (collection, vector_ref, source_path) \
                 VALUES (?1, ?2, ?3)",
                params![level.collection(), vector_ref, source_path],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn delete(&self, level: MemoryLevel, vector_ref: &str) -> Result<()> {
        with_retry(|| {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE vector_ref = ?1",
                    level.collection()
                ),
                params![vector_ref],
            )?;
            tx.execute(
                "DELETE FROM vector_payloads WHERE collection = ?1 AND vector_ref = ?2",
                params![level.collection(), vector_ref],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn fetch(&self, level: MemoryLevel, vector_ref: &str) -> Result<Option<Vec<f32>>> {
        with_retry(|| {
            let conn = self.lock()?;
            let bytes: Option<Vec<u8>> = conn
                .query_row(
                    &format!(
                        "SELECT embedding FROM {} WHERE vector_ref = ?1",
                        level.collection()
                    ),
                    params![vector_ref],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(bytes.map(|b| bytes_to_vector(&b)))
        })
    }

    fn search(
        &self,
        level: MemoryLevel,
        query: &[f32],
        k: usize,
        source_path: Option<&str>,
    ) -> Result<Vec<VectorHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        // Overfetch when filtering so payload misses don't starve the result.
        let knn_limit = if source_path.is_some() { k * 4 } else { k };

        with_retry(|| {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT vector_ref, distance FROM {} \
                 WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
                level.collection()
            ))?;
            let raw: Vec<(String, f64)> = stmt
                .query_map(params![vector_to_bytes(query), knn_limit as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut hits = Vec::with_capacity(raw.len());
            for (vector_ref, distance) in raw {
                if let Some(wanted) = source_path {
                    let payload: Option<String> = conn
                        .query_row(
                            "SELECT source_path FROM vector_payloads \
                             WHERE collection = ?1 AND vector_ref = ?2",
                            params![level.collection(), vector_ref],
                            |row| row.get(0),
                        )
                        .optional()?
                        .flatten();
                    if payload.as_deref() != Some(wanted) {
                        continue;
                    }
                }
                hits.push(VectorHit {
                    vector_ref,
                    score: l2_to_cosine(distance),
                });
            }

            // Descending score, ties by ascending ref
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.vector_ref.cmp(&b.vector_ref))
            });
            hits.truncate(k);
            Ok(hits)
        })
    }

    fn list_refs(&self, level: MemoryLevel) -> Result<Vec<String>> {
        with_retry(|| {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT vector_ref FROM {} ORDER BY vector_ref",
                level.collection()
            ))?;
            let refs = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(refs)
        })
    }
}

/// Retry a store operation on transient failures with exponential backoff
/// (100 ms initial, doubling, 5 attempts). A still-transient final failure is
/// reported as the store being unavailable.
fn with_retry<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut delay = RETRY_INITIAL;
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < RETRY_ATTEMPTS => {
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, %err, "retrying vector store call");
                std::thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            Err(err) if err.is_transient() => {
                return Err(Error::StoreUnavailable(format!(
                    "vector store still failing after {RETRY_ATTEMPTS} attempts: {err}"
                )));
            }
            Err(err) => return Err(err),
        }
    }
}
