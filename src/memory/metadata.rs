//! Metadata store — source of truth for all non-vector state.
//!
//! Holds memory records, the associative graph (adjacency rows, not an
//! in-memory object graph), the bridge cache, and the retrieval log. All
//! writes go through one connection behind a mutex (single-writer
//! discipline); multi-statement operations run inside transactions.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::types::{
    BridgeCacheEntry, ConnectionKind, Memory, MemoryConnection, MemoryKind, MemoryLevel,
    RetrievalKind,
};
use crate::error::{Error, Result};

/// Learning rate η for connection reinforcement.
pub const REINFORCEMENT_RATE: f64 = 0.1;

/// Derived importance: access frequency, recency, and graph centrality.
///
/// `0.4·n/(n+5) + 0.3·exp(−days/30) + 0.3·mean_incident_strength`,
/// each term bounded so the result stays in `[0, 1]`.
pub fn compute_importance(access_count: u32, days_since_access: f64, mean_strength: f64) -> f64 {
    let n = access_count as f64;
    let frequency = n / (n + 5.0);
    let recency = (-days_since_access.max(0.0) / 30.0).exp();
    (0.4 * frequency + 0.3 * recency + 0.3 * mean_strength.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

pub struct MetadataStore {
    conn: Mutex<Connection>,
    bridge_cache_hits: AtomicU64,
    bridge_cache_misses: AtomicU64,
}

impl MetadataStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::wrap(crate::db::open_metadata_db(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::wrap(crate::db::open_metadata_db_in_memory()?))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            bridge_cache_hits: AtomicU64::new(0),
            bridge_cache_misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Fatal("metadata store lock poisoned".into()))
    }

    /// Health report for the underlying database.
    pub fn health(&self) -> Result<crate::db::HealthReport> {
        let conn = self.lock()?;
        crate::db::check_health(&conn)
    }

    // ── Memories ─────────────────────────────────────────────────────────────

    /// Insert a memory row. Enforces the hierarchy invariant: a parent must
    /// exist and sit at a strictly lower level.
    pub fn insert_memory(&self, memory: &Memory) -> Result<()> {
        let conn = self.lock()?;

        if let Some(parent_id) = &memory.parent_id {
            let parent_level: Option<i64> = conn
                .query_row(
                    "SELECT level FROM memories WHERE id = ?1",
                    params![parent_id],
                    |row| row.get(0),
                )
                .optional()?;
            match parent_level {
                None => {
                    return Err(Error::NotFound(format!("parent memory: {parent_id}")))
                }
                Some(level) if level >= memory.level.as_i64() => {
                    return Err(Error::Validation(format!(
                        "parent {parent_id} is at level {level}, child must be strictly deeper than its parent"
                    )))
                }
                Some(_) => {}
            }
        }

        conn.execute(
            "INSERT INTO memories (id, level, content, dimensions, vector_ref, memory_type, \
             decay_rate, importance_score, access_count, parent_id, created_at, last_accessed) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                memory.id,
                memory.level.as_i64(),
                memory.content,
                dimensions_json(memory),
                memory.vector_ref,
                memory.kind.as_str(),
                memory.decay_rate,
                memory.importance_score,
                memory.access_count,
                memory.parent_id,
                memory.created_at,
                memory.last_accessed,
            ],
        )?;
        Ok(())
    }

    /// Fetch a memory or fail with `NotFound`.
    pub fn get_memory(&self, id: &str) -> Result<Memory> {
        self.find_memory(id)?
            .ok_or_else(|| Error::NotFound(format!("memory: {id}")))
    }

    pub fn find_memory(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.lock()?;
        let memory = conn
            .query_row(
                &format!("{MEMORY_SELECT} WHERE id = ?1"),
                params![id],
                memory_from_row,
            )
            .optional()?;
        Ok(memory)
    }

    /// Look a memory up by its vector key (used by the reconciliation sweep).
    pub fn find_by_vector_ref(&self, vector_ref: &str) -> Result<Option<Memory>> {
        let conn = self.lock()?;
        let memory = conn
            .query_row(
                &format!("{MEMORY_SELECT} WHERE vector_ref = ?1"),
                params![vector_ref],
                memory_from_row,
            )
            .optional()?;
        Ok(memory)
    }

    /// Batch-fetch memories by id. Missing ids are simply absent.
    pub fn fetch_memories(&self, ids: &[String]) -> Result<HashMap<String, Memory>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.lock()?;
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!("{MEMORY_SELECT} WHERE id IN ({})", placeholders.join(", "));
        let mut stmt = conn.prepare(&sql)?;
        let sql_params: Vec<&dyn rusqlite::types::ToSql> =
            ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
        let rows = stmt
            .query_map(sql_params.as_slice(), memory_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().map(|m| (m.id.clone(), m)).collect())
    }

    /// Delete a memory row. Idempotent; returns whether a row was removed.
    /// Edges and cache entries cascade via foreign keys.
    pub fn delete_memory(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let affected = conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// All memories loaded from a given source path.
    pub fn memories_by_source(&self, path: &str) -> Result<Vec<Memory>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{MEMORY_SELECT} WHERE json_extract(dimensions, '$.source_path') = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![path], memory_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_by_level(&self) -> Result<[u64; 3]> {
        let conn = self.lock()?;
        let mut counts = [0u64; 3];
        let mut stmt = conn.prepare("SELECT level, COUNT(*) FROM memories GROUP BY level")?;
        let rows: Vec<(i64, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (level, count) in rows {
            if let Some(level) = MemoryLevel::from_i64(level) {
                counts[level.as_i64() as usize] = count as u64;
            }
        }
        Ok(counts)
    }

    /// Every `(level, vector_ref)` pair known to metadata; reconciliation
    /// intersects this with the vector store's ref sets.
    pub fn all_vector_refs(&self) -> Result<Vec<(MemoryLevel, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT level, vector_ref FROM memories")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(level, r)| MemoryLevel::from_i64(level).map(|l| (l, r)))
            .collect())
    }

    /// Record an activation hit on each memory: bump `access_count`, set
    /// `last_accessed`, and recompute the derived importance. Writes for all
    /// ids share one transaction.
    pub fn touch_memories(&self, ids: &[String], now: &DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now_str = now.to_rfc3339();
        for id in ids {
            tx.execute(
                "UPDATE memories SET access_count = access_count + 1, last_accessed = ?1 \
                 WHERE id = ?2",
                params![now_str, id],
            )?;
            let access_count: Option<u32> = tx
                .query_row(
                    "SELECT access_count FROM memories WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(access_count) = access_count else {
                continue;
            };
            let mean_strength: f64 = tx.query_row(
                "SELECT COALESCE(AVG(strength), 0.0) FROM memory_connections \
                 WHERE source_id = ?1 OR target_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            // Recency term is 1.0 at touch time (days_since_access = 0)
            let importance = compute_importance(access_count, 0.0, mean_strength);
            tx.execute(
                "UPDATE memories SET importance_score = ?1 WHERE id = ?2",
                params![importance, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// One-way promotion: episodic -> semantic with slow decay and an
    /// importance boost. Returns false when the memory is already semantic
    /// (or missing) — promotion never reverses.
    pub fn promote_memory(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE memories SET memory_type = 'semantic', decay_rate = ?1, \
             importance_score = MIN(1.0, importance_score + 0.1) \
             WHERE id = ?2 AND memory_type = 'episodic'",
            params![MemoryKind::Semantic.default_decay_rate(), id],
        )?;
        Ok(affected > 0)
    }

    // ── Associative graph ────────────────────────────────────────────────────

    /// Create or strengthen an explicit edge. Both endpoints must exist
    /// (enforced by foreign keys); self-edges are rejected by the schema.
    /// On conflict the stronger value wins, keeping strength monotone.
    pub fn connect(
        &self,
        source_id: &str,
        target_id: &str,
        kind: ConnectionKind,
        strength: f64,
    ) -> Result<()> {
        if source_id == target_id {
            return Err(Error::Validation("self-connections are not allowed".into()));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO memory_connections (source_id, target_id, strength, kind, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(source_id, target_id) \
             DO UPDATE SET strength = MAX(strength, excluded.strength)",
            params![
                source_id,
                target_id,
                strength.clamp(0.0, 1.0),
                kind.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Reinforce the edge `source -> target` after retrieval co-occurrence:
    /// `s' = min(1, s + delta)`, creating the edge at `delta` when absent.
    /// Also bumps `activation_count` and `last_activated`.
    pub fn reinforce(&self, source_id: &str, target_id: &str, delta: f64) -> Result<f64> {
        if source_id == target_id {
            return Err(Error::Validation("self-connections are not allowed".into()));
        }
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO memory_connections \
             (source_id, target_id, strength, kind, created_at, last_activated, activation_count) \
             VALUES (?1, ?2, ?3, 'associative', ?4, ?4, 1) \
             ON CONFLICT(source_id, target_id) DO UPDATE SET \
               strength = MIN(1.0, strength + excluded.strength), \
               last_activated = excluded.last_activated, \
               activation_count = activation_count + 1",
            params![source_id, target_id, delta.clamp(0.0, 1.0), now],
        )?;
        let strength: f64 = conn.query_row(
            "SELECT strength FROM memory_connections WHERE source_id = ?1 AND target_id = ?2",
            params![source_id, target_id],
            |row| row.get(0),
        )?;
        Ok(strength)
    }

    /// Outgoing adjacency for a batch of nodes (spreading frontier).
    pub fn connections_from(&self, source_ids: &[String]) -> Result<Vec<MemoryConnection>> {
        if source_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let placeholders: Vec<String> = (1..=source_ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT source_id, target_id, strength, kind, created_at, last_activated, activation_count \
             FROM memory_connections WHERE source_id IN ({}) ORDER BY source_id, target_id",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let sql_params: Vec<&dyn rusqlite::types::ToSql> = source_ids
            .iter()
            .map(|id| id as &dyn rusqlite::types::ToSql)
            .collect();
        let rows = stmt
            .query_map(sql_params.as_slice(), connection_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count of outgoing edges at or above a strength floor.
    pub fn strong_outgoing_edges(&self, id: &str, min_strength: f64) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_connections WHERE source_id = ?1 AND strength >= ?2",
            params![id, min_strength],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Strongest edge (either direction) between `id` and any of `others`.
    pub fn max_edge_strength_between(&self, id: &str, others: &[String]) -> Result<f64> {
        if others.is_empty() {
            return Ok(0.0);
        }
        let conn = self.lock()?;
        let placeholders: Vec<String> = (2..=others.len() + 1).map(|i| format!("?{i}")).collect();
        let in_list = placeholders.join(", ");
        let sql = format!(
            "SELECT COALESCE(MAX(strength), 0.0) FROM memory_connections \
             WHERE (source_id = ?1 AND target_id IN ({in_list})) \
                OR (target_id = ?1 AND source_id IN ({in_list}))"
        );
        let mut sql_params: Vec<&dyn rusqlite::types::ToSql> = vec![&id as &dyn rusqlite::types::ToSql];
        sql_params.extend(others.iter().map(|o| o as &dyn rusqlite::types::ToSql));
        let strength: f64 = conn.query_row(&sql, sql_params.as_slice(), |row| row.get(0))?;
        Ok(strength)
    }

    pub fn connection_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM memory_connections", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ── Bridge cache ─────────────────────────────────────────────────────────

    /// Read-through lookup: entries younger than `ttl` count as a hit.
    pub fn bridge_cache_get(
        &self,
        fingerprint: &str,
        now: &DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<Vec<BridgeCacheEntry>>> {
        let cutoff = (*now - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero())).to_rfc3339();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT memory_id, bridge_score, novelty_score, connection_potential \
             FROM bridge_cache \
             WHERE query_fingerprint = ?1 AND created_at >= ?2 \
             ORDER BY bridge_score DESC, memory_id ASC",
        )?;
        let rows = stmt
            .query_map(params![fingerprint, cutoff], |row| {
                Ok(BridgeCacheEntry {
                    memory_id: row.get(0)?,
                    bridge_score: row.get(1)?,
                    novelty_score: row.get(2)?,
                    connection_potential: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        if rows.is_empty() {
            self.bridge_cache_misses.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        } else {
            self.bridge_cache_hits.fetch_add(1, Ordering::Relaxed);
            Ok(Some(rows))
        }
    }

    /// Replace the cached entries for a fingerprint.
    pub fn bridge_cache_put(
        &self,
        fingerprint: &str,
        entries: &[BridgeCacheEntry],
        now: &DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM bridge_cache WHERE query_fingerprint = ?1",
            params![fingerprint],
        )?;
        let now_str = now.to_rfc3339();
        for entry in entries {
            tx.execute(
                "INSERT INTO bridge_cache \
                 (query_fingerprint, memory_id, bridge_score, novelty_score, connection_potential, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    fingerprint,
                    entry.memory_id,
                    entry.bridge_score,
                    entry.novelty_score,
                    entry.connection_potential,
                    now_str,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Drop entries older than the TTL. Returns how many were evicted.
    pub fn bridge_cache_purge(&self, now: &DateTime<Utc>, ttl: Duration) -> Result<usize> {
        let cutoff = (*now - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero())).to_rfc3339();
        let conn = self.lock()?;
        let affected = conn.execute(
            "DELETE FROM bridge_cache WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(affected)
    }

    /// `(hits, misses)` counters for this process.
    pub fn bridge_cache_counters(&self) -> (u64, u64) {
        (
            self.bridge_cache_hits.load(Ordering::Relaxed),
            self.bridge_cache_misses.load(Ordering::Relaxed),
        )
    }

    // ── Retrieval stats ──────────────────────────────────────────────────────

    /// Append one row per returned memory to the retrieval log.
    pub fn record_retrieval(
        &self,
        fingerprint: &str,
        entries: &[(String, RetrievalKind)],
        now: &DateTime<Utc>,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now_str = now.to_rfc3339();
        for (memory_id, kind) in entries {
            tx.execute(
                "INSERT INTO retrieval_stats (query_fingerprint, memory_id, kind, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![fingerprint, memory_id, kind.as_str(), now_str],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ── Candidate queries ────────────────────────────────────────────────────

    /// Up to `limit` memories from the given levels, stalest first (inverse
    /// recency weighting for bridge candidates), excluding the given ids.
    pub fn stalest_candidates(
        &self,
        levels: &[MemoryLevel],
        exclude: &HashSet<String>,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let conn = self.lock()?;
        let level_list = levels
            .iter()
            .map(|l| l.as_i64().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        // The exclusion set is bounded by the activation cap, so fetch
        // limit + |exclude| and filter in memory rather than building a
        // second dynamic IN clause.
        let fetch = limit + exclude.len();
        let mut stmt = conn.prepare(&format!(
            "{MEMORY_SELECT} WHERE level IN ({level_list}) \
             ORDER BY last_accessed ASC, id ASC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![fetch as i64], memory_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter(|m| !exclude.contains(&m.id))
            .take(limit)
            .collect())
    }

    /// Episodic memories never accessed and created before `cutoff` —
    /// eviction candidates pending the effective-importance check.
    pub fn eviction_candidates(&self, cutoff: &DateTime<Utc>) -> Result<Vec<Memory>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{MEMORY_SELECT} WHERE memory_type = 'episodic' \
             AND access_count = 0 AND created_at < ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![cutoff.to_rfc3339()], memory_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Episodic memories with enough recent accesses to be considered for
    /// promotion; the edge condition is checked per-candidate by the caller.
    pub fn promotion_candidates(
        &self,
        min_access: u32,
        accessed_since: &DateTime<Utc>,
    ) -> Result<Vec<Memory>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{MEMORY_SELECT} WHERE memory_type = 'episodic' \
             AND access_count >= ?1 AND last_accessed >= ?2 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(
                params![min_access, accessed_since.to_rfc3339()],
                memory_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ── Row mapping ──────────────────────────────────────────────────────────────

const MEMORY_SELECT: &str =
    "SELECT id, level, content, dimensions, vector_ref, memory_type, decay_rate, \
     importance_score, access_count, parent_id, created_at, last_accessed FROM memories";

/// Serialize the dimension map, folding `source_path` into the payload so the
/// functional index can reach it.
fn dimensions_json(memory: &Memory) -> String {
    let mut map = serde_json::Map::new();
    for (name, score) in &memory.dimensions {
        map.insert(name.clone(), serde_json::json!(score));
    }
    if let Some(path) = &memory.source_path {
        map.insert("source_path".into(), serde_json::json!(path));
    }
    serde_json::Value::Object(map).to_string()
}

fn memory_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let level: i64 = row.get(1)?;
    let kind: String = row.get(5)?;
    let dimensions_raw: String = row.get(3)?;

    let mut dimensions = std::collections::BTreeMap::new();
    let mut source_path = None;
    if let Ok(serde_json::Value::Object(map)) =
        serde_json::from_str::<serde_json::Value>(&dimensions_raw)
    {
        for (name, value) in map {
            if name == "source_path" {
                source_path = value.as_str().map(str::to_string);
            } else if let Some(score) = value.as_f64() {
                dimensions.insert(name, score);
            }
        }
    }

    Ok(Memory {
        id: row.get(0)?,
        level: MemoryLevel::from_i64(level).unwrap_or(MemoryLevel::Episode),
        content: row.get(2)?,
        dimensions,
        vector_ref: row.get(4)?,
        kind: kind.parse().unwrap_or(MemoryKind::Episodic),
        decay_rate: row.get(6)?,
        importance_score: row.get(7)?,
        access_count: row.get(8)?,
        parent_id: row.get(9)?,
        source_path,
        created_at: row.get(10)?,
        last_accessed: row.get(11)?,
    })
}

fn connection_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryConnection> {
    let kind: String = row.get(3)?;
    Ok(MemoryConnection {
        source_id: row.get(0)?,
        target_id: row.get(1)?,
        strength: row.get(2)?,
        kind: kind.parse().unwrap_or(ConnectionKind::Associative),
        created_at: row.get(4)?,
        last_activated: row.get(5)?,
        activation_count: row.get(6)?,
    })
}
