//! SQL DDL for the metadata store.
//!
//! Defines the `memories`, `memory_connections`, `bridge_cache`,
//! `retrieval_stats`, and `schema_meta` tables. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization. Vector collections live in
//! a separate database (see `memory::vector`).

use rusqlite::Connection;

/// All schema DDL statements for the metadata tables.
const SCHEMA_SQL: &str = r#"
-- Memory records. Source of truth for everything except the raw vectors.
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    level INTEGER NOT NULL CHECK(level IN (0, 1, 2)),
    content TEXT NOT NULL,
    dimensions TEXT NOT NULL DEFAULT '{}',
    vector_ref TEXT NOT NULL UNIQUE,
    memory_type TEXT NOT NULL CHECK(memory_type IN ('episodic','semantic')),
    decay_rate REAL NOT NULL,
    importance_score REAL NOT NULL DEFAULT 0.0
        CHECK(importance_score >= 0.0 AND importance_score <= 1.0),
    access_count INTEGER NOT NULL DEFAULT 0,
    parent_id TEXT REFERENCES memories(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_level ON memories(level);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
CREATE INDEX IF NOT EXISTS idx_memories_access ON memories(access_count);
CREATE INDEX IF NOT EXISTS idx_memories_last_accessed ON memories(last_accessed);
-- source_path lives inside the dimensions payload; index the extraction
CREATE INDEX IF NOT EXISTS idx_memories_source_path
    ON memories(json_extract(dimensions, '$.source_path'));

-- Associative graph. (a, b) and (b, a) are independent edges.
CREATE TABLE IF NOT EXISTS memory_connections (
    source_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    strength REAL NOT NULL CHECK(strength >= 0.0 AND strength <= 1.0),
    kind TEXT NOT NULL CHECK(kind IN ('associative','hierarchical','temporal','causal')),
    created_at TEXT NOT NULL,
    last_activated TEXT,
    activation_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (source_id, target_id),
    CHECK (source_id <> target_id)
);

CREATE INDEX IF NOT EXISTS idx_connections_source ON memory_connections(source_id);
CREATE INDEX IF NOT EXISTS idx_connections_target ON memory_connections(target_id);
CREATE INDEX IF NOT EXISTS idx_connections_strength ON memory_connections(strength);

-- Read-through cache for bridge discovery, evicted by TTL.
CREATE TABLE IF NOT EXISTS bridge_cache (
    query_fingerprint TEXT NOT NULL,
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    bridge_score REAL NOT NULL,
    novelty_score REAL NOT NULL,
    connection_potential REAL NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (query_fingerprint, memory_id)
);

CREATE INDEX IF NOT EXISTS idx_bridge_cache_created ON bridge_cache(created_at);

-- Append-only retrieval log used for post-hoc reinforcement analysis.
CREATE TABLE IF NOT EXISTS retrieval_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query_fingerprint TEXT NOT NULL,
    memory_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN ('core','peripheral','bridge')),
    success_score REAL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_retrieval_fingerprint ON retrieval_stats(query_fingerprint);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Initialize all metadata tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        [CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"memories".to_string()));
        assert!(tables.contains(&"memory_connections".to_string()));
        assert!(tables.contains(&"bridge_cache".to_string()));
        assert!(tables.contains(&"retrieval_stats".to_string()));
        assert!(tables.contains(&"schema_meta".to_string()));
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn fresh_db_reports_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn level_check_constraint_rejects_out_of_range() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO memories (id, level, content, vector_ref, memory_type, decay_rate, created_at, last_accessed) \
             VALUES ('m1', 5, 'x', 'm1', 'episodic', 0.1, '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn self_edge_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO memories (id, level, content, vector_ref, memory_type, decay_rate, created_at, last_accessed) \
             VALUES ('m1', 2, 'x', 'm1', 'episodic', 0.1, '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO memory_connections (source_id, target_id, strength, kind, created_at) \
             VALUES ('m1', 'm1', 0.5, 'associative', '2026-01-01T00:00:00+00:00')",
            [],
        );
        assert!(result.is_err());
    }
}
