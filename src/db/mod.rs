pub mod schema;

use anyhow::Context;
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

use crate::error::{Error, Result};

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the metadata database at the given path with schema
/// initialized. Fatal on corruption — the caller has no way to proceed.
pub fn open_metadata_db(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let conn = Connection::open(path).map_err(|e| {
        Error::Fatal(format!(
            "failed to open metadata database at {}: {e}",
            path.display()
        ))
    })?;

    apply_pragmas(&conn)?;
    schema::init_schema(&conn)
        .map_err(|e| Error::Fatal(format!("failed to initialize schema: {e}")))?;

    let integrity: String = conn.pragma_query_value(None, "quick_check", |row| row.get(0))?;
    if integrity != "ok" {
        return Err(Error::Fatal(format!(
            "metadata database integrity check failed: {integrity}"
        )));
    }

    tracing::info!(path = %path.display(), "metadata database initialized");
    Ok(conn)
}

/// Open an in-memory metadata database. Used by tests and ephemeral setups.
pub fn open_metadata_db_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()
        .map_err(|e| Error::Fatal(format!("failed to open in-memory database: {e}")))?;
    apply_pragmas(&conn)?;
    schema::init_schema(&conn)
        .map_err(|e| Error::Fatal(format!("failed to initialize schema: {e}")))?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    // WAL for concurrent readers alongside the single writer
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // Wait for locks instead of failing immediately
    conn.pragma_update(None, "busy_timeout", "5000")?;
    Ok(())
}

/// Result of a metadata database health check.
#[derive(Debug, serde::Serialize)]
pub struct HealthReport {
    pub schema_version: u32,
    pub integrity_ok: bool,
    pub integrity_details: String,
    pub memory_count: i64,
    pub connection_count: i64,
    pub bridge_cache_count: i64,
    pub retrieval_stat_count: i64,
}

/// Run a health check on an open metadata connection.
pub fn check_health(conn: &Connection) -> Result<HealthReport> {
    let schema_version = schema::get_schema_version(conn)?;

    let integrity_details: String =
        conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    let integrity_ok = integrity_details == "ok";

    let count = |table: &str| -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .unwrap_or(0)
    };

    Ok(HealthReport {
        schema_version,
        integrity_ok,
        integrity_details,
        memory_count: count("memories"),
        connection_count: count("memory_connections"),
        bridge_cache_count: count("bridge_cache"),
        retrieval_stat_count: count("retrieval_stats"),
    })
}
