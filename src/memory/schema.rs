//! SQLite schema for the record, vector and graph stores.
//!
//! The three stores share one database file but no foreign keys: each table
//! can drift from the others and the coordinator is responsible for keeping
//! them in step.

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};

/// Migrations in application order; `MIGRATIONS[i]` produces version `i + 1`.
const MIGRATIONS: &[&str] = &[
    // 1: the three stores
    "CREATE TABLE IF NOT EXISTS memories (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_content_hash ON memories(content_hash);

    CREATE TABLE IF NOT EXISTS vectors (
        id TEXT PRIMARY KEY,
        embedding BLOB NOT NULL,
        dimensions INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    );

    -- one row per direction of a symmetric edge
    CREATE TABLE IF NOT EXISTS adjacency (
        node_id TEXT NOT NULL,
        neighbor_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (node_id, neighbor_id)
    );
    CREATE INDEX IF NOT EXISTS idx_adjacency_node ON adjacency(node_id);",
];

/// Version reached after every migration has run.
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Bring `conn` up to [`SCHEMA_VERSION`], applying only missing migrations.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;

    let current = get_schema_version(conn)?;
    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(current.max(0) as usize) {
        let version = idx as i32 + 1;
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
        tx.commit()?;
        tracing::debug!(version, "Applied memory schema migration");
    }

    Ok(())
}

/// Highest applied migration, or 0 on a fresh database.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

pub fn is_initialized(conn: &Connection) -> bool {
    matches!(get_schema_version(conn), Ok(v) if v >= SCHEMA_VERSION)
}
