//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 4;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, MIGRATION_V1)?;
    }
    if version < 2 {
        apply(conn, 2, MIGRATION_V2)?;
    }
    if version < 3 {
        apply(conn, 3, MIGRATION_V3)?;
    }
    if version < 4 {
        apply(conn, 4, MIGRATION_V4)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Apply one migration inside a transaction and record its version
fn apply(conn: &mut Connection, version: i32, sql: &str) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(sql)?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!(version, latest = CURRENT_VERSION, "Migrated database");
    Ok(())
}

/// Version 1: notes
const MIGRATION_V1: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        content TEXT NOT NULL,
        parent_id TEXT,
        is_favorite INTEGER NOT NULL DEFAULT 0,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_notes_updated ON notes(updated_at DESC);
    CREATE INDEX IF NOT EXISTS idx_notes_workspace ON notes(workspace_id);
    CREATE INDEX IF NOT EXISTS idx_notes_deleted ON notes(is_deleted);
";

/// Version 2: durable push queue
const MIGRATION_V2: &str = "
    CREATE TABLE IF NOT EXISTS sync_queue (
        id TEXT PRIMARY KEY,
        note_id TEXT NOT NULL,
        operation TEXT NOT NULL,
        enqueued_at INTEGER NOT NULL,
        retries INTEGER NOT NULL DEFAULT 0,
        payload BLOB NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_sync_queue_order ON sync_queue(enqueued_at, id);
";

/// Version 3: last-synced bases and the conflict log
const MIGRATION_V3: &str = "
    CREATE TABLE IF NOT EXISTS sync_base (
        note_id TEXT PRIMARY KEY,
        snapshot TEXT NOT NULL,
        synced_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS sync_conflicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        note_id TEXT NOT NULL,
        local_updated_at INTEGER NOT NULL,
        remote_updated_at INTEGER NOT NULL,
        resolved_at INTEGER NOT NULL,
        strategy TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_sync_conflicts_note_id ON sync_conflicts(note_id);
    CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC);
";

/// Version 4: explicit insertion order for the push queue.
/// Millisecond timestamps collide, so rows are copied in their old order and
/// drained by `seq` from here on.
const MIGRATION_V4: &str = "
    CREATE TABLE sync_queue_v4 (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        note_id TEXT NOT NULL,
        operation TEXT NOT NULL,
        enqueued_at INTEGER NOT NULL,
        retries INTEGER NOT NULL DEFAULT 0,
        payload BLOB NOT NULL
    );
    INSERT INTO sync_queue_v4 (id, note_id, operation, enqueued_at, retries, payload)
        SELECT id, note_id, operation, enqueued_at, retries, payload
        FROM sync_queue
        ORDER BY rowid;
    DROP TABLE sync_queue;
    ALTER TABLE sync_queue_v4 RENAME TO sync_queue;
    CREATE INDEX IF NOT EXISTS idx_sync_queue_note_id ON sync_queue(note_id);
";

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_migrations() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_sync_tables_created() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        for table in ["notes", "sync_queue", "sync_base", "sync_conflicts"] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }

    #[test]
    fn test_queue_rebuild_keeps_rows_in_insert_order() {
        let mut conn = setup();
        for (version, sql) in [(1, MIGRATION_V1), (2, MIGRATION_V2), (3, MIGRATION_V3)] {
            apply(&mut conn, version, sql).unwrap();
        }
        for (id, note_id) in [("b-2", "b"), ("a-1", "a")] {
            conn.execute(
                "INSERT INTO sync_queue (id, note_id, operation, enqueued_at, payload)
                 VALUES (?1, ?2, 'update', 1000, x'7b7d')",
                [id, note_id],
            )
            .unwrap();
        }

        run(&mut conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);

        let mut stmt = conn
            .prepare("SELECT id FROM sync_queue ORDER BY seq")
            .unwrap();
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(ids, vec!["b-2".to_string(), "a-1".to_string()]);
    }
}
