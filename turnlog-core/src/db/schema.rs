//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//! Every collection is a table of JSON documents keyed by natural id; the
//! fields queried by the read side get expression indexes.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: document collections
    r#"
    CREATE TABLE IF NOT EXISTS students (
        id               TEXT PRIMARY KEY,
        body             JSON NOT NULL
    );

    CREATE TABLE IF NOT EXISTS lessons (
        id               TEXT PRIMARY KEY,
        body             JSON NOT NULL
    );

    CREATE TABLE IF NOT EXISTS classes (
        id               TEXT PRIMARY KEY,
        body             JSON NOT NULL
    );

    -- One row per (student, lesson); body holds the full turn log
    CREATE TABLE IF NOT EXISTS sessions (
        id               TEXT PRIMARY KEY,
        body             JSON NOT NULL
    );
    "#,
    // Version 2: lookup indexes for the query surface
    r#"
    CREATE INDEX IF NOT EXISTS idx_classes_location ON classes(json_extract(body, '$.Location'));
    CREATE INDEX IF NOT EXISTS idx_sessions_lesson ON sessions(json_extract(body, '$.LessonID'));
    CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(json_extract(body, '$.UserID'));
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
