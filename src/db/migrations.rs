// Database migrations
// Migrations are forward-only. Never edit or delete a migration after it ships.

use rusqlite::Connection;

use crate::error::{Result, VidHashError};

/// All migrations in order. Each migration is a SQL string.
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Videos: one row per (logical name, container format)
    CREATE TABLE video_info (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        video_name TEXT NOT NULL,
        format VARCHAR(5) NOT NULL,
        date_added TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(video_name, format)
    );

    -- Hash methods (algorithm registry rows) and their best accuracy
    CREATE TABLE hash_methods (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        accuracy REAL,
        threshold REAL,
        true_positives INTEGER,
        true_negatives INTEGER,
        false_positives INTEGER,
        false_negatives INTEGER
    );

    -- Fingerprints, text encoded
    CREATE TABLE computed_hashes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        video_id INTEGER NOT NULL REFERENCES video_info(id) ON DELETE CASCADE,
        hash_method_id INTEGER NOT NULL REFERENCES hash_methods(id) ON DELETE CASCADE,
        hash_value TEXT,
        date_added TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(video_id, hash_method_id)
    );

    -- Pairwise distances, one row per unordered pair and method
    CREATE TABLE video_distances (
        a INTEGER NOT NULL REFERENCES video_info(id) ON DELETE CASCADE,
        b INTEGER NOT NULL REFERENCES video_info(id) ON DELETE CASCADE,
        method INTEGER NOT NULL REFERENCES hash_methods(id) ON DELETE CASCADE,
        distance INTEGER NOT NULL,
        date_added TEXT NOT NULL DEFAULT (datetime('now')),
        PRIMARY KEY (a, b, method),
        CHECK (a != b)
    );

    -- Ground-truth sets
    CREATE TABLE video_sets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        number_of_videos INTEGER NOT NULL DEFAULT 0,
        date_added TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE video_set_memberships (
        set_id INTEGER NOT NULL REFERENCES video_sets(id) ON DELETE CASCADE,
        video_id INTEGER NOT NULL REFERENCES video_info(id) ON DELETE CASCADE,
        date_added TEXT NOT NULL DEFAULT (datetime('now')),
        PRIMARY KEY (set_id, video_id)
    );

    CREATE INDEX idx_computed_hashes_video ON computed_hashes(video_id);
    CREATE INDEX idx_video_distances_method ON video_distances(method);
    CREATE INDEX idx_memberships_video ON video_set_memberships(video_id);
    "#,
    // Migration 2: keep video_sets.number_of_videos equal to the membership rows,
    // including rows removed by a cascading video delete
    r#"
    CREATE TRIGGER trg_memberships_insert AFTER INSERT ON video_set_memberships
    BEGIN
        UPDATE video_sets SET number_of_videos = number_of_videos + 1 WHERE id = NEW.set_id;
    END;

    CREATE TRIGGER trg_memberships_delete AFTER DELETE ON video_set_memberships
    BEGIN
        UPDATE video_sets SET number_of_videos = number_of_videos - 1 WHERE id = OLD.set_id;
    END;

    UPDATE video_sets SET number_of_videos =
        (SELECT COUNT(*) FROM video_set_memberships m WHERE m.set_id = video_sets.id);
    "#,
];

/// Get current schema version from database
fn get_schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    let target_version = MIGRATIONS.len() as u32;

    // Refuse to open a store created by a newer build
    if current_version > target_version {
        return Err(VidHashError::Precondition(format!(
            "Database schema version {} is newer than this build supports (max {})",
            current_version, target_version
        )));
    }

    if current_version == target_version {
        return Ok(());
    }

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as u32;
        if migration_version <= current_version {
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration)?;
        tx.execute_batch(&format!("PRAGMA user_version = {}", migration_version))?;
        tx.commit()?;

        log::info!("Applied migration {}", migration_version);
    }

    Ok(())
}
