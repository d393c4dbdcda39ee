// Database module

pub mod migrations;
pub mod schema;

use rusqlite::Connection;
use std::path::{Path, PathBuf};

use crate::constants::{DB_FILENAME, DB_PATH_ENV};
use crate::error::Result;

/// Open or create a store at the given path
pub fn open_db(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    prepare_connection(&conn)?;
    Ok(conn)
}

/// Open a private in-memory store with the schema applied
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    prepare_connection(&conn)?;
    Ok(conn)
}

fn prepare_connection(conn: &Connection) -> Result<()> {
    // Enable foreign keys (must be done per connection)
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    migrations::run_migrations(conn)?;

    Ok(())
}

/// Resolve the store path: explicit path, then VIDHASH_DB_PATH, then the working directory
pub fn get_db_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(p) = std::env::var(DB_PATH_ENV) {
        if !p.is_empty() {
            return PathBuf::from(p);
        }
    }
    PathBuf::from(DB_FILENAME)
}
