// vidhash error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VidHashError {
    /// UNIQUE, FOREIGN KEY or CHECK rule rejected by the store.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Malformed media {}: {reason}", path.display())]
    MalformedMedia { path: PathBuf, reason: String },

    #[error("Unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("External tool error: {0}")]
    Tool(String),
}

impl From<rusqlite::Error> for VidHashError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, ref msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                VidHashError::Constraint(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            other => VidHashError::Database(other),
        }
    }
}

impl VidHashError {
    pub fn is_constraint(&self) -> bool {
        matches!(self, VidHashError::Constraint(_))
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        VidHashError::MalformedMedia {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VidHashError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_errors_are_classified() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT NOT NULL UNIQUE);").unwrap();
        conn.execute("INSERT INTO t (name) VALUES ('a')", []).unwrap();

        let err: VidHashError = conn
            .execute("INSERT INTO t (name) VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(err.is_constraint(), "expected constraint error, got {:?}", err);
    }

    #[test]
    fn test_other_sqlite_errors_stay_database_errors() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: VidHashError = conn
            .execute("SELECT * FROM missing_table", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, VidHashError::Database(_)));
    }
}
