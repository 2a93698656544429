use std::path::Path;

use rusqlite::Connection;

use super::DatabaseError;

/// A versioned schema step: `(version, sql)`.
pub type Migration = (i64, &'static str);

pub const RELATIONAL_MIGRATIONS: &[Migration] = &[
    (1, include_str!("../../resources/migrations/relational/001_initial.sql")),
    (2, include_str!("../../resources/migrations/relational/002_prediction_logs.sql")),
];

pub const DOCUMENT_MIGRATIONS: &[Migration] = &[
    (1, include_str!("../../resources/migrations/document/001_collections.sql")),
];

/// Open a SQLite connection to the given path and run migrations
pub fn open_database(path: &Path, migrations: &[Migration]) -> Result<Connection, DatabaseError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
    }
    let conn = Connection::open(path)?;
    configure_pragmas(&conn)?;
    run_migrations(&conn, migrations)?;
    Ok(conn)
}

/// Open an in-memory database (for testing)
pub fn open_memory_database(migrations: &[Migration]) -> Result<Connection, DatabaseError> {
    let conn = Connection::open_in_memory()?;
    configure_pragmas(&conn)?;
    run_migrations(&conn, migrations)?;
    Ok(conn)
}

fn configure_pragmas(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=5000;"
    )?;
    Ok(())
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection, migrations: &[Migration]) -> Result<(), DatabaseError> {
    let current_version = get_current_version(conn);

    for &(version, sql) in migrations {
        if version > current_version {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql).map_err(|e| DatabaseError::MigrationFailed {
                version,
                reason: e.to_string(),
            })?;
        }
    }

    Ok(())
}

/// Get the current schema version (0 if no schema exists yet)
fn get_current_version(conn: &Connection) -> i64 {
    conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get::<_, i64>(0),
    )
    .unwrap_or(0)
}

/// Count tables in the database (for verification)
pub fn count_tables(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relational_schema_has_all_tables() {
        let conn = open_memory_database(RELATIONAL_MIGRATIONS).unwrap();
        // schema_version + 3 lookups + patients + drug_assignments + prediction_logs
        assert_eq!(count_tables(&conn).unwrap(), 7);
    }

    #[test]
    fn document_schema_has_collections_and_counters() {
        let conn = open_memory_database(DOCUMENT_MIGRATIONS).unwrap();
        assert_eq!(count_tables(&conn).unwrap(), 3);
    }

    #[test]
    fn schema_version_is_current() {
        let conn = open_memory_database(RELATIONAL_MIGRATIONS).unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn migration_idempotent() {
        let conn = open_memory_database(RELATIONAL_MIGRATIONS).unwrap();
        assert!(run_migrations(&conn, RELATIONAL_MIGRATIONS).is_ok());
    }

    #[test]
    fn foreign_keys_enabled() {
        let conn = open_memory_database(RELATIONAL_MIGRATIONS).unwrap();
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn file_database_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("patients.db");
        let conn = open_database(&path, RELATIONAL_MIGRATIONS).unwrap();
        assert!(path.exists());
        assert_eq!(count_tables(&conn).unwrap(), 7);
    }
}
