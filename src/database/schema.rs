/*!
 * Database schema definitions.
 *
 * This module contains the SQL schema for the truecase dictionary and keeps
 * track of the schema version. Read-only opens refuse a database whose
 * version differs from `SCHEMA_VERSION`.
 */

use log::{debug, info};
use rusqlite::Connection;

use crate::errors::DictionaryError;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema on a freshly created database
pub fn initialize_schema(conn: &Connection) -> Result<(), DictionaryError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Initializing dictionary schema v{}", SCHEMA_VERSION);
        create_all_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        debug!("Dictionary schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32, DictionaryError> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !table_exists {
        return Ok(0);
    }

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), DictionaryError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

fn create_all_tables(conn: &Connection) -> Result<(), DictionaryError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        );

        -- Every observed surface form has a row. Lowercased keys carry the
        -- most frequent surface form; other rows carry an empty string.
        CREATE TABLE IF NOT EXISTS truecase_forms (
            word TEXT PRIMARY KEY NOT NULL,
            canonical TEXT NOT NULL DEFAULT ''
        ) WITHOUT ROWID;
        "#,
    )?;
    Ok(())
}
