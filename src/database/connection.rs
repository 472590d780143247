/*!
 * Database connection management.
 *
 * This module handles SQLite connection creation for dictionaries and
 * provides thread-safe access so that a dictionary can be shared by all
 * translation slots of a worker.
 */

use log::{debug, info};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::schema;
use crate::errors::DictionaryError;

/// Database connection wrapper with thread-safe access
#[derive(Clone)]
pub struct DictionaryConnection {
    /// Path to the database file
    db_path: PathBuf,
    /// Whether the connection was opened read-only
    read_only: bool,
    /// Thread-safe connection wrapped in Arc<Mutex>
    connection: Arc<Mutex<Connection>>,
}

impl DictionaryConnection {
    /// Open an existing database read-only, refusing other schema versions
    pub fn open_read_only<P: AsRef<Path>>(db_path: P) -> Result<Self, DictionaryError> {
        let db_path = db_path.as_ref().to_path_buf();
        debug!("Opening dictionary read-only at: {:?}", db_path);

        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let found = schema::get_schema_version(&conn)?;
        if found != schema::SCHEMA_VERSION {
            return Err(DictionaryError::StaleSchema {
                path: db_path,
                found,
                expected: schema::SCHEMA_VERSION,
            });
        }

        Ok(Self {
            db_path,
            read_only: true,
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create (or open) a writable database and initialize its schema
    pub fn create<P: AsRef<Path>>(db_path: P) -> Result<Self, DictionaryError> {
        let db_path = db_path.as_ref().to_path_buf();
        info!("Creating dictionary at: {:?}", db_path);

        let conn = Connection::open(&db_path)?;
        schema::initialize_schema(&conn)?;

        Ok(Self {
            db_path,
            read_only: false,
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self, DictionaryError> {
        debug!("Creating in-memory dictionary");

        let conn = Connection::open_in_memory()?;
        schema::initialize_schema(&conn)?;

        Ok(Self {
            db_path: PathBuf::from(":memory:"),
            read_only: false,
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Whether writes are refused by this connection
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Execute a database operation with the connection
    pub fn execute<F, T>(&self, f: F) -> Result<T, DictionaryError>
    where
        F: FnOnce(&Connection) -> Result<T, DictionaryError>,
    {
        // Poisoning leaves the connection usable.
        let conn = self
            .connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        f(&conn)
    }

    /// Begin a transaction and execute operations within it
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DictionaryError>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<T, DictionaryError>,
    {
        let mut conn = self
            .connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;

        Ok(result)
    }
}

impl std::fmt::Debug for DictionaryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictionaryConnection")
            .field("db_path", &self.db_path)
            .field("read_only", &self.read_only)
            .finish()
    }
}
