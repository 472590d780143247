/*!
 * Truecase dictionary backed by SQLite.
 *
 * The dictionary is built once from a frequency-sorted truecase model
 * (`Word (3/5) word (2/5) ...` per line, most frequent surface form first)
 * and stored next to it as `<model>.db`. If the database already exists it
 * is opened read-only and never rebuilt.
 */

use log::{debug, info};
use rusqlite::OptionalExtension;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::connection::DictionaryConnection;
use crate::errors::DictionaryError;

/// Extension appended to the frequency list to name its database
const DB_EXTENSION: &str = "db";

/// Read-only word → canonical surface form lookup
#[derive(Debug, Clone)]
pub struct TruecaseDictionary {
    connection: DictionaryConnection,
}

impl TruecaseDictionary {
    /// Open the dictionary for `model`, building it first if needed.
    ///
    /// `model` may name either the frequency list or its `.db` file.
    pub fn open_or_build<P: AsRef<Path>>(model: P) -> Result<Self, DictionaryError> {
        let (source, db_path) = Self::resolve_paths(model.as_ref());

        if db_path.exists() {
            debug!("Truecase dictionary exists, opening {:?} read-only", db_path);
        } else {
            Self::build(&source, &db_path)?;
        }

        Ok(Self {
            connection: DictionaryConnection::open_read_only(&db_path)?,
        })
    }

    /// Build the database at `db_path` from the frequency list at `source`.
    ///
    /// The database is written to a temporary file in the same directory and
    /// renamed into place, so readers never see a partial dictionary.
    pub fn build(source: &Path, db_path: &Path) -> Result<usize, DictionaryError> {
        if !source.exists() {
            return Err(DictionaryError::SourceNotFound(source.to_path_buf()));
        }

        info!(
            "Converting truecasing model {:?}. This may take a while.",
            source
        );

        let parent = db_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let staging = tempfile::Builder::new()
            .prefix(".truecase-")
            .suffix(".db")
            .tempfile_in(parent)?;

        let reader = BufReader::new(File::open(source)?);
        let connection = DictionaryConnection::create(staging.path())?;
        let entries = connection.transaction(|tx| {
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO truecase_forms (word, canonical) VALUES (?1, ?2)",
            )?;
            let mut entries = 0usize;

            for line in reader.lines() {
                let line = line?;
                let fields: Vec<&str> = line.trim().split(' ').collect();
                let Some(best) = fields.first().copied().filter(|w| !w.is_empty()) else {
                    continue;
                };

                // Fields alternate between surface forms and their counts.
                for form in fields.iter().step_by(2) {
                    insert.execute([*form, ""])?;
                }
                insert.execute([best.to_lowercase().as_str(), best])?;
                entries += 1;
            }

            Ok(entries)
        })?;
        drop(connection);

        staging
            .persist(db_path)
            .map_err(|e| DictionaryError::Io(e.error))?;

        info!("Truecase dictionary written to {:?} ({} entries)", db_path, entries);
        Ok(entries)
    }

    /// Wrap an existing connection (used for in-memory dictionaries in tests)
    pub fn from_connection(connection: DictionaryConnection) -> Self {
        Self { connection }
    }

    /// Whether `word` was observed as a surface form
    pub fn contains(&self, word: &str) -> Result<bool, DictionaryError> {
        self.connection.execute(|conn| {
            let mut stmt = conn.prepare_cached("SELECT 1 FROM truecase_forms WHERE word = ?1")?;
            Ok(stmt.exists([word])?)
        })
    }

    /// Most frequent surface form for `word` (looked up lowercased)
    pub fn canonical_form(&self, word: &str) -> Result<Option<String>, DictionaryError> {
        let key = word.to_lowercase();
        self.connection.execute(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT canonical FROM truecase_forms WHERE word = ?1")?;
            let canonical: Option<String> = stmt
                .query_row([key.as_str()], |row| row.get(0))
                .optional()?;
            Ok(canonical.filter(|c| !c.is_empty()))
        })
    }

    /// Path of the underlying database
    pub fn path(&self) -> &Path {
        self.connection.path()
    }

    /// Whether the dictionary was opened read-only
    pub fn is_read_only(&self) -> bool {
        self.connection.is_read_only()
    }

    /// Frequency list and database paths for `model`
    pub fn resolve_paths(model: &Path) -> (PathBuf, PathBuf) {
        if model.extension().is_some_and(|ext| ext == DB_EXTENSION) {
            (model.with_extension(""), model.to_path_buf())
        } else {
            let mut db_path = model.as_os_str().to_owned();
            db_path.push(".");
            db_path.push(DB_EXTENSION);
            (model.to_path_buf(), PathBuf::from(db_path))
        }
    }
}
