/*!
 * Database module for persistent model-side lookup tables.
 *
 * This module provides SQLite-based persistence for the truecase
 * dictionary: built once from a frequency list next to the model files,
 * then always opened read-only by workers.
 */

pub mod connection;
pub mod schema;
pub mod truecase;

// Re-export main types
pub use connection::DictionaryConnection;
pub use truecase::TruecaseDictionary;
