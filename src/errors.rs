/*!
 * Error types for the mtworker application.
 *
 * This module contains custom error types for the different layers of the
 * translation worker, using the thiserror crate for ergonomic error definitions.
 * The application binary wraps these in `anyhow` at its edges.
 */

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a model or building pipelines.
///
/// All of these are fatal at startup: a worker never runs with a broken
/// pipeline.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A step spec names an action outside the closed set of step kinds
    #[error("Unknown pipeline step kind: {0}")]
    UnknownStepKind(String),

    /// A required model file does not exist
    #[error("Missing required model file: {}", .0.display())]
    MissingFile(PathBuf),

    /// A step is missing a parameter it cannot run without
    #[error("Step '{step}' is missing required parameter '{parameter}'")]
    MissingParameter {
        /// Step kind
        step: String,
        /// Parameter name
        parameter: String,
    },

    /// A parameter is present but unusable
    #[error("Invalid parameter '{parameter}': {message}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// What is wrong with it
        message: String,
    },

    /// The model name is not a `src-trg` pair of ISO 639-1 codes
    #[error("Invalid language pair: {0}")]
    InvalidLanguagePair(String),

    /// A config file could not be parsed
    #[error("Failed to parse {}: {message}", path.display())]
    Parse {
        /// File that failed to parse
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Dictionary build/open failure during step construction
    #[error("Dictionary error: {0}")]
    Dictionary(#[from] DictionaryError),

    /// IO error while reading model files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while a pipeline runs.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The external filter process could not be started
    #[error("Could not create process '{command}': {source}")]
    Spawn {
        /// Command line
        command: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The external filter exited unsuccessfully
    #[error("Processing failed: '{command}' exited with {status}: {stderr}")]
    ExitStatus {
        /// Command line
        command: String,
        /// Exit status description
        status: String,
        /// Captured stderr (trimmed)
        stderr: String,
    },

    /// IO error while talking to an external filter
    #[error("IO error in step '{step}': {source}")]
    Io {
        /// Step name
        step: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Filter produced non UTF-8 output
    #[error("Step '{0}' produced invalid UTF-8 output")]
    InvalidUtf8(String),

    /// Dictionary lookup failure
    #[error("Dictionary error: {0}")]
    Dictionary(#[from] DictionaryError),
}

/// Errors from the on-disk truecase dictionary.
#[derive(Error, Debug)]
pub enum DictionaryError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error while building the dictionary
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frequency list does not exist
    #[error("Frequency list not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// The database was written with another schema version
    #[error("Dictionary {} has schema v{found}, expected v{expected}; delete it to rebuild", .path.display())]
    StaleSchema {
        /// Database file
        path: PathBuf,
        /// Version stored in the file (0 when absent)
        found: i32,
        /// Version this build reads
        expected: i32,
    },
}

/// Errors from the decoder engine process or its socket.
#[derive(Error, Debug)]
pub enum DecoderError {
    /// The engine executable could not be started or never came up
    #[error("Decoder failed to start: {0}")]
    StartFailed(String),

    /// A single connection attempt failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Reconnect budget exhausted
    #[error("Could not connect to decoder at {url} after {attempts} attempts")]
    ReconnectExhausted {
        /// Target URL
        url: String,
        /// Attempts made
        attempts: u32,
    },

    /// The endpoint string could not be interpreted
    #[error("Invalid decoder endpoint: {0}")]
    InvalidEndpoint(String),

    /// The endpoint protocol is not supported by this client
    #[error("Unsupported decoder protocol: {0}")]
    UnsupportedProtocol(String),

    /// Send/receive failed on an open connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// The engine answered with something other than text
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Translation attempted without a connection
    #[error("Not connected to decoder")]
    NotConnected,

    /// IO error from the engine subprocess
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors while decoding inbound messages or documents.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Body is not valid JSON of the expected shape
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// A required field is missing
    #[error("Missing field: {0}")]
    MissingField(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(error: serde_json::Error) -> Self {
        Self::Malformed(error.to_string())
    }
}

/// Errors from the broker transport.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Publishing a message failed
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Acknowledgment failed
    #[error("Acknowledge failed for delivery #{tag}: {message}")]
    Ack {
        /// Delivery tag
        tag: u64,
        /// Broker message
        message: String,
    },

    /// Rejection failed
    #[error("Reject failed for delivery #{tag}: {message}")]
    Reject {
        /// Delivery tag
        tag: u64,
        /// Broker message
        message: String,
    },

    /// The broker connection is gone
    #[error("Broker connection closed: {0}")]
    Closed(String),

    /// Connecting or declaring the topology failed
    #[error("Could not connect to broker at {url}: {message}")]
    Connect {
        /// Broker URL
        url: String,
        /// Client message
        message: String,
    },
}

/// Errors raised by a document translator.
#[derive(Error, Debug)]
pub enum TranslateError {
    /// Pipeline failure
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Decoder failure
    #[error("Decoder error: {0}")]
    Decoder(#[from] DecoderError),

    /// Document failure
    #[error("Document error: {0}")]
    Codec(#[from] CodecError),
}

/// Outward failure taxonomy of a job.
#[derive(Error, Debug)]
pub enum JobError {
    /// Permanently reject the message, never requeue
    #[error("Rejected: {0}")]
    Reject(String),

    /// Reject and ask the broker to redeliver
    #[error("Rejected for requeue: {0}")]
    RejectRequeue(String),

    /// Anything else that went wrong mid-pipeline
    #[error("Job failed: {0}")]
    Failed(#[from] TranslateError),

    /// The reply could not be published; the message stays unacknowledged
    #[error("Could not deliver results: {0}")]
    PublishFailed(#[source] BrokerError),

    /// The reply was published but the acknowledgment failed
    #[error("Could not acknowledge message: {0}")]
    AckFailed(#[source] BrokerError),
}

impl From<CodecError> for JobError {
    fn from(error: CodecError) -> Self {
        Self::Reject(error.to_string())
    }
}

/// Fatal errors of the worker pool.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The broker handle failed outside a single job
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A translation slot could not be created at startup
    #[error("Could not create translator: {0}")]
    Translator(#[from] TranslateError),

    /// Every translation slot was retired after failed recoveries
    #[error("No translation slots left after {retired} failed recovery attempt(s)")]
    NoSlots {
        /// Slots retired
        retired: usize,
    },
}
