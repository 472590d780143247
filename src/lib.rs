/*!
 * # mtworker - machine translation worker
 *
 * A Rust library and worker binary that serves a neural machine translation
 * engine behind a message queue.
 *
 * ## Features
 *
 * - Declarative pre/post-processing pipelines per language direction
 * - Decoder engine subprocess management and a persistent socket client
 * - Job documents with per-language instances, translated in place
 * - Request/reply job protocol with heartbeats for long-running jobs
 * - Parallel translation slots with per-job retry accounting
 * - ISO 639-1 and ISO 639-2 language code support
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `app_controller`: Wires model, engine, broker and worker together
 * - `broker`: Broker transport interface, in-process broker and reply routing
 * - `database`: SQLite-backed truecase dictionary
 * - `decoder`: Engine subprocess manager and socket client
 * - `session`: A loaded model (language pair, pipelines, engine settings)
 * - `task`: Job messages, the per-job handler and the worker pool
 * - `translation`: Translation of job payloads:
 *   - `translation::core`: The `Translate` trait and the document translator
 *   - `translation::document`: Job documents and their text codec
 *   - `translation::pipeline`: Pipeline steps and their orchestration
 * - `language_utils`: ISO language code utilities
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod broker;
pub mod database;
pub mod decoder;
pub mod errors;
pub mod language_utils;
pub mod session;
pub mod task;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use app_controller::Controller;
pub use broker::{Broker, MemoryBroker, ReplyRouting};
pub use decoder::{DecoderClient, DecoderProcess};
pub use errors::{
    BrokerError, CodecError, ConfigError, DecoderError, DictionaryError, JobError, PipelineError,
    TranslateError, WorkerError,
};
pub use language_utils::{LanguagePair, get_language_name, language_codes_match, normalize_to_part2t};
pub use session::ModelSession;
pub use task::{TaskHandler, Worker};
pub use translation::{Document, DocumentTranslator, Pipeline, Translate};
