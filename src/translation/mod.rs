/*!
 * Translation of job payloads.
 *
 * - `core`: the `Translate` trait and the pipeline + engine translator
 * - `document`: job documents and their text codec
 * - `pipeline`: declarative pre/post-processing pipelines
 * - `progress`: stage and liveness reports from a running translation
 */

pub use self::core::{DocumentTranslator, SessionTranslators, Translate, TranslatorFactory};
pub use self::document::{Document, DocumentCodec, Instance};
pub use self::pipeline::{Batch, Pipeline, PipelineConfig, StepSpec};
pub use self::progress::{Progress, Stage};

pub mod core;
pub mod document;
pub mod pipeline;
pub mod progress;
