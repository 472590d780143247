/*!
 * Declarative pre/post-processing pipelines.
 *
 * - `step`: step specs and the closed set of step kinds
 * - `orchestrator`: ordered execution of a resolved pipeline
 * - `external`: opaque filter processes
 * - `sentences`, `subword`, `punctuation`, `truecaser`: local transforms
 */

pub mod external;
pub mod orchestrator;
pub mod punctuation;
pub mod sentences;
pub mod step;
pub mod subword;
pub mod truecaser;

pub use orchestrator::{Pipeline, PipelineConfig};
pub use step::{Batch, Step, StepAction, StepContext, StepKind, StepSpec};
