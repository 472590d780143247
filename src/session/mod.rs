/*!
 * Loaded model sessions.
 *
 * A session replaces process-wide model state: everything a translation
 * slot needs to know about the loaded model is reached through it.
 */

pub mod model;

pub use model::{DECODER_FILE, ModelSession, POSTPROCESS_FILE, PREPROCESS_FILE};
