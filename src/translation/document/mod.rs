/*!
 * Job documents and their text codec.
 */

pub mod codec;
pub mod model;

pub use codec::{DocumentCodec, PARAGRAPH_MARKER};
pub use model::{Body, Document, Instance, InstanceMetadata, Sentence, Token, TokenEntry};
