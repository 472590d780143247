/*!
 * Conversion between structured documents and flat text lines.
 *
 * Extraction joins each sentence's tokens with single spaces. A paragraph
 * marker token starts a new segment; empty segments produced by markers are
 * dropped. Paragraph structure is not restored on encoding: every output
 * line becomes one sentence.
 */

use super::model::{Instance, Sentence, Token, TokenEntry};

/// Token that separates paragraphs inside a sentence stream
pub const PARAGRAPH_MARKER: &str = "<p>";

/// Document ↔ text converter
#[derive(Debug, Clone)]
pub struct DocumentCodec {
    paragraph_marker: String,
}

impl Default for DocumentCodec {
    fn default() -> Self {
        Self::new(PARAGRAPH_MARKER)
    }
}

impl DocumentCodec {
    pub fn new(paragraph_marker: &str) -> Self {
        Self {
            paragraph_marker: paragraph_marker.to_string(),
        }
    }

    /// Ordered text segments of an instance
    pub fn extract(&self, instance: &Instance) -> Vec<String> {
        let mut segments = Vec::new();

        for sentence in &instance.body.sentences {
            let mut parts: Vec<Vec<&str>> = vec![Vec::new()];
            for word in sentence.words() {
                if word == self.paragraph_marker {
                    parts.push(Vec::new());
                } else if let Some(current) = parts.last_mut() {
                    current.push(word);
                }
            }

            if parts.len() == 1 {
                segments.push(parts[0].join(" "));
            } else {
                segments.extend(parts.into_iter().filter(|p| !p.is_empty()).map(|p| p.join(" ")));
            }
        }

        segments
    }

    /// Structured sentence from one line of text
    pub fn encode(&self, line: &str) -> Sentence {
        Sentence {
            tokens: line
                .split_whitespace()
                .enumerate()
                .map(|(offset, word)| TokenEntry {
                    token: Token {
                        offset,
                        token: word.to_string(),
                    },
                    features: Vec::new(),
                })
                .collect(),
        }
    }

    /// Encode every line
    pub fn encode_all(&self, lines: &[String]) -> Vec<Sentence> {
        lines.iter().map(|line| self.encode(line)).collect()
    }
}
