/*!
 * Sentence splitting with optional forced splitting of long sentences.
 */

use once_cell::sync::Lazy;
use regex::Regex;

use super::external::ExternalFilter;
use super::step::{Batch, squeeze_whitespace};
use crate::errors::PipelineError;

static SENTENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r".*?(?:[.!?][\p{Pf}\p{Pe}]*|$)").expect("valid sentence pattern"));

/// Where sentence boundaries come from
#[derive(Debug)]
pub enum SplitBackend {
    /// Built-in rules: split after `.`, `!` or `?` plus closing punctuation
    Rules,
    /// An external splitter reading text and writing one sentence per line
    External(ExternalFilter),
}

/// 1→N sentence splitter
#[derive(Debug)]
pub struct SentenceSplitter {
    backend: SplitBackend,
    max_len: usize,
}

impl SentenceSplitter {
    /// `max_len` of 0 disables forced splitting
    pub fn new(backend: SplitBackend, max_len: usize) -> Self {
        Self { backend, max_len }
    }

    pub fn is_external(&self) -> bool {
        matches!(self.backend, SplitBackend::External(_))
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Split every line of the batch into sentences
    pub async fn split(&self, batch: &[String]) -> Result<Batch, PipelineError> {
        let sentences: Batch = match &self.backend {
            SplitBackend::Rules => batch.iter().flat_map(|line| split_text(line)).collect(),
            SplitBackend::External(filter) => filter
                .run(batch)
                .await?
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect(),
        };

        Ok(force_split(sentences, self.max_len))
    }
}

/// Rule-based split of one paragraph
pub fn split_text(text: &str) -> Batch {
    let text = squeeze_whitespace(text);
    SENTENCE_PATTERN
        .find_iter(&text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Break every sentence longer than `max_len` tokens into
/// ceil(n / max_len) pieces of near-equal size, keeping word order.
pub fn force_split(sentences: Batch, max_len: usize) -> Batch {
    if max_len == 0 {
        return sentences;
    }

    let mut out = Vec::with_capacity(sentences.len());
    for sentence in sentences {
        let words: Vec<&str> = sentence.split_whitespace().collect();
        if words.len() <= max_len {
            out.push(sentence);
            continue;
        }

        let pieces = words.len().div_ceil(max_len);
        let base = words.len() / pieces;
        let extra = words.len() % pieces;

        let mut start = 0;
        for i in 0..pieces {
            let size = base + usize::from(i < extra);
            out.push(words[start..start + size].join(" "));
            start += size;
        }
    }
    out
}
