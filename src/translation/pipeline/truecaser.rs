use crate::database::TruecaseDictionary;
use crate::errors::PipelineError;

/// Tokens after which the next word starts a sentence
const SENTENCE_END: &[&str] = &[".", ":", "?", "!"];

/// Opening tokens that postpone the sentence start to the following word
const DELAYED_SENTENCE_START: &[&str] = &["(", "[", "\"", "&apos;", "&quot;", "&#91;", "&#93;"];

/// Restores natural case of tokenized text from a truecase dictionary
#[derive(Debug, Clone)]
pub struct Truecaser {
    dictionary: TruecaseDictionary,
    asr: bool,
}

impl Truecaser {
    pub fn new(dictionary: TruecaseDictionary) -> Self {
        Self {
            dictionary,
            asr: false,
        }
    }

    /// In ASR mode every word takes its most frequent form
    pub fn with_asr(mut self, asr: bool) -> Self {
        self.asr = asr;
        self
    }

    /// Truecase one line of whitespace-separated tokens
    pub fn apply(&self, line: &str) -> Result<String, PipelineError> {
        let mut sentence_start = true;
        let mut output = Vec::new();

        for word in line.split_whitespace() {
            if sentence_start || self.asr || !self.dictionary.contains(word)? {
                let canonical = self.dictionary.canonical_form(word)?;
                output.push(canonical.unwrap_or_else(|| word.to_string()));
            } else {
                output.push(word.to_string());
            }

            if SENTENCE_END.contains(&word) {
                sentence_start = true;
            } else if !DELAYED_SENTENCE_START.contains(&word) {
                sentence_start = false;
            }
        }

        Ok(output.join(" "))
    }
}
