use isolang::Language;
use std::fmt;
use std::str::FromStr;

use crate::errors::ConfigError;

/// Language utilities for ISO language code handling
///
/// Models are named by a `src-trg` pair of ISO 639-1 codes (e.g. `de-en`).
/// Inbound jobs may declare their language with either a 2-letter or a
/// 3-letter code, so comparisons go through ISO 639-2/T normalization.

/// ISO 639-2/B codes that differ from their ISO 639-2/T counterpart
const PART2B_TO_PART2T: &[(&str, &str)] = &[
    ("fre", "fra"),
    ("ger", "deu"),
    ("dut", "nld"),
    ("gre", "ell"),
    ("chi", "zho"),
    ("cze", "ces"),
    ("ice", "isl"),
    ("alb", "sqi"),
    ("arm", "hye"),
    ("baq", "eus"),
    ("bur", "mya"),
    ("per", "fas"),
    ("geo", "kat"),
    ("may", "msa"),
    ("mac", "mkd"),
    ("rum", "ron"),
    ("slo", "slk"),
    ("wel", "cym"),
];

/// Normalize a language code to ISO 639-2/T (3-letter) format
pub fn normalize_to_part2t(code: &str) -> Option<String> {
    let normalized_code = code.trim().to_lowercase();

    match normalized_code.len() {
        2 => Language::from_639_1(&normalized_code).map(|lang| lang.to_639_3().to_string()),
        3 => {
            if Language::from_639_3(&normalized_code).is_some() {
                return Some(normalized_code);
            }
            PART2B_TO_PART2T
                .iter()
                .find(|(part2b, _)| *part2b == normalized_code)
                .map(|(_, part2t)| part2t.to_string())
        }
        _ => None,
    }
}

/// Check if a code is a valid ISO 639-1 code
pub fn is_part1_code(code: &str) -> bool {
    let code = code.trim().to_lowercase();
    code.len() == 2 && Language::from_639_1(&code).is_some()
}

/// Check if two language codes match (represent the same language)
pub fn language_codes_match(code1: &str, code2: &str) -> bool {
    match (normalize_to_part2t(code1), normalize_to_part2t(code2)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Get the English language name for a code
pub fn get_language_name(code: &str) -> Option<String> {
    let normalized = normalize_to_part2t(code)?;
    Language::from_639_3(&normalized).map(|lang| lang.to_name().to_string())
}

/// Source and target language of a loaded model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguagePair {
    /// Source language (ISO 639-1)
    pub source: String,
    /// Target language (ISO 639-1)
    pub target: String,
}

impl LanguagePair {
    /// Create a pair from two already validated codes
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl FromStr for LanguagePair {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, target) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| ConfigError::InvalidLanguagePair(s.to_string()))?;

        if !is_part1_code(source) || !is_part1_code(target) {
            return Err(ConfigError::InvalidLanguagePair(s.to_string()));
        }

        Ok(Self::new(source.to_lowercase(), target.to_lowercase()))
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}
