/*!
 * Byte-pair-encoding subword segmentation and its reversal.
 *
 * The merge model is the usual `left right` pair list, optionally preceded by
 * a `#version: 0.2` header. Words are split into characters with an
 * end-of-word marker, merged greedily by merge rank, and, when a vocabulary
 * is given, merges producing units below the frequency threshold are undone.
 */

use log::{debug, info};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::errors::ConfigError;

const END_OF_WORD: &str = "</w>";

/// Applies a learned merge model to whitespace-tokenized text
#[derive(Debug)]
pub struct SubwordSegmenter {
    /// Merge pair → rank (lower merges first)
    ranks: HashMap<(String, String), usize>,
    /// Merged unit → the pair it was built from
    reverse: HashMap<String, (String, String)>,
    separator: String,
    vocabulary: Option<HashSet<String>>,
    glossaries: HashSet<String>,
    version: (u32, u32),
    cache: Mutex<HashMap<String, Vec<String>>>,
}

impl SubwordSegmenter {
    /// Load the merge model and optional vocabulary from disk
    pub fn from_files(
        codes: &Path,
        merges: Option<usize>,
        separator: &str,
        vocabulary: Option<&Path>,
        threshold: usize,
        glossaries: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let codes_text = std::fs::read_to_string(codes)?;
        let vocabulary = match vocabulary {
            Some(path) => Some(read_vocabulary(path, threshold)?),
            None => None,
        };

        let segmenter = Self::from_codes(&codes_text, merges, separator, vocabulary, glossaries)
            .map_err(|message| ConfigError::Parse {
                path: codes.to_path_buf(),
                message,
            })?;

        info!(
            "Loaded {} subword merges from {:?}",
            segmenter.ranks.len(),
            codes
        );
        Ok(segmenter)
    }

    /// Build a segmenter from the text of a merge model
    pub fn from_codes(
        codes: &str,
        merges: Option<usize>,
        separator: &str,
        vocabulary: Option<HashSet<String>>,
        glossaries: Vec<String>,
    ) -> Result<Self, String> {
        let mut lines = codes.lines().peekable();

        let mut version = (0, 1);
        if let Some(first) = lines.peek() {
            if let Some(v) = first.strip_prefix("#version:") {
                version = parse_version(v.trim())?;
                lines.next();
            }
        }

        let mut ranks = HashMap::new();
        let mut reverse = HashMap::new();
        let limit = merges.unwrap_or(usize::MAX);

        for (number, line) in lines.enumerate().take(limit) {
            let mut parts = line.split_whitespace();
            let (Some(left), Some(right), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(format!("line {}: expected two symbols, got '{}'", number + 1, line));
            };

            let pair = (left.to_string(), right.to_string());
            // The first occurrence of a pair determines its rank.
            ranks.entry(pair.clone()).or_insert(number);
            reverse.entry(format!("{}{}", left, right)).or_insert(pair);
        }

        Ok(Self {
            ranks,
            reverse,
            separator: separator.to_string(),
            vocabulary,
            glossaries: glossaries.into_iter().collect(),
            version,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Join marker appended to non-final units
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Segment every token of a line
    pub fn segment_line(&self, line: &str) -> String {
        let mut output = Vec::new();
        for word in line.split_whitespace() {
            let units = self.segment_word(word);
            let last = units.len().saturating_sub(1);
            for (i, unit) in units.into_iter().enumerate() {
                if i < last {
                    output.push(format!("{}{}", unit, self.separator));
                } else {
                    output.push(unit);
                }
            }
        }
        output.join(" ")
    }

    /// Segment a single word into units (without separators)
    pub fn segment_word(&self, word: &str) -> Vec<String> {
        if self.glossaries.contains(word) {
            return vec![word.to_string()];
        }

        if let Some(units) = self.cache.lock().get(word) {
            return units.clone();
        }

        let units = self.encode(word);
        self.cache.lock().insert(word.to_string(), units.clone());
        units
    }

    fn encode(&self, word: &str) -> Vec<String> {
        let chars: Vec<String> = word.chars().map(String::from).collect();
        if chars.len() <= 1 {
            return chars;
        }

        let mut units = chars;
        if self.version == (0, 1) {
            units.push(END_OF_WORD.to_string());
        } else if let Some(last) = units.last_mut() {
            last.push_str(END_OF_WORD);
        }

        loop {
            let best = units
                .windows(2)
                .filter_map(|w| {
                    self.ranks
                        .get(&(w[0].clone(), w[1].clone()))
                        .map(|rank| (*rank, w[0].clone(), w[1].clone()))
                })
                .min_by_key(|(rank, _, _)| *rank);

            let Some((_, left, right)) = best else {
                break;
            };

            let mut merged = Vec::with_capacity(units.len());
            let mut i = 0;
            while i < units.len() {
                if i + 1 < units.len() && units[i] == left && units[i + 1] == right {
                    merged.push(format!("{}{}", left, right));
                    i += 2;
                } else {
                    merged.push(units[i].clone());
                    i += 1;
                }
            }
            units = merged;

            if units.len() == 1 {
                break;
            }
        }

        if units.last().is_some_and(|u| u == END_OF_WORD) {
            units.pop();
        } else if let Some(last) = units.last_mut() {
            if let Some(stripped) = last.strip_suffix(END_OF_WORD) {
                *last = stripped.to_string();
            }
        }

        match &self.vocabulary {
            Some(vocabulary) => self.check_vocabulary(units, vocabulary),
            None => units,
        }
    }

    /// Undo merges that produce units missing from the vocabulary
    fn check_vocabulary(&self, units: Vec<String>, vocabulary: &HashSet<String>) -> Vec<String> {
        let mut out = Vec::with_capacity(units.len());
        let last = units.len().saturating_sub(1);

        for (i, unit) in units.into_iter().enumerate() {
            let is_final = i == last;
            let known = if is_final {
                vocabulary.contains(&unit)
            } else {
                vocabulary.contains(&format!("{}{}", unit, self.separator))
            };

            if known {
                out.push(unit);
            } else {
                self.recursive_split(&unit, vocabulary, is_final, &mut out);
            }
        }
        out
    }

    fn recursive_split(&self, unit: &str, vocabulary: &HashSet<String>, is_final: bool, out: &mut Vec<String>) {
        let pair = if is_final {
            self.reverse
                .get(&format!("{}{}", unit, END_OF_WORD))
                .map(|(left, right)| {
                    let right = right.strip_suffix(END_OF_WORD).unwrap_or(right);
                    (left.clone(), right.to_string())
                })
        } else {
            self.reverse.get(unit).cloned()
        };

        let Some((left, right)) = pair else {
            out.push(unit.to_string());
            return;
        };

        if vocabulary.contains(&format!("{}{}", left, self.separator)) {
            out.push(left);
        } else {
            self.recursive_split(&left, vocabulary, false, out);
        }

        let right_known = if is_final {
            vocabulary.contains(&right)
        } else {
            vocabulary.contains(&format!("{}{}", right, self.separator))
        };
        if right_known {
            out.push(right);
        } else {
            self.recursive_split(&right, vocabulary, is_final, out);
        }
    }
}

fn parse_version(text: &str) -> Result<(u32, u32), String> {
    let (major, minor) = text
        .split_once('.')
        .ok_or_else(|| format!("invalid version header '{}'", text))?;
    let parse = |s: &str| s.trim().parse::<u32>().map_err(|_| format!("invalid version header '{}'", text));
    Ok((parse(major)?, parse(minor)?))
}

/// Read a `word count` vocabulary, keeping words with count >= threshold
pub fn read_vocabulary(path: &Path, threshold: usize) -> Result<HashSet<String>, ConfigError> {
    let reader = BufReader::new(File::open(path)?);
    let mut vocabulary = HashSet::new();

    for line in reader.lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        let (Some(word), Some(count)) = (parts.next(), parts.next()) else {
            continue;
        };
        let count: usize = count.parse().map_err(|_| ConfigError::Parse {
            path: path.to_path_buf(),
            message: format!("invalid frequency in line '{}'", line),
        })?;
        if count >= threshold {
            vocabulary.insert(word.to_string());
        }
    }

    debug!("Vocabulary {:?}: {} entries above threshold {}", path, vocabulary.len(), threshold);
    Ok(vocabulary)
}

/// Removes subword join markers
#[derive(Debug)]
pub struct DeSubword {
    pattern: Regex,
}

impl DeSubword {
    /// Use an explicit pattern, or derive one from the separator (default `@@`)
    pub fn new(pattern: Option<&str>, separator: Option<&str>) -> Result<Self, ConfigError> {
        let pattern = match (pattern, separator) {
            (Some(pattern), _) => pattern.to_string(),
            (None, Some(separator)) => format!("{}(?: +|$)", regex::escape(separator)),
            (None, None) => "@@(?: +|$)".to_string(),
        };

        let pattern = Regex::new(&pattern).map_err(|e| ConfigError::InvalidParameter {
            parameter: "pattern".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { pattern })
    }

    pub fn apply(&self, line: &str) -> String {
        self.pattern.replace_all(line, "").into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODES: &str = "#version: 0.2\nl o\nlo w</w>\ne r</w>\nn e\nne w\nw e\nlo w\n";

    fn segmenter(vocabulary: Option<HashSet<String>>) -> SubwordSegmenter {
        SubwordSegmenter::from_codes(CODES, None, "@@", vocabulary, Vec::new()).unwrap()
    }

    #[test]
    fn test_segmentWord_shouldApplyMergesByRank() {
        let bpe = segmenter(None);
        assert_eq!(bpe.segment_word("low"), vec!["low"]);
        assert_eq!(bpe.segment_word("lower"), vec!["low", "er"]);
        assert_eq!(bpe.segment_word("newer"), vec!["new", "er"]);
        assert_eq!(bpe.segment_word("x"), vec!["x"]);
    }

    #[test]
    fn test_segmentLine_shouldMarkNonFinalUnits() {
        let bpe = segmenter(None);
        assert_eq!(bpe.segment_line("lower  low"), "low@@ er low");
    }

    #[test]
    fn test_segmentWord_withVocabulary_shouldUndoUnknownMerges() {
        let vocabulary: HashSet<String> = ["lo@@", "w@@", "er"].iter().map(|s| s.to_string()).collect();
        let bpe = segmenter(Some(vocabulary));
        assert_eq!(bpe.segment_word("lower"), vec!["lo", "w", "er"]);
    }

    #[test]
    fn test_segmentWord_withMergeLimit_shouldIgnoreLaterMerges() {
        let bpe = SubwordSegmenter::from_codes(CODES, Some(1), "@@", None, Vec::new()).unwrap();
        assert_eq!(bpe.segment_word("low"), vec!["lo", "w"]);
    }

    #[test]
    fn test_segmentWord_withGlossary_shouldKeepWord() {
        let bpe = SubwordSegmenter::from_codes(CODES, None, "@@", None, vec!["lower".to_string()]).unwrap();
        assert_eq!(bpe.segment_word("lower"), vec!["lower"]);
    }

    #[test]
    fn test_fromCodes_withMalformedLine_shouldFail() {
        assert!(SubwordSegmenter::from_codes("a b c\n", None, "@@", None, Vec::new()).is_err());
    }

    #[test]
    fn test_deSubword_shouldJoinUnits() {
        let desegment = DeSubword::new(None, None).unwrap();
        assert_eq!(desegment.apply("low@@ er is new@@"), "lower is new");

        let custom = DeSubword::new(None, Some("++")).unwrap();
        assert_eq!(custom.apply("low++ er"), "lower");
    }
}
